//! Session and instance client for a remote big-data compute platform.
//!
//! A [`Client`] creates [`Session`]s (pools of reserved workers) or attaches
//! to existing ones by name. Statements run through a session come back as
//! [`Instance`] handles that can be polled to completion and read through a
//! [`RecordReader`].
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use odps_session::{Client, ClientConfig, ReaderOptions};
//! use odps_session::transport::InMemoryPlatform;
//!
//! # async fn example() -> odps_session::Result<()> {
//! let platform = Arc::new(InMemoryPlatform::new());
//! let client = Client::with_platform(ClientConfig::new("http://localhost", "demo"), platform)?;
//!
//! let session = client.create_session(4, 512).await?;
//! session.wait_for_running().await?;
//!
//! let inst = session.run_sql("select count(*) from t").await?;
//! inst.wait_for_completion().await?;
//! let rows = inst.open_reader(ReaderOptions::tunnel()).await?.read_all().await?;
//! println!("{rows:?}");
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! The HTTP transport and the tunnel wire protocol live behind the
//! [`transport::Transport`] and [`tunnel::TunnelService`] traits.
//! [`transport::InMemoryPlatform`] implements both for tests and demos.

pub mod client;
pub mod config;
pub mod error;
pub mod instance;
pub mod logging;
pub mod reader;
pub mod session;
pub mod status;
pub mod transport;
pub mod tunnel;

pub use client::Client;
pub use config::{ClientConfig, PollOptions, RetryOptions};
pub use error::{ClientError, Result, TransportError};
pub use instance::Instance;
pub use reader::{ReaderOptions, RecordReader};
pub use session::{Session, SessionOptions};
pub use status::{InstanceStatus, TaskResult, TaskStatus};
pub use tunnel::{Column, DataType, Record, Value};
