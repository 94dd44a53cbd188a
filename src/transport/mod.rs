//! Transport collaborator seam.
//!
//! A [`Transport`] turns instance and session operations into request /
//! response pairs against the platform. Authentication, HTTP and payload
//! encoding belong to the implementation; the client only relies on the
//! contract documented on each method.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::TransportError;
use crate::status::{InstanceStatus, TaskResult};

pub mod in_memory;
pub mod instrumented;
pub mod retry;

pub use in_memory::{InMemoryPlatform, PlatformOptions};
pub use instrumented::InstrumentedTransport;
pub use retry::RetryingTransport;

/// Session identity carried on session instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    pub workers: u32,
    pub worker_memory_mb: u32,
}

/// Snapshot of one instance as the platform reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub status: InstanceStatus,
    /// Present when the instance is a session.
    pub session: Option<SessionInfo>,
}

/// Session creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSpec {
    /// Requested name; the platform generates one when absent.
    pub name: Option<String>,
    pub workers: u32,
    pub worker_memory_mb: u32,
    pub hints: BTreeMap<String, String>,
}

/// SQL statement submitted into a running session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlSubmission {
    pub session_id: String,
    pub session_name: String,
    pub sql: String,
    pub hints: BTreeMap<String, String>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Submit a session-creation request. Returns immediately with the new
    /// session instance in a non-terminal status. Not idempotent.
    async fn create_session(&self, spec: &SessionSpec) -> Result<InstanceRecord, TransportError>;

    /// Resolve a live (non-terminated) session by name.
    async fn find_session(&self, name: &str) -> Result<Option<InstanceRecord>, TransportError>;

    /// Fetch the current state of an instance. `Ok(None)` for unknown ids.
    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, TransportError>;

    /// Run a statement on a session's reserved workers. The platform rejects
    /// submissions to sessions that are not running. Not idempotent.
    async fn submit_sql(&self, submission: &SqlSubmission) -> Result<InstanceRecord, TransportError>;

    /// Request termination. Stopping a terminated instance succeeds.
    async fn stop_instance(&self, instance_id: &str) -> Result<(), TransportError>;

    /// Per-task results and diagnostics, available for failed instances too.
    async fn get_task_results(&self, instance_id: &str) -> Result<Vec<TaskResult>, TransportError>;

    /// Token authorizing access to the instance's logview for `hours`.
    async fn create_logview_token(
        &self,
        instance_id: &str,
        hours: u32,
    ) -> Result<String, TransportError>;
}
