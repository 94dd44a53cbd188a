//! Session demo binary
//!
//! Drives a full session lifecycle against the in-memory platform: create a
//! session, wait for it to run, insert a count row, read it back through the
//! tunnel and stop the session.
//!
//! Usage:
//!   cargo run --bin session-demo [WORKERS] [WORKER_MEMORY_MB]
//!
//! Examples:
//!   cargo run --bin session-demo          # 4 workers, 512 MB each
//!   RUST_LOG=debug cargo run --bin session-demo 2 256

use std::sync::Arc;
use std::time::Duration;

use odps_session::logging::{init_logging, LoggingConfig};
use odps_session::transport::InMemoryPlatform;
use odps_session::{Client, ClientConfig, Column, DataType, PollOptions, ReaderOptions};

const DEMO_TABLE: &str = "session_demo_table";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LoggingConfig::default())?;

    let mut args = std::env::args().skip(1);
    let workers = args.next().and_then(|a| a.parse::<u32>().ok()).unwrap_or(4);
    let worker_memory_mb = args.next().and_then(|a| a.parse::<u32>().ok()).unwrap_or(512);

    let platform = Arc::new(InMemoryPlatform::new());
    platform
        .create_table(DEMO_TABLE, vec![Column::new("id", DataType::Bigint)])
        .await;

    let config = ClientConfig::new("http://localhost/api", "demo_project").with_poll(PollOptions {
        interval: Duration::from_millis(20),
        max_interval: Duration::from_millis(200),
        backoff_factor: 1.5,
        timeout: Some(Duration::from_secs(30)),
    });
    let client = Client::with_platform(config, platform.clone())?;

    let session = client.create_session(workers, worker_memory_mb).await?;
    if let Err(e) = session.wait_for_running().await {
        eprintln!("LOGVIEW: {}", session.get_logview_address().await?);
        eprintln!("Task results: {:?}", session.get_task_results().await?);
        return Err(e.into());
    }
    println!("session {} is running ({} workers)", session.name(), session.workers());

    let attached = client.attach_session(session.name()).await?;
    println!("attached to {} as instance {}", attached.name(), attached.id());

    let insert = session
        .run_sql(&format!("insert into table {DEMO_TABLE} select count(*) from {DEMO_TABLE}"))
        .await?;
    insert.wait_for_completion().await?;

    let select = attached.run_sql(&format!("select * from {DEMO_TABLE}")).await?;
    select.wait_for_completion().await?;
    let reader = select.open_reader(ReaderOptions::tunnel()).await?;
    println!("columns: {}", reader.column_names().join(","));
    for record in reader.read_all().await? {
        let cells: Vec<String> = record.values().iter().map(ToString::to_string).collect();
        println!("{}", cells.join(","));
    }

    session.stop().await?;
    println!("{}", platform.dump_all_pretty().await);
    Ok(())
}
