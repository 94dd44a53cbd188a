#![allow(dead_code)]

pub mod tracing_capture;

use odps_session::transport::{InMemoryPlatform, PlatformOptions};
use odps_session::{Client, ClientConfig, Column, DataType, PollOptions, RetryOptions, Session};
use std::sync::Arc;
use std::time::Duration;

pub const TEST_SESSION_WORKERS: u32 = 4;
pub const TEST_SESSION_WORKER_MEMORY: u32 = 512;
pub const TEST_TABLE_NAME: &str = "session_test_table";

pub fn update_sql() -> String {
    format!("insert into table {TEST_TABLE_NAME} select count(*) from {TEST_TABLE_NAME}")
}

pub fn select_sql() -> String {
    format!("select * from {TEST_TABLE_NAME}")
}

/// Poll options that keep tests fast but still bounded.
pub fn fast_poll() -> PollOptions {
    PollOptions {
        interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        backoff_factor: 2.0,
        timeout: Some(Duration::from_secs(5)),
    }
}

pub fn fast_retry() -> RetryOptions {
    RetryOptions {
        initial_backoff: Duration::from_millis(1),
        factor: 1.0,
        max_retries: 3,
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://service.test/api", "test_project")
        .with_poll(fast_poll())
        .with_retry(fast_retry())
}

pub async fn create_platform(options: PlatformOptions) -> Arc<InMemoryPlatform> {
    let platform = Arc::new(InMemoryPlatform::with_options(options));
    platform
        .create_table(TEST_TABLE_NAME, vec![Column::new("id", DataType::Bigint)])
        .await;
    platform
}

pub async fn create_client() -> (Arc<InMemoryPlatform>, Client) {
    create_client_with(PlatformOptions::default()).await
}

pub async fn create_client_with(options: PlatformOptions) -> (Arc<InMemoryPlatform>, Client) {
    let platform = create_platform(options).await;
    let client = Client::with_platform(test_config(), platform.clone()).unwrap();
    (platform, client)
}

/// Create a session and wait until it is running, printing diagnostics on
/// failure.
pub async fn running_session(client: &Client) -> Session {
    let session = client
        .create_session(TEST_SESSION_WORKERS, TEST_SESSION_WORKER_MEMORY)
        .await
        .unwrap();
    if let Err(e) = session.wait_for_running().await {
        println!("LOGVIEW: {:?}", session.get_logview_address().await);
        println!("Task results: {:?}", session.get_task_results().await);
        panic!("session did not reach Running: {e}");
    }
    session
}
