//! Structured log events emitted by the client.

use odps_session::TransportError;
use tracing::Level;

mod common;
use common::tracing_capture;
use common::*;

#[tokio::test]
async fn test_session_lifecycle_is_logged() {
    let (captured, _guard) = tracing_capture::install();
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;
    session.stop().await.unwrap();

    let created = captured.with_message("Created session");
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].level, Level::INFO);
    assert_eq!(created[0].field("session_name"), Some(session.name()));
    assert_eq!(created[0].field("workers"), Some("4"));

    assert_eq!(captured.with_message("Session is running").len(), 1);
    assert_eq!(captured.with_message("Stopped session").len(), 1);
}

#[tokio::test]
async fn test_transport_calls_are_instrumented() {
    let (captured, _guard) = tracing_capture::install();
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;
    session.status().await.unwrap();

    let calls = captured.with_message("Transport call completed");
    assert!(calls.iter().all(|e| e.target == "odps_session::transport"));
    assert!(calls.iter().any(|e| e.field("operation") == Some("create_session")));
    assert!(calls.iter().any(|e| e.field("operation") == Some("get_instance")));
    assert!(calls.iter().all(|e| e.fields.contains_key("duration_ms")));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_retries_are_logged() {
    let (captured, _guard) = tracing_capture::install();
    let (platform, client) = create_client().await;
    let session = running_session(&client).await;

    platform
        .fail_next("get_instance", TransportError::retryable("get_instance", "connection reset"))
        .await;
    session.status().await.unwrap();

    let failed = captured.with_message("Transport call failed");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].level, Level::WARN);
    assert_eq!(failed[0].field("retryable"), Some("true"));

    let retries = captured.with_message("Retrying transport call");
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].field("operation"), Some("get_instance"));
    assert_eq!(retries[0].field("attempt"), Some("1"));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_platform_failure_is_logged() {
    let (captured, _guard) = tracing_capture::install();
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;

    let inst = session.run_sql("select * from missing_table").await.unwrap();
    inst.wait_for_completion().await.unwrap_err();

    let failures = captured.with_message("Instance failed");
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].field("instance_id"), Some(inst.id()));
    assert!(failures[0].field("logview").unwrap().contains(inst.id()));
    session.stop().await.unwrap();
}
