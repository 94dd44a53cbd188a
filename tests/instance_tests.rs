use odps_session::transport::PlatformOptions;
use odps_session::{Client, ClientError, InstanceStatus, PollOptions, TaskStatus, TransportError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod common;
use common::*;

fn slow_statements() -> PlatformOptions {
    PlatformOptions {
        session_startup_polls: 1,
        statement_polls: u32::MAX,
    }
}

#[tokio::test]
async fn test_wait_for_completion_times_out() {
    let (_platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    let poll = fast_poll().with_timeout(Duration::from_millis(25));
    let err = inst
        .wait_for_completion_with(&poll, &CancellationToken::new())
        .await
        .unwrap_err();
    match err {
        ClientError::Timeout { instance_id, elapsed } => {
            assert_eq!(instance_id, inst.id());
            assert!(elapsed >= Duration::from_millis(25));
        }
        other => panic!("expected Timeout, got {other:?}"),
    }
    // The statement keeps running server-side.
    assert_eq!(inst.status().await.unwrap(), InstanceStatus::Running);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_wait_for_completion_can_be_cancelled() {
    let (_platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    let cancel = CancellationToken::new();
    let waiter = {
        let inst = inst.clone();
        let cancel = cancel.clone();
        let poll = fast_poll().with_timeout(Duration::from_secs(60));
        tokio::spawn(async move { inst.wait_for_completion_with(&poll, &cancel).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(matches!(err, ClientError::Cancelled { .. }), "got {err:?}");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_status_errors_abort_the_wait() {
    let (platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    platform
        .fail_next("get_instance", TransportError::permanent("get_instance", "access denied"))
        .await;
    let err = inst.wait_for_completion().await.unwrap_err();
    match err {
        ClientError::Transport(e) => {
            assert_eq!(e.operation, "get_instance");
            assert!(!e.is_retryable());
        }
        other => panic!("expected Transport error, got {other:?}"),
    }
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_retryable_status_errors_are_retried() {
    let (platform, client) = create_client().await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    for _ in 0..2 {
        platform
            .fail_next("get_instance", TransportError::retryable("get_instance", "connection reset"))
            .await;
    }
    inst.wait_for_completion().await.unwrap();
    assert!(inst.is_successful().await.unwrap());
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_exhausted_retries_surface_as_platform_error() {
    let (platform, client) = create_client().await;
    let session = running_session(&client).await;

    // One initial attempt plus three retries.
    for i in 0..4 {
        platform
            .fail_next(
                "get_instance",
                TransportError::retryable("get_instance", format!("throttled {i}")),
            )
            .await;
    }
    let err = session.status().await.unwrap_err();
    match err {
        ClientError::Platform {
            instance_id, message, ..
        } => {
            assert_eq!(instance_id, session.id());
            assert!(message.contains("throttled 3"), "{message}");
        }
        other => panic!("expected Platform error, got {other:?}"),
    }
    assert_eq!(session.status().await.unwrap(), InstanceStatus::Running);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_submit_is_not_retried() {
    let (platform, client) = create_client().await;
    let session = running_session(&client).await;

    platform
        .fail_next("submit_sql", TransportError::retryable("submit_sql", "connection reset"))
        .await;
    let err = session.run_sql(&update_sql()).await.unwrap_err();
    assert!(err.is_platform(), "got {err:?}");
    assert!(platform.table_rows(TEST_TABLE_NAME).await.unwrap().is_empty());

    // The session is still usable.
    session.run_sql(&update_sql()).await.unwrap().wait_for_completion().await.unwrap();
    assert_eq!(platform.table_rows(TEST_TABLE_NAME).await.unwrap().len(), 1);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_get_instance() {
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    let found = client.get_instance(inst.id()).await.unwrap();
    assert_eq!(found.id(), inst.id());
    found.wait_for_completion().await.unwrap();
    assert_eq!(inst.status().await.unwrap(), InstanceStatus::Terminated);

    let err = client.get_instance("20260101000000000000").await.unwrap_err();
    assert!(err.is_not_found(), "got {err:?}");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopped_statement_reports_cancellation() {
    let (_platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    assert!(!inst.is_successful().await.unwrap());
    inst.stop().await.unwrap();
    inst.stop().await.unwrap();

    assert!(inst.is_terminated().await.unwrap());
    assert_eq!(
        inst.get_task_statuses().await.unwrap().get("AnonymousSQLTask"),
        Some(&TaskStatus::Cancelled)
    );
    let err = inst.wait_for_completion().await.unwrap_err();
    assert!(err.is_platform(), "got {err:?}");

    // Stopping a statement leaves its session running.
    assert_eq!(session.status().await.unwrap(), InstanceStatus::Running);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_session_task_results() {
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;

    let statuses = session.instance().get_task_statuses().await.unwrap();
    assert_eq!(statuses.get("AnonymousSQLRTTask"), Some(&TaskStatus::Running));

    session.stop().await.unwrap();
    let results = session.get_task_results().await.unwrap();
    assert_eq!(results.get("AnonymousSQLRTTask").map(String::as_str), Some("session released"));
    assert!(session.instance().is_successful().await.unwrap());
}

#[tokio::test]
async fn test_logview_address() {
    let (_platform, client) = create_client().await;
    let session = running_session(&client).await;

    let address = session.get_logview_address().await.unwrap();
    assert!(address.starts_with("http://logview.odps.aliyun.com/logview/?h=http://service.test/api"));
    assert!(address.contains("&p=test_project"));
    assert!(address.contains(&format!("&i={}", session.id())));
    assert!(address.contains("&token="));
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_wait_with_huge_backoff_factor_is_capped() {
    let platform = create_platform(PlatformOptions {
        session_startup_polls: 4,
        statement_polls: 1,
    })
    .await;
    let config = test_config().with_poll(PollOptions {
        interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(5),
        backoff_factor: 1e20,
        timeout: Some(Duration::from_secs(5)),
    });
    let client = Client::with_platform(config, platform).unwrap();
    let session = client.create_session(1, 64).await.unwrap();
    session.wait_for_running().await.unwrap();
    assert_eq!(session.status().await.unwrap(), InstanceStatus::Running);
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_poll_options_fail_before_polling() {
    let (_platform, client) = create_client().await;
    let session = client.create_session(1, 64).await.unwrap();

    let nan = PollOptions {
        backoff_factor: f64::NAN,
        ..fast_poll()
    };
    let err = session
        .wait_for_running_with(&nan, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)), "got {err:?}");

    let zero = PollOptions {
        interval: Duration::ZERO,
        ..fast_poll()
    };
    let err = session
        .instance()
        .wait_for_completion_with(&zero, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Config(_)), "got {err:?}");
    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_wait_deadline_follows_tokio_clock() {
    let (_platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;
    let inst = session.run_sql(&select_sql()).await.unwrap();

    let poll = PollOptions {
        interval: Duration::from_millis(10),
        max_interval: Duration::from_secs(1),
        backoff_factor: 2.0,
        timeout: Some(Duration::from_secs(60)),
    };
    let started = tokio::time::Instant::now();
    let err = inst
        .wait_for_completion_with(&poll, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }), "got {err:?}");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(60), "{waited:?}");
    assert!(waited < Duration::from_secs(62), "{waited:?}");
    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopped_insert_leaves_table_unchanged() {
    let (platform, client) = create_client_with(slow_statements()).await;
    let session = running_session(&client).await;

    let insert = session.run_sql(&update_sql()).await.unwrap();
    assert_eq!(insert.status().await.unwrap(), InstanceStatus::Running);
    insert.stop().await.unwrap();

    let err = insert.wait_for_completion().await.unwrap_err();
    assert!(err.is_platform(), "got {err:?}");
    assert!(platform.table_rows(TEST_TABLE_NAME).await.unwrap().is_empty());
    session.stop().await.unwrap();
}
