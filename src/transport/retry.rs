//! Retrying transport decorator.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_retry2::{Retry, RetryError};
use tracing::warn;

use super::{InstanceRecord, SessionSpec, SqlSubmission, Transport};
use crate::config::RetryOptions;
use crate::error::TransportError;
use crate::status::TaskResult;

/// Wrapper that retries retryable failures of idempotent calls with
/// exponential backoff.
///
/// `create_session` and `submit_sql` are passed through untouched: repeating
/// them could create a second session or run a statement twice. Once the
/// retry budget is spent the last error is returned as-is.
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    options: RetryOptions,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, options: RetryOptions) -> Self {
        Self { inner, options }
    }

    async fn retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut attempt: u32 = 0;
        Retry::spawn(self.options.strategy(), || {
            attempt += 1;
            let current = attempt;
            let fut = call();
            async move {
                fut.await.map_err(|e| {
                    if e.is_retryable() {
                        warn!(operation, attempt = current, error = %e, "Retrying transport call");
                        RetryError::transient(e)
                    } else {
                        RetryError::permanent(e)
                    }
                })
            }
        })
        .await
    }
}

#[async_trait]
impl Transport for RetryingTransport {
    async fn create_session(&self, spec: &SessionSpec) -> Result<InstanceRecord, TransportError> {
        self.inner.create_session(spec).await
    }

    async fn find_session(&self, name: &str) -> Result<Option<InstanceRecord>, TransportError> {
        self.retry("find_session", || self.inner.find_session(name)).await
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, TransportError> {
        self.retry("get_instance", || self.inner.get_instance(instance_id)).await
    }

    async fn submit_sql(&self, submission: &SqlSubmission) -> Result<InstanceRecord, TransportError> {
        self.inner.submit_sql(submission).await
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), TransportError> {
        self.retry("stop_instance", || self.inner.stop_instance(instance_id)).await
    }

    async fn get_task_results(&self, instance_id: &str) -> Result<Vec<TaskResult>, TransportError> {
        self.retry("get_task_results", || self.inner.get_task_results(instance_id))
            .await
    }

    async fn create_logview_token(
        &self,
        instance_id: &str,
        hours: u32,
    ) -> Result<String, TransportError> {
        self.retry("create_logview_token", || {
            self.inner.create_logview_token(instance_id, hours)
        })
        .await
    }
}
