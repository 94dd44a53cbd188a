//! Instrumented transport wrapper that logs every platform call.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{InstanceRecord, SessionSpec, SqlSubmission, Transport};
use crate::error::TransportError;
use crate::status::TaskResult;

/// Wrapper that emits a structured `tracing` event for each call made
/// through the wrapped [`Transport`]:
/// - operation name and duration on success (`debug`)
/// - operation name, duration, error and retry classification on failure
///   (`warn`)
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use odps_session::transport::{InMemoryPlatform, InstrumentedTransport, Transport};
///
/// let platform = Arc::new(InMemoryPlatform::new());
/// let instrumented: Arc<dyn Transport> = Arc::new(InstrumentedTransport::new(platform));
/// ```
pub struct InstrumentedTransport {
    inner: Arc<dyn Transport>,
}

impl InstrumentedTransport {
    pub fn new(inner: Arc<dyn Transport>) -> Self {
        Self { inner }
    }

    #[inline]
    fn record<T>(&self, operation: &str, duration: Duration, result: &Result<T, TransportError>) {
        let duration_ms = duration.as_secs_f64() * 1000.0;
        match result {
            Ok(_) => debug!(
                target: "odps_session::transport",
                operation,
                duration_ms,
                status = "success",
                "Transport call completed"
            ),
            Err(e) => warn!(
                target: "odps_session::transport",
                operation,
                duration_ms,
                status = "error",
                retryable = e.is_retryable(),
                error = %e.message,
                "Transport call failed"
            ),
        }
    }
}

#[async_trait]
impl Transport for InstrumentedTransport {
    async fn create_session(&self, spec: &SessionSpec) -> Result<InstanceRecord, TransportError> {
        let start = Instant::now();
        let result = self.inner.create_session(spec).await;
        self.record("create_session", start.elapsed(), &result);
        result
    }

    async fn find_session(&self, name: &str) -> Result<Option<InstanceRecord>, TransportError> {
        let start = Instant::now();
        let result = self.inner.find_session(name).await;
        self.record("find_session", start.elapsed(), &result);
        result
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Option<InstanceRecord>, TransportError> {
        let start = Instant::now();
        let result = self.inner.get_instance(instance_id).await;
        self.record("get_instance", start.elapsed(), &result);
        result
    }

    async fn submit_sql(&self, submission: &SqlSubmission) -> Result<InstanceRecord, TransportError> {
        let start = Instant::now();
        let result = self.inner.submit_sql(submission).await;
        self.record("submit_sql", start.elapsed(), &result);
        result
    }

    async fn stop_instance(&self, instance_id: &str) -> Result<(), TransportError> {
        let start = Instant::now();
        let result = self.inner.stop_instance(instance_id).await;
        self.record("stop_instance", start.elapsed(), &result);
        result
    }

    async fn get_task_results(&self, instance_id: &str) -> Result<Vec<TaskResult>, TransportError> {
        let start = Instant::now();
        let result = self.inner.get_task_results(instance_id).await;
        self.record("get_task_results", start.elapsed(), &result);
        result
    }

    async fn create_logview_token(
        &self,
        instance_id: &str,
        hours: u32,
    ) -> Result<String, TransportError> {
        let start = Instant::now();
        let result = self.inner.create_logview_token(instance_id, hours).await;
        self.record("create_logview_token", start.elapsed(), &result);
        result
    }
}
