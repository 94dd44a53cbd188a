use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a transport or tunnel implementation, with retry
/// classification.
///
/// **Retryable**: connection resets, timeouts, throttling, temporary
/// unavailability. [`crate::transport::RetryingTransport`] retries these for
/// idempotent calls. One that still reaches the client is reported as
/// [`ClientError::Platform`].
///
/// **Permanent**: rejected requests, unknown instances, malformed payloads.
/// These surface to the caller on the first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation}: {message}")]
pub struct TransportError {
    /// Operation that failed (e.g. "get_instance", "open_download")
    pub operation: String,
    pub message: String,
    pub retryable: bool,
}

impl TransportError {
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }
}

/// Errors surfaced to callers of [`crate::Client`], [`crate::Session`] and
/// [`crate::Instance`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The platform reported a terminal failure. Carries the diagnostics a
    /// caller needs to report it without another round trip.
    #[error("instance {instance_id} failed: {message} (logview: {logview})")]
    Platform {
        instance_id: String,
        message: String,
        logview: String,
        task_results: BTreeMap<String, String>,
    },

    /// A reader was requested for an instance whose statement produced no
    /// tabular result.
    #[error("instance {instance_id} produced no tabular output")]
    NoOutput { instance_id: String },

    /// The operation is not valid in the handle's current state.
    #[error("cannot {operation} on instance {instance_id}: {reason}")]
    IllegalState {
        instance_id: String,
        operation: &'static str,
        reason: String,
    },

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("timed out after {elapsed:?} waiting for instance {instance_id}")]
    Timeout { instance_id: String, elapsed: Duration },

    #[error("wait for instance {instance_id} was cancelled")]
    Cancelled { instance_id: String },

    /// A transport or tunnel call failed permanently.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        ClientError::from_transport(err, "")
    }
}

impl ClientError {
    /// Classify a transport failure seen by the client. Permanent failures
    /// stay [`ClientError::Transport`]; retryable ones have already exhausted
    /// the retry budget (or were not safe to repeat) and surface as a
    /// platform failure.
    pub(crate) fn from_transport(err: TransportError, instance_id: &str) -> Self {
        if !err.is_retryable() {
            return ClientError::Transport(err);
        }
        ClientError::Platform {
            instance_id: instance_id.to_string(),
            message: format!("platform unavailable: {err}"),
            logview: format!("<unavailable: {}>", err.message),
            task_results: BTreeMap::new(),
        }
    }

    pub fn is_platform(&self) -> bool {
        matches!(self, ClientError::Platform { .. })
    }

    pub fn is_no_output(&self) -> bool {
        matches!(self, ClientError::NoOutput { .. })
    }

    pub fn is_illegal_state(&self) -> bool {
        matches!(self, ClientError::IllegalState { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound { .. })
    }

    /// Logview address attached to a platform failure.
    pub fn logview(&self) -> Option<&str> {
        match self {
            ClientError::Platform { logview, .. } => Some(logview),
            _ => None,
        }
    }

    /// Task diagnostics attached to a platform failure.
    pub fn task_results(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            ClientError::Platform { task_results, .. } => Some(task_results),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_classification() {
        let retryable = TransportError::retryable("get_instance", "connection reset");
        assert!(retryable.is_retryable());
        assert_eq!(retryable.to_string(), "get_instance: connection reset");

        let permanent = TransportError::permanent("submit_sql", "session is not running");
        assert!(!permanent.is_retryable());
        assert_ne!(retryable, permanent);
    }

    #[test]
    fn test_transport_error_converts_into_client_error() {
        let err: ClientError = TransportError::permanent("stop_instance", "denied").into();
        assert!(matches!(err, ClientError::Transport(ref e) if e.operation == "stop_instance"));
        assert_eq!(err.to_string(), "stop_instance: denied");
    }

    #[test]
    fn test_retryable_transport_error_surfaces_as_platform_failure() {
        let err = ClientError::from_transport(TransportError::retryable("get_instance", "throttled"), "i3");
        match err {
            ClientError::Platform {
                instance_id,
                message,
                task_results,
                ..
            } => {
                assert_eq!(instance_id, "i3");
                assert!(message.contains("get_instance: throttled"), "{message}");
                assert!(task_results.is_empty());
            }
            other => panic!("expected Platform, got {other:?}"),
        }
        let err: ClientError = TransportError::retryable("find_session", "reset").into();
        assert!(err.is_platform());
    }

    #[test]
    fn test_platform_error_exposes_diagnostics() {
        let mut tasks = BTreeMap::new();
        tasks.insert("AnonymousSQLTask".to_string(), "Table not found".to_string());
        let err = ClientError::Platform {
            instance_id: "i1".to_string(),
            message: "Table not found".to_string(),
            logview: "http://logview/i1".to_string(),
            task_results: tasks,
        };
        assert!(err.is_platform());
        assert!(!err.is_no_output());
        assert_eq!(err.logview(), Some("http://logview/i1"));
        assert_eq!(err.task_results().map(|t| t.len()), Some(1));
        assert!(err.to_string().contains("http://logview/i1"));
    }

    #[test]
    fn test_diagnostics_absent_on_other_variants() {
        let err = ClientError::NoOutput {
            instance_id: "i2".to_string(),
        };
        assert!(err.is_no_output());
        assert_eq!(err.logview(), None);
        assert!(err.task_results().is_none());
    }
}
