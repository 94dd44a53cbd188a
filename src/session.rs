//! Sessions: long-lived instances holding a pool of reserved workers.
//!
//! A [`Session`] is an [`Instance`] plus a name other processes can attach
//! by, and the ability to run SQL on the reserved workers. Ownership of the
//! workers is server-side: stopping any handle releases them for every
//! handle attached to the same name.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ClientContext;
use crate::config::PollOptions;
use crate::error::{ClientError, Result, TransportError};
use crate::instance::Instance;
use crate::status::InstanceStatus;
use crate::transport::{InstanceRecord, SessionInfo, SqlSubmission};

/// Parameters for [`crate::Client::create_session_with`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub workers: u32,
    pub worker_memory_mb: u32,
    /// Name to register the session under; generated by the platform when
    /// absent.
    pub name: Option<String>,
    /// Settings applied to the session itself.
    pub hints: BTreeMap<String, String>,
}

impl SessionOptions {
    pub fn new(workers: u32, worker_memory_mb: u32) -> Self {
        Self {
            workers,
            worker_memory_mb,
            name: None,
            hints: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

/// Client handle to a running (or starting) session.
///
/// Clones share the handle-local stopped flag; handles obtained through
/// [`crate::Client::attach_session`] do not.
#[derive(Debug, Clone)]
pub struct Session {
    instance: Instance,
    info: SessionInfo,
    stopped: Arc<AtomicBool>,
    /// Serializes `stop` across clones.
    stop_lock: Arc<Mutex<()>>,
}

impl Session {
    pub(crate) fn from_record(record: InstanceRecord, ctx: Arc<ClientContext>) -> Result<Self> {
        let info = record.session.ok_or_else(|| {
            TransportError::permanent(
                "session",
                format!("instance {} is not a session", record.id),
            )
        })?;
        Ok(Self {
            instance: Instance::new(record.id, ctx),
            info,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn id(&self) -> &str {
        self.instance.id()
    }

    /// Name other clients use to attach to this session.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn workers(&self) -> u32 {
        self.info.workers
    }

    pub fn worker_memory_mb(&self) -> u32 {
        self.info.worker_memory_mb
    }

    /// The session's own instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Whether `stop` was called through this handle (or a clone of it).
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> Result<InstanceStatus> {
        self.instance.status().await
    }

    pub async fn get_logview_address(&self) -> Result<String> {
        self.instance.get_logview_address().await
    }

    pub async fn get_task_results(&self) -> Result<BTreeMap<String, String>> {
        self.instance.get_task_results().await
    }

    /// Wait until the session reports `Running`, using the client's poll
    /// options.
    pub async fn wait_for_running(&self) -> Result<()> {
        let poll = self.instance.context().config.poll.clone();
        self.wait_for_running_with(&poll, &CancellationToken::new()).await
    }

    /// Wait until the session reports `Running`. A session that terminates
    /// first is reported as [`ClientError::Platform`].
    pub async fn wait_for_running_with(
        &self,
        poll: &PollOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let status = self
            .instance
            .poll_until(poll, cancel, |s| s == InstanceStatus::Running || s.is_terminal())
            .await?;
        if status.is_terminal() {
            let message = format!("session {} terminated before it was running", self.name());
            return Err(self.instance.platform_error(message, None).await);
        }
        info!(instance_id = %self.id(), session_name = %self.name(), "Session is running");
        Ok(())
    }

    /// Wait until the session itself terminates, like any instance.
    pub async fn wait_for_completion(&self) -> Result<()> {
        self.instance.wait_for_completion().await
    }

    /// Run a statement on the session's workers.
    ///
    /// Valid only while the session is `Running` and this handle has not
    /// been stopped; anything else fails with [`ClientError::IllegalState`].
    pub async fn run_sql(&self, sql: &str) -> Result<Instance> {
        self.run_sql_with_hints(sql, BTreeMap::new()).await
    }

    pub async fn run_sql_with_hints(
        &self,
        sql: &str,
        hints: BTreeMap<String, String>,
    ) -> Result<Instance> {
        if self.is_stopped() {
            return Err(self.illegal_state("session handle has been stopped".to_string()));
        }
        let status = self.status().await?;
        if status != InstanceStatus::Running {
            return Err(self.illegal_state(format!("session is {status}, not Running")));
        }

        let submission = SqlSubmission {
            session_id: self.id().to_string(),
            session_name: self.name().to_string(),
            sql: sql.to_string(),
            hints,
        };
        let ctx = self.instance.context();
        match ctx.transport.submit_sql(&submission).await {
            Ok(record) => {
                debug!(
                    instance_id = %record.id,
                    session_name = %self.name(),
                    sql,
                    "Submitted statement"
                );
                Ok(Instance::new(record.id, ctx.clone()))
            }
            // The session may have stopped between the status read and the
            // submission; report that as a state error, not a transport one.
            Err(e) if !e.is_retryable() => match self.status().await? {
                InstanceStatus::Running => Err(ClientError::from_transport(e, self.id())),
                status => Err(self.illegal_state(format!("session is {status}, not Running"))),
            },
            Err(e) => Err(ClientError::from_transport(e, self.id())),
        }
    }

    /// Release the session's workers. Idempotent.
    ///
    /// After a successful stop, `run_sql` fails on this handle and on every
    /// handle attached to the same session. Concurrent calls through clones
    /// run one at a time; a call returns `Ok` only once the platform accepted
    /// a stop.
    pub async fn stop(&self) -> Result<()> {
        let _guard = self.stop_lock.lock().await;
        if self.stopped.swap(true, Ordering::SeqCst) {
            debug!(instance_id = %self.id(), "Session already stopped");
            return Ok(());
        }
        if let Err(e) = self.instance.context().transport.stop_instance(self.id()).await {
            self.stopped.store(false, Ordering::SeqCst);
            return Err(ClientError::from_transport(e, self.id()));
        }
        info!(instance_id = %self.id(), session_name = %self.name(), "Stopped session");
        Ok(())
    }

    fn illegal_state(&self, reason: String) -> ClientError {
        ClientError::IllegalState {
            instance_id: self.id().to_string(),
            operation: "run_sql",
            reason,
        }
    }
}

impl AsRef<Instance> for Session {
    fn as_ref(&self) -> &Instance {
        &self.instance
    }
}
