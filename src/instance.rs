use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientContext;
use crate::config::PollOptions;
use crate::error::{ClientError, Result};
use crate::reader::{decode_csv_records, ReaderOptions, RecordReader};
use crate::status::{InstanceStatus, TaskResult, TaskStatus};
use crate::transport::InstanceRecord;

/// Handle to one unit of submitted work: a session or a statement run
/// inside one.
///
/// The handle caches nothing but its id. Every status read goes to the
/// platform, so two handles for the same id always agree with the server.
#[derive(Clone)]
pub struct Instance {
    id: String,
    ctx: Arc<ClientContext>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance").field("id", &self.id).finish()
    }
}

impl Instance {
    pub(crate) fn new(id: impl Into<String>, ctx: Arc<ClientContext>) -> Self {
        Self { id: id.into(), ctx }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn context(&self) -> &Arc<ClientContext> {
        &self.ctx
    }

    pub(crate) async fn fetch(&self) -> Result<InstanceRecord> {
        self.ctx
            .transport
            .get_instance(&self.id)
            .await
            .map_err(|e| ClientError::from_transport(e, &self.id))?
            .ok_or_else(|| ClientError::NotFound {
                kind: "instance",
                name: self.id.clone(),
            })
    }

    /// Current status, freshly read from the platform.
    pub async fn status(&self) -> Result<InstanceStatus> {
        Ok(self.fetch().await?.status)
    }

    pub async fn is_terminated(&self) -> Result<bool> {
        Ok(self.status().await?.is_terminal())
    }

    /// True once the instance has terminated and every task succeeded.
    pub async fn is_successful(&self) -> Result<bool> {
        if !self.is_terminated().await? {
            return Ok(false);
        }
        let tasks = self.ctx.transport.get_task_results(&self.id).await?;
        Ok(tasks.iter().all(|t| t.status == TaskStatus::Success))
    }

    /// Wait until the instance terminates, using the client's poll options.
    ///
    /// A terminal failure on the platform is returned as
    /// [`ClientError::Platform`] with logview and task diagnostics attached.
    pub async fn wait_for_completion(&self) -> Result<()> {
        let poll = self.ctx.config.poll.clone();
        self.wait_for_completion_with(&poll, &CancellationToken::new()).await
    }

    /// Wait until the instance terminates, bounded by `poll.timeout` and
    /// abandoned as soon as `cancel` fires.
    pub async fn wait_for_completion_with(
        &self,
        poll: &PollOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.poll_until(poll, cancel, InstanceStatus::is_terminal).await?;
        self.ensure_success().await
    }

    /// Poll status until `done` accepts it.
    ///
    /// Errors from a status read abort the wait immediately; they are never
    /// treated as "still pending". Invalid `poll` options fail with
    /// [`ClientError::Config`] before the first read.
    pub(crate) async fn poll_until<F>(
        &self,
        poll: &PollOptions,
        cancel: &CancellationToken,
        done: F,
    ) -> Result<InstanceStatus>
    where
        F: Fn(InstanceStatus) -> bool,
    {
        poll.validate()?;
        let started = Instant::now();
        let mut delay = poll.interval;
        let mut last_seen: Option<InstanceStatus> = None;
        loop {
            let status = self.status().await?;
            if last_seen != Some(status) {
                debug!(instance_id = %self.id, %status, "Observed instance status");
                last_seen = Some(status);
            }
            if done(status) {
                return Ok(status);
            }

            let elapsed = started.elapsed();
            let sleep_for = match poll.timeout {
                Some(limit) if elapsed >= limit => {
                    return Err(ClientError::Timeout {
                        instance_id: self.id.clone(),
                        elapsed,
                    })
                }
                Some(limit) => delay.min(limit - elapsed),
                None => delay,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ClientError::Cancelled {
                        instance_id: self.id.clone(),
                    });
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
            delay = poll.next_interval(delay);
        }
    }

    async fn ensure_success(&self) -> Result<()> {
        let tasks = self.ctx.transport.get_task_results(&self.id).await?;
        match tasks.iter().find(|t| t.status.is_failure()) {
            Some(failed) => {
                let message = if failed.result.is_empty() {
                    format!("task {} {}", failed.name, failed.status)
                } else {
                    failed.result.clone()
                };
                Err(self.platform_error(message, Some(&tasks)).await)
            }
            None => Ok(()),
        }
    }

    /// Build a [`ClientError::Platform`] carrying this instance's
    /// diagnostics. Diagnostics are gathered best-effort.
    pub(crate) async fn platform_error(
        &self,
        message: String,
        tasks: Option<&[TaskResult]>,
    ) -> ClientError {
        let logview = match self.get_logview_address().await {
            Ok(address) => address,
            Err(e) => format!("<unavailable: {e}>"),
        };
        let task_results = match tasks {
            Some(tasks) => summarize(tasks),
            None => self.get_task_results().await.unwrap_or_default(),
        };
        warn!(instance_id = %self.id, logview = %logview, error = %message, "Instance failed");
        ClientError::Platform {
            instance_id: self.id.clone(),
            message,
            logview,
            task_results,
        }
    }

    /// Diagnostic address for this instance. Works for failed instances.
    pub async fn get_logview_address(&self) -> Result<String> {
        let config = &self.ctx.config;
        let token = self
            .ctx
            .transport
            .create_logview_token(&self.id, config.logview_hours)
            .await?;
        Ok(format!(
            "{}/logview/?h={}&p={}&i={}&token={}",
            config.logview_host.trim_end_matches('/'),
            config.endpoint,
            config.project,
            self.id,
            token
        ))
    }

    /// Raw result or diagnostic text per task. Works for failed instances.
    pub async fn get_task_results(&self) -> Result<BTreeMap<String, String>> {
        let tasks = self.ctx.transport.get_task_results(&self.id).await?;
        Ok(summarize(&tasks))
    }

    pub async fn get_task_statuses(&self) -> Result<BTreeMap<String, TaskStatus>> {
        let tasks = self.ctx.transport.get_task_results(&self.id).await?;
        Ok(tasks.into_iter().map(|t| (t.name, t.status)).collect())
    }

    /// Open a reader over the instance's tabular output.
    ///
    /// Fails with [`ClientError::IllegalState`] before the instance has
    /// terminated, with [`ClientError::Platform`] if it failed, and with
    /// [`ClientError::NoOutput`] if the statement produced no rows to read
    /// (e.g. an insert).
    pub async fn open_reader(&self, options: ReaderOptions) -> Result<RecordReader> {
        let status = self.status().await?;
        if !status.is_terminal() {
            return Err(ClientError::IllegalState {
                instance_id: self.id.clone(),
                operation: "open_reader",
                reason: format!("instance is {status}; output is readable once terminated"),
            });
        }
        let tasks = self.ctx.transport.get_task_results(&self.id).await?;
        if let Some(failed) = tasks.iter().find(|t| t.status.is_failure()) {
            let message = failed.result.clone();
            return Err(self.platform_error(message, Some(&tasks)).await);
        }

        if options.tunnel {
            let download = self
                .ctx
                .tunnel
                .open_download(&self.id, options.limit)
                .await
                .map_err(ClientError::Transport)?;
            return match download {
                Some(stream) => Ok(RecordReader::from_tunnel(self.id.clone(), stream)),
                None => Err(ClientError::NoOutput {
                    instance_id: self.id.clone(),
                }),
            };
        }

        let Some((task, schema)) = tasks
            .iter()
            .find_map(|t| t.schema.as_ref().map(|schema| (t, schema)))
        else {
            return Err(ClientError::NoOutput {
                instance_id: self.id.clone(),
            });
        };
        let records = decode_csv_records(&task.result, schema, options.limit)?;
        debug!(instance_id = %self.id, records = records.len(), "Decoded result reader");
        Ok(RecordReader::from_records(self.id.clone(), schema.clone(), records))
    }

    /// Request termination. Stopping a terminated instance succeeds.
    pub async fn stop(&self) -> Result<()> {
        self.ctx.transport.stop_instance(&self.id).await?;
        info!(instance_id = %self.id, "Stopped instance");
        Ok(())
    }
}

fn summarize(tasks: &[TaskResult]) -> BTreeMap<String, String> {
    tasks
        .iter()
        .map(|t| (t.name.clone(), t.result.clone()))
        .collect()
}
