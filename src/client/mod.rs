use std::sync::Arc;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::instance::Instance;
use crate::session::{Session, SessionOptions};
use crate::transport::{InstrumentedTransport, RetryingTransport, SessionSpec, Transport};
use crate::tunnel::TunnelService;

/// State shared by a client and every handle it creates.
pub(crate) struct ClientContext {
    pub(crate) config: ClientConfig,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) tunnel: Arc<dyn TunnelService>,
}

/// Entry point for creating and attaching to sessions.
///
/// The client talks to the platform exclusively through the supplied
/// [`Transport`] and [`TunnelService`]. Transport calls are logged and
/// idempotent ones are retried according to [`ClientConfig::retry`].
#[derive(Clone)]
pub struct Client {
    ctx: Arc<ClientContext>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.ctx.config.endpoint)
            .field("project", &self.ctx.config.project)
            .finish()
    }
}

impl Client {
    /// Create a client bound to a transport and a tunnel service.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        tunnel: Arc<dyn TunnelService>,
    ) -> Result<Self> {
        config.validate()?;
        let instrumented: Arc<dyn Transport> = Arc::new(InstrumentedTransport::new(transport));
        let transport: Arc<dyn Transport> =
            Arc::new(RetryingTransport::new(instrumented, config.retry.clone()));
        Ok(Self {
            ctx: Arc::new(ClientContext {
                config,
                transport,
                tunnel,
            }),
        })
    }

    /// Create a client over a platform that serves both roles.
    pub fn with_platform<P>(config: ClientConfig, platform: Arc<P>) -> Result<Self>
    where
        P: Transport + TunnelService + 'static,
    {
        Self::new(config, platform.clone(), platform)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.ctx.config
    }

    /// Request a new session with `workers` reserved workers of
    /// `worker_memory_mb` each. Returns as soon as the platform accepts the
    /// request; the session reaches `Running` asynchronously.
    pub async fn create_session(&self, workers: u32, worker_memory_mb: u32) -> Result<Session> {
        self.create_session_with(SessionOptions::new(workers, worker_memory_mb))
            .await
    }

    pub async fn create_session_with(&self, options: SessionOptions) -> Result<Session> {
        if options.workers == 0 {
            return Err(ClientError::Config("session workers must be positive".to_string()));
        }
        if options.worker_memory_mb == 0 {
            return Err(ClientError::Config(
                "session worker memory must be positive".to_string(),
            ));
        }
        if let Some(name) = &options.name {
            if name.trim().is_empty() {
                return Err(ClientError::Config("session name must not be empty".to_string()));
            }
            if self.ctx.transport.find_session(name).await?.is_some() {
                return Err(ClientError::IllegalState {
                    instance_id: String::new(),
                    operation: "create_session",
                    reason: format!("a live session named {name} already exists"),
                });
            }
        }

        let spec = SessionSpec {
            name: options.name,
            workers: options.workers,
            worker_memory_mb: options.worker_memory_mb,
            hints: options.hints,
        };
        let record = self.ctx.transport.create_session(&spec).await?;
        let session = Session::from_record(record, self.ctx.clone())?;
        info!(
            instance_id = %session.id(),
            session_name = %session.name(),
            workers = session.workers(),
            worker_memory_mb = session.worker_memory_mb(),
            "Created session"
        );
        Ok(session)
    }

    /// Attach to a live session by name. The returned handle behaves like
    /// the one returned by [`Client::create_session`].
    pub async fn attach_session(&self, name: &str) -> Result<Session> {
        let record = self
            .ctx
            .transport
            .find_session(name)
            .await?
            .filter(|record| !record.status.is_terminal())
            .ok_or_else(|| ClientError::NotFound {
                kind: "session",
                name: name.to_string(),
            })?;
        let session = Session::from_record(record, self.ctx.clone())?;
        info!(instance_id = %session.id(), session_name = %name, "Attached to session");
        Ok(session)
    }

    /// Handle for an existing instance.
    pub async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let instance = Instance::new(instance_id, self.ctx.clone());
        instance.fetch().await?;
        Ok(instance)
    }
}
