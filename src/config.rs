//! Client configuration.
//!
//! Everything the client needs is passed explicitly into
//! [`crate::Client::new`]; there is no process-wide default.

use std::time::Duration;
use tokio_retry2::strategy::ExponentialFactorBackoff;

use crate::error::{ClientError, Result};

pub const ENV_ENDPOINT: &str = "ODPS_ENDPOINT";
pub const ENV_PROJECT: &str = "ODPS_PROJECT";
pub const ENV_ACCESS_ID: &str = "ODPS_ACCESS_ID";
pub const ENV_SECRET_ACCESS_KEY: &str = "ODPS_SECRET_ACCESS_KEY";
pub const ENV_LOGVIEW_HOST: &str = "ODPS_LOGVIEW_HOST";

const DEFAULT_LOGVIEW_HOST: &str = "http://logview.odps.aliyun.com";
const DEFAULT_LOGVIEW_HOURS: u32 = 24 * 30;

/// Connection and behavior settings for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the platform API.
    pub endpoint: String,
    /// Project all sessions and statements run under.
    pub project: String,
    pub access_id: String,
    pub secret_access_key: String,
    /// Host used to build logview addresses.
    pub logview_host: String,
    /// Validity of logview tokens, in hours.
    pub logview_hours: u32,
    /// Status polling behavior for waits.
    pub poll: PollOptions,
    /// Retry behavior for idempotent transport calls.
    pub retry: RetryOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://service.odps.aliyun.com/api".to_string(),
            project: String::new(),
            access_id: String::new(),
            secret_access_key: String::new(),
            logview_host: DEFAULT_LOGVIEW_HOST.to_string(),
            logview_hours: DEFAULT_LOGVIEW_HOURS,
            poll: PollOptions::default(),
            retry: RetryOptions::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            project: project.into(),
            ..Default::default()
        }
    }

    /// Build a config from `ODPS_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            config.endpoint = endpoint;
        }
        if let Ok(project) = std::env::var(ENV_PROJECT) {
            config.project = project;
        }
        if let Ok(access_id) = std::env::var(ENV_ACCESS_ID) {
            config.access_id = access_id;
        }
        if let Ok(secret) = std::env::var(ENV_SECRET_ACCESS_KEY) {
            config.secret_access_key = secret;
        }
        if let Ok(host) = std::env::var(ENV_LOGVIEW_HOST) {
            config.logview_host = host;
        }
        config
    }

    pub fn with_poll(mut self, poll: PollOptions) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_retry(mut self, retry: RetryOptions) -> Self {
        self.retry = retry;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(ClientError::Config("endpoint must not be empty".to_string()));
        }
        if self.project.trim().is_empty() {
            return Err(ClientError::Config("project must not be empty".to_string()));
        }
        if self.logview_hours == 0 {
            return Err(ClientError::Config("logview_hours must be positive".to_string()));
        }
        self.poll.validate()?;
        self.retry.validate()
    }
}

/// Status polling behavior.
///
/// The sleep between fetches starts at `interval` and grows by
/// `backoff_factor` up to `max_interval`. Status is fetched fresh on every
/// iteration.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub max_interval: Duration,
    pub backoff_factor: f64,
    /// Upper bound on a single wait. `None` waits until a terminal state or
    /// cancellation.
    pub timeout: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(5),
            backoff_factor: 1.5,
            timeout: None,
        }
    }
}

impl PollOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Delay to sleep after `current`.
    ///
    /// Never exceeds `max_interval`, even when the product overflows.
    pub fn next_interval(&self, current: Duration) -> Duration {
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff_factor)
            .map_or(self.max_interval, |next| next.min(self.max_interval))
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ClientError::Config("poll interval must be positive".to_string()));
        }
        if self.max_interval < self.interval {
            return Err(ClientError::Config(
                "poll max_interval must not be below interval".to_string(),
            ));
        }
        if !(self.backoff_factor >= 1.0 && self.backoff_factor.is_finite()) {
            return Err(ClientError::Config(format!(
                "poll backoff_factor must be a finite value >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Retry behavior for transient transport failures.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    pub initial_backoff: Duration,
    pub factor: f64,
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: usize,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(200),
            factor: 2.0,
            max_retries: 3,
        }
    }
}

impl RetryOptions {
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    pub(crate) fn strategy(&self) -> impl Iterator<Item = Duration> {
        let initial_ms = u64::try_from(self.initial_backoff.as_millis()).unwrap_or(u64::MAX);
        ExponentialFactorBackoff::from_millis(initial_ms.max(1), self.factor).take(self.max_retries)
    }

    fn validate(&self) -> Result<()> {
        if !(self.factor >= 1.0 && self.factor.is_finite()) {
            return Err(ClientError::Config(format!(
                "retry factor must be a finite value >= 1.0, got {}",
                self.factor
            )));
        }
        Ok(())
    }
}
