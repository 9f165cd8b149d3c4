use crate::queue::client::MAX_DELETE_BATCH_SIZE;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::time::Duration;

const DEFAULT_MAX_BATCH_SIZE: usize = MAX_DELETE_BATCH_SIZE;
const DEFAULT_BATCH_TIMEOUT_SECS: u64 = 3;
const DEFAULT_CHANNEL_CAPACITY: usize = 1;

/// Upper bound for every duration setting; keeps deadline arithmetic in range.
pub const MAX_DURATION_SETTING: Duration = Duration::from_secs(24 * 60 * 60);

/// Runtime configuration for the consumer pipeline.
///
/// All instances must be constructed via [`WorkerConfig::builder`] or [`WorkerConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    queue_url: String,
    max_batch_size: usize,
    batch_timeout: Duration,
    max_concurrent_handlers: Option<usize>,
    channel_capacity: usize,
    receive_error_backoff: Duration,
    metrics_interval: Duration,
}

pub struct WorkerConfigParams {
    pub queue_url: String,
    pub max_batch_size: usize,
    pub batch_timeout: Duration,
    pub max_concurrent_handlers: Option<usize>,
    pub channel_capacity: usize,
    pub receive_error_backoff: Duration,
    pub metrics_interval: Duration,
}

impl WorkerConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    ///
    /// Prefer [`WorkerConfig::builder`] when most values use defaults.
    pub fn new(params: WorkerConfigParams) -> Result<Self> {
        let WorkerConfigParams {
            queue_url,
            max_batch_size,
            batch_timeout,
            max_concurrent_handlers,
            channel_capacity,
            receive_error_backoff,
            metrics_interval,
        } = params;

        let config = Self {
            queue_url: queue_url.trim().to_owned(),
            max_batch_size,
            batch_timeout,
            max_concurrent_handlers,
            channel_capacity,
            receive_error_backoff,
            metrics_interval,
        };

        config.validate()?;
        Ok(config)
    }

    /// Identifier of the queue the pipeline consumes.
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Batch size that triggers an immediate flush.
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Longest a batch waits after its first message before it is flushed.
    pub fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    /// Upper bound on simultaneously running handlers; `None` means unbounded.
    pub fn max_concurrent_handlers(&self) -> Option<usize> {
        self.max_concurrent_handlers
    }

    /// Buffer size of the unprocessed and processed streams.
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Pause applied after a failed receive. Zero retries immediately.
    pub fn receive_error_backoff(&self) -> Duration {
        self.receive_error_backoff
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.queue_url.trim().is_empty() {
            bail!("queue_url cannot be empty");
        }

        if self.max_batch_size == 0 || self.max_batch_size > MAX_DELETE_BATCH_SIZE {
            bail!(
                "max_batch_size must be between 1 and {MAX_DELETE_BATCH_SIZE}, got {}",
                self.max_batch_size
            );
        }

        if self.batch_timeout.is_zero() {
            bail!("batch_timeout must be greater than 0");
        }

        for (name, value) in [
            ("batch_timeout", self.batch_timeout),
            ("receive_error_backoff", self.receive_error_backoff),
            ("metrics_interval", self.metrics_interval),
        ] {
            if value > MAX_DURATION_SETTING {
                bail!("{name} must be at most {MAX_DURATION_SETTING:?}, got {value:?}");
            }
        }

        if self.max_concurrent_handlers == Some(0) {
            bail!("max_concurrent_handlers must be greater than 0 when set");
        }

        if self.channel_capacity == 0 {
            bail!("channel_capacity must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerConfigBuilder {
    queue_url: Option<String>,
    max_batch_size: Option<usize>,
    batch_timeout: Option<Duration>,
    max_concurrent_handlers: Option<usize>,
    channel_capacity: Option<usize>,
    receive_error_backoff: Option<Duration>,
    metrics_interval: Option<Duration>,
}

impl WorkerConfigBuilder {
    pub fn queue_url(mut self, url: impl Into<String>) -> Self {
        self.queue_url = Some(url.into());
        self
    }

    pub fn max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = Some(size);
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = Some(timeout);
        self
    }

    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = Some(limit);
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = Some(capacity);
        self
    }

    pub fn receive_error_backoff(mut self, backoff: Duration) -> Self {
        self.receive_error_backoff = Some(backoff);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<WorkerConfig> {
        let params = WorkerConfigParams {
            queue_url: self.queue_url.context("queue_url is required")?,
            max_batch_size: self.max_batch_size.unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            batch_timeout: self
                .batch_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_BATCH_TIMEOUT_SECS)),
            max_concurrent_handlers: self.max_concurrent_handlers,
            channel_capacity: self.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY),
            receive_error_backoff: self.receive_error_backoff.unwrap_or(Duration::ZERO),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
        };

        WorkerConfig::new(params)
    }
}
