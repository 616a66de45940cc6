//! Configuration consumed by the sink lifecycle.
//!
//! The host application's settings layer produces a [`SinkConfig`] (directly,
//! through [`SinkBuilder`](crate::builder::SinkBuilder), or from string
//! key/value pairs) and hands it to
//! [`TcpLogSink::new`](crate::sink::TcpLogSink::new); nothing else crosses
//! that boundary.

use std::time::Duration;

use crate::builder::BuildError;
use crate::warn_limiter::DEFAULT_WARN_INTERVAL;

/// Default bounded queue capacity in records.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default per-attempt connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default write timeout applied to socket writes.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
/// Default maximum encoded frame size in bytes.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1 << 20; // 1 MiB
/// Default byte bound for a single delivery batch.
pub const DEFAULT_BATCH_BYTES: usize = 64 * 1024;
/// Default partial-write retry budget before a write faults the connection.
pub const DEFAULT_WRITE_RETRIES: u32 = 3;
/// Default base delay for exponential reconnect backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Default ceiling for exponential reconnect backoff.
pub const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(10);
/// Default duration of healthy delivery that resets backoff state.
pub const DEFAULT_BACKOFF_RESET: Duration = Duration::from_secs(30);
/// Default grace period for the best-effort drain during shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Configuration describing how to construct a
/// [`TcpLogSink`](crate::sink::TcpLogSink).
#[derive(Clone, Debug)]
pub struct SinkConfig {
    /// Collector hostname or IP address.
    pub host: String,
    /// Collector TCP port.
    pub port: u16,
    /// Maximum buffered records before drop-oldest kicks in.
    pub queue_capacity: usize,
    /// Optional byte budget for the queue, enforced alongside the record
    /// count.
    pub queue_byte_budget: Option<usize>,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Socket write timeout.
    pub write_timeout: Duration,
    /// Maximum encoded frame size; larger records are rejected at encode
    /// time.
    pub max_frame_size: usize,
    /// Byte bound for one delivery batch.
    pub batch_bytes: usize,
    /// Partial-write retries against the same socket before it faults.
    pub write_retries: u32,
    /// Reconnect backoff policy.
    pub backoff: BackoffPolicy,
    /// Interval between rate-limited drop warnings.
    pub warn_interval: Duration,
    /// Grace period for the best-effort drain during shutdown.
    pub shutdown_grace: Duration,
    /// Generate a session id when `start_session` is called without one.
    pub generate_session_ids: bool,
}

/// Defaults favour local development; production callers override the
/// endpoint through the builder or [`SinkConfig::from_key_values`].
impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 9020,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            queue_byte_budget: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            batch_bytes: DEFAULT_BATCH_BYTES,
            write_retries: DEFAULT_WRITE_RETRIES,
            backoff: BackoffPolicy::default(),
            warn_interval: DEFAULT_WARN_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            generate_session_ids: true,
        }
    }
}

impl SinkConfig {
    /// Override the collector endpoint.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Override the queue capacity in records.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Override the backoff ceiling.
    pub fn with_max_backoff(mut self, cap: Duration) -> Self {
        self.backoff.cap = cap;
        self
    }

    /// Build a configuration from the string key/value pairs a host
    /// settings layer supplies.
    ///
    /// Recognised keys: `host`, `port`, `queue_capacity`, `max_backoff_ms`,
    /// `connect_timeout_ms`. Unknown keys are ignored with a warning so a
    /// newer settings surface does not break an older sink.
    pub fn from_key_values<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, BuildError> {
        let mut config = Self::default();
        for (key, value) in pairs {
            match key {
                "host" => config.host = value.to_owned(),
                "port" => {
                    config.port = value.parse().map_err(|_| {
                        BuildError::InvalidConfig(format!("invalid port number: {value:?}"))
                    })?;
                }
                "queue_capacity" => {
                    config.queue_capacity = value.parse().map_err(|_| {
                        BuildError::InvalidConfig(format!("invalid queue_capacity: {value:?}"))
                    })?;
                }
                "max_backoff_ms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        BuildError::InvalidConfig(format!("invalid max_backoff_ms: {value:?}"))
                    })?;
                    config.backoff.cap = Duration::from_millis(ms);
                }
                "connect_timeout_ms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        BuildError::InvalidConfig(format!("invalid connect_timeout_ms: {value:?}"))
                    })?;
                    config.connect_timeout = Duration::from_millis(ms);
                }
                other => log::warn!("tcplog: ignoring unrecognised config key {other:?}"),
            }
        }
        // A ceiling below the default base is still a valid request.
        if config.backoff.cap < config.backoff.base {
            config.backoff.base = config.backoff.cap;
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the runtime cannot honour.
    pub(crate) fn validate(&self) -> Result<(), BuildError> {
        if self.host.is_empty() {
            return Err(BuildError::InvalidConfig("host must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(BuildError::InvalidConfig(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(BuildError::InvalidConfig(
                "max_frame_size must fit a u32 length prefix".into(),
            ));
        }
        if self.backoff.base.is_zero() || self.backoff.cap < self.backoff.base {
            return Err(BuildError::InvalidConfig(
                "backoff cap must be at least the base delay".into(),
            ));
        }
        Ok(())
    }
}

/// Exponential backoff policy for reconnection attempts.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    /// First delay after a failure.
    pub base: Duration,
    /// Ceiling the doubling never exceeds.
    pub cap: Duration,
    /// Sustained healthy delivery for this long resets the delay to `base`.
    pub reset_after: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: DEFAULT_BACKOFF_BASE,
            cap: DEFAULT_BACKOFF_CAP,
            reset_after: DEFAULT_BACKOFF_RESET,
        }
    }
}
