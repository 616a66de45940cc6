//! Validated builder for [`TcpLogSink`](crate::sink::TcpLogSink).
//!
//! Exposes endpoint selection, queue bounds, timeout tuning, and exponential
//! backoff parameters. Everything is checked before the worker thread is
//! spawned, so a constructed sink never fails at runtime for configuration
//! reasons.

use std::time::Duration;

use thiserror::Error;

use crate::config::{BackoffPolicy, SinkConfig};
use crate::sink::TcpLogSink;

/// Errors that may occur while building a sink.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Invalid user supplied configuration.
    #[error("invalid sink configuration: {0}")]
    InvalidConfig(String),
}

macro_rules! ensure_positive {
    ($value:expr, $field:expr) => {{
        if $value == 0 {
            Err(BuildError::InvalidConfig(format!(
                "{} must be greater than zero",
                $field
            )))
        } else {
            Ok($value)
        }
    }};
}

macro_rules! option_setter {
    ($(#[$meta:meta])* $fn_name:ident, $field:ident, $ty:ty) => {
        $(#[$meta])*
        pub fn $fn_name(mut self, value: $ty) -> Self {
            self.$field = Some(value);
            self
        }
    };
}

/// Overrides for the reconnect backoff timings applied by the sink.
#[derive(Clone, Debug, Default)]
pub struct BackoffOverrides {
    base_ms: Option<u64>,
    cap_ms: Option<u64>,
    reset_after_ms: Option<u64>,
}

impl BackoffOverrides {
    /// Create overrides with no custom values.
    pub fn new() -> Self {
        Self::default()
    }

    option_setter!(
        /// Override the base delay in milliseconds.
        with_base_ms,
        base_ms,
        u64
    );
    option_setter!(
        /// Override the ceiling in milliseconds.
        with_cap_ms,
        cap_ms,
        u64
    );
    option_setter!(
        /// Override the reset-after duration in milliseconds.
        with_reset_after_ms,
        reset_after_ms,
        u64
    );

    fn apply(&self, policy: &mut BackoffPolicy) -> Result<(), BuildError> {
        if let Some(base) = self.base_ms {
            ensure_positive!(base, "backoff_base_ms")?;
            policy.base = Duration::from_millis(base);
        }
        if let Some(cap) = self.cap_ms {
            ensure_positive!(cap, "backoff_cap_ms")?;
            policy.cap = Duration::from_millis(cap);
        }
        if let Some(reset) = self.reset_after_ms {
            ensure_positive!(reset, "backoff_reset_after_ms")?;
            policy.reset_after = Duration::from_millis(reset);
        }
        Ok(())
    }
}

/// Builder for constructing [`TcpLogSink`] instances.
#[derive(Clone, Debug, Default)]
pub struct SinkBuilder {
    host: Option<String>,
    port: Option<u16>,
    queue_capacity: Option<usize>,
    queue_byte_budget: Option<usize>,
    connect_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    max_frame_size: Option<usize>,
    batch_bytes: Option<usize>,
    shutdown_grace_ms: Option<u64>,
    backoff: BackoffOverrides,
}

impl SinkBuilder {
    /// Create a new builder with no endpoint configured.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target collector endpoint. Required.
    pub fn with_endpoint(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = Some(host.into());
        self.port = Some(port);
        self
    }

    option_setter!(
        /// Maximum buffered records before drop-oldest applies.
        with_queue_capacity,
        queue_capacity,
        usize
    );
    option_setter!(
        /// Optional byte budget enforced alongside the record count.
        with_queue_byte_budget,
        queue_byte_budget,
        usize
    );
    option_setter!(
        /// Per-attempt connect timeout in milliseconds.
        with_connect_timeout_ms,
        connect_timeout_ms,
        u64
    );
    option_setter!(
        /// Socket write timeout in milliseconds.
        with_write_timeout_ms,
        write_timeout_ms,
        u64
    );
    option_setter!(
        /// Maximum encoded frame size in bytes.
        with_max_frame_size,
        max_frame_size,
        usize
    );
    option_setter!(
        /// Byte bound for one delivery batch.
        with_batch_bytes,
        batch_bytes,
        usize
    );
    option_setter!(
        /// Grace period for the best-effort shutdown drain, in milliseconds.
        with_shutdown_grace_ms,
        shutdown_grace_ms,
        u64
    );

    /// Apply backoff timing overrides.
    pub fn with_backoff(mut self, overrides: BackoffOverrides) -> Self {
        self.backoff = overrides;
        self
    }

    /// Validate the accumulated options into a [`SinkConfig`].
    pub fn build_config(&self) -> Result<SinkConfig, BuildError> {
        let (Some(host), Some(port)) = (self.host.clone(), self.port) else {
            return Err(BuildError::InvalidConfig(
                "an endpoint (host and port) is required".into(),
            ));
        };

        let mut config = SinkConfig::default().with_endpoint(host, port);
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = ensure_positive!(capacity, "queue_capacity")?;
        }
        if let Some(budget) = self.queue_byte_budget {
            config.queue_byte_budget = Some(ensure_positive!(budget, "queue_byte_budget")?);
        }
        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ensure_positive!(ms, "connect_timeout_ms")?);
        }
        if let Some(ms) = self.write_timeout_ms {
            config.write_timeout = Duration::from_millis(ensure_positive!(ms, "write_timeout_ms")?);
        }
        if let Some(size) = self.max_frame_size {
            config.max_frame_size = ensure_positive!(size, "max_frame_size")?;
        }
        if let Some(bytes) = self.batch_bytes {
            config.batch_bytes = ensure_positive!(bytes, "batch_bytes")?;
        }
        if let Some(ms) = self.shutdown_grace_ms {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        self.backoff.apply(&mut config.backoff)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the sink, spawning its delivery worker.
    pub fn build(&self) -> Result<TcpLogSink, BuildError> {
        Ok(TcpLogSink::new(self.build_config()?))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn builder_requires_endpoint() {
        let err = SinkBuilder::new()
            .build_config()
            .expect_err("endpoint must be required");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("endpoint")));
    }

    #[rstest]
    fn builder_rejects_zero_capacity() {
        let err = SinkBuilder::new()
            .with_endpoint("127.0.0.1", 9020)
            .with_queue_capacity(0)
            .build_config()
            .expect_err("zero capacity must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("queue_capacity")));
    }

    #[rstest]
    fn builder_rejects_zero_backoff_base() {
        let err = SinkBuilder::new()
            .with_endpoint("127.0.0.1", 9020)
            .with_backoff(BackoffOverrides::new().with_base_ms(0))
            .build_config()
            .expect_err("zero base must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("backoff_base_ms")));
    }

    #[rstest]
    fn builder_rejects_cap_below_base() {
        let err = SinkBuilder::new()
            .with_endpoint("127.0.0.1", 9020)
            .with_backoff(BackoffOverrides::new().with_base_ms(500).with_cap_ms(100))
            .build_config()
            .expect_err("cap below base must fail");
        assert!(matches!(err, BuildError::InvalidConfig(msg) if msg.contains("cap")));
    }

    #[rstest]
    fn builder_applies_overrides() {
        let config = SinkBuilder::new()
            .with_endpoint("collector.internal", 6514)
            .with_queue_capacity(256)
            .with_connect_timeout_ms(750)
            .with_backoff(BackoffOverrides::new().with_base_ms(50).with_cap_ms(1_000))
            .build_config()
            .expect("valid config");
        assert_eq!(config.host, "collector.internal");
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.connect_timeout, Duration::from_millis(750));
        assert_eq!(config.backoff.base, Duration::from_millis(50));
        assert_eq!(config.backoff.cap, Duration::from_secs(1));
    }
}
