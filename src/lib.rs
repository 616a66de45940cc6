//! Resilient TCP log shipping sink.
//!
//! `tcplog` delivers structured log records to a remote TCP collector as
//! length-prefixed binary frames. Records are encoded on the caller's
//! thread, buffered in a bounded drop-oldest queue, and drained by a single
//! background worker that owns all network I/O. The connection self-heals
//! with jittered exponential backoff; entries leave the queue only once they
//! are flushed to the OS socket buffer, giving at-least-once delivery with
//! loss possible only through the explicit overflow policy.
//!
//! ```no_run
//! use std::time::Duration;
//! use tcplog::{Severity, SinkBuilder};
//!
//! let mut sink = SinkBuilder::new()
//!     .with_endpoint("collector.internal", 6514)
//!     .with_queue_capacity(4096)
//!     .build()
//!     .expect("valid sink configuration");
//!
//! sink.log(Severity::Info, "startup", "engine initialised");
//! sink.flush(Duration::from_secs(1));
//! sink.shutdown();
//! ```

mod backoff;
mod builder;
mod config;
mod connection;
mod encoder;
mod level;
mod queue;
mod record;
mod session;
mod sink;
mod stats;
mod warn_limiter;
mod worker;

pub use builder::{BackoffOverrides, BuildError, SinkBuilder};
pub use config::{BackoffPolicy, SinkConfig};
pub use connection::ConnectionState;
pub use encoder::{EncodeError, EncodedFrame, Encoder};
pub use level::Severity;
pub use record::{LogRecord, Payload};
pub use session::{SESSION_END_EVENT, SESSION_START_EVENT, Session};
pub use sink::TcpLogSink;
pub use stats::StatsSnapshot;
