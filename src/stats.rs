//! Delivery counters exposed by the sink.
//!
//! Every failure mode in the subsystem degrades to one of these counters
//! rather than surfacing an error to the host application.

use std::sync::atomic::{AtomicU64, Ordering};

/// Shared atomic counters updated by the queue, worker, and connection
/// manager.
#[derive(Debug, Default)]
pub struct SinkStats {
    /// Records discarded by the queue's drop-oldest overflow policy.
    pub(crate) overflow_dropped: AtomicU64,
    /// Records rejected by the encoder (payload over the size limit).
    pub(crate) encode_rejected: AtomicU64,
    /// Failed TCP connect attempts.
    pub(crate) connect_failures: AtomicU64,
    /// Write errors that exhausted the retry budget and faulted the
    /// connection.
    pub(crate) write_faults: AtomicU64,
    /// Frames fully flushed to the OS socket buffer.
    pub(crate) frames_delivered: AtomicU64,
}

impl SinkStats {
    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            overflow_dropped: self.overflow_dropped.load(Ordering::Relaxed),
            encode_rejected: self.encode_rejected.load(Ordering::Relaxed),
            connect_failures: self.connect_failures.load(Ordering::Relaxed),
            write_faults: self.write_faults.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the sink's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub overflow_dropped: u64,
    pub encode_rejected: u64,
    pub connect_failures: u64,
    pub write_faults: u64,
    pub frames_delivered: u64,
}
