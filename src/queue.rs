//! Bounded outbound queue of encoded frames.
//!
//! Producers enqueue from any thread; the delivery worker is the only
//! consumer. Entries stay queued until the worker confirms they were flushed
//! to the OS socket buffer, so a connection fault never loses them. The only
//! loss channel is the drop-oldest overflow policy, which never blocks the
//! caller.
//!
//! A single mutex guards the deque; enqueue and dequeue hold it only for the
//! structural mutation. The condvar lets `flush` callers park until the
//! queue drains.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::encoder::EncodedFrame;
use crate::stats::SinkStats;

/// A frame plus the sequence number assigned at enqueue.
///
/// Sequence numbers are strictly increasing for the process lifetime and let
/// a collector that deduplicates distinguish retransmitted frames after a
/// reconnect.
#[derive(Clone, Debug)]
pub(crate) struct QueueEntry {
    pub seq: u64,
    pub frame: EncodedFrame,
}

struct Inner {
    entries: VecDeque<QueueEntry>,
    bytes: usize,
    next_seq: u64,
}

pub(crate) struct OutboundQueue {
    inner: Mutex<Inner>,
    drained: Condvar,
    max_records: usize,
    max_bytes: Option<usize>,
    stats: Arc<SinkStats>,
}

impl OutboundQueue {
    pub fn new(max_records: usize, max_bytes: Option<usize>, stats: Arc<SinkStats>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: VecDeque::with_capacity(max_records.min(1024)),
                bytes: 0,
                next_seq: 0,
            }),
            drained: Condvar::new(),
            max_records,
            max_bytes,
            stats,
        }
    }

    /// Append a frame, assigning the next sequence number.
    ///
    /// Returns the assigned sequence number and how many oldest-unsent
    /// entries the overflow policy discarded to make room.
    pub fn enqueue(&self, frame: EncodedFrame) -> (u64, u64) {
        let mut inner = self.inner.lock();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.bytes += frame.len();
        inner.entries.push_back(QueueEntry { seq, frame });

        let mut dropped = 0u64;
        while self.over_capacity(&inner) {
            let Some(oldest) = inner.entries.pop_front() else {
                break;
            };
            inner.bytes -= oldest.frame.len();
            dropped += 1;
        }
        if dropped > 0 {
            self.stats
                .overflow_dropped
                .fetch_add(dropped, Ordering::Relaxed);
        }
        (seq, dropped)
    }

    fn over_capacity(&self, inner: &Inner) -> bool {
        inner.entries.len() > self.max_records
            || self.max_bytes.is_some_and(|limit| inner.bytes > limit)
    }

    /// Clone an in-order prefix without removing it, bounded by `max_bytes`.
    ///
    /// Always yields at least one entry when the queue is non-empty, so a
    /// frame larger than the batch budget still ships alone.
    pub fn next_batch(&self, max_bytes: usize) -> Vec<QueueEntry> {
        let inner = self.inner.lock();
        let mut batch = Vec::new();
        let mut bytes = 0usize;
        for entry in &inner.entries {
            if !batch.is_empty() && bytes + entry.frame.len() > max_bytes {
                break;
            }
            bytes += entry.frame.len();
            batch.push(entry.clone());
        }
        batch
    }

    /// Remove the delivered prefix, everything with a sequence number at or
    /// below `seq`.
    ///
    /// Entries the overflow policy already discarded are skipped silently;
    /// retransmit bookkeeping never double-counts them.
    pub fn release_through(&self, seq: u64) {
        let inner = &mut *self.inner.lock();
        let mut released = 0u64;
        while let Some(front) = inner.entries.front()
            && front.seq <= seq
        {
            let len = front.frame.len();
            inner.entries.pop_front();
            inner.bytes -= len;
            released += 1;
        }
        if released > 0 {
            self.stats
                .frames_delivered
                .fetch_add(released, Ordering::Relaxed);
        }
        if inner.entries.is_empty() {
            self.drained.notify_all();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Block until the queue drains or `timeout` elapses.
    ///
    /// Returns `true` when the queue is empty at return. The queue contents
    /// are never touched by waiting.
    pub fn wait_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while !inner.entries.is_empty() {
            if self.drained.wait_until(&mut inner, deadline).timed_out() {
                return inner.entries.is_empty();
            }
        }
        true
    }
}
