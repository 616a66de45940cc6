//! Delivery worker thread draining the outbound queue.
//!
//! One worker runs for the lifetime of the sink. All blocking network I/O
//! happens here; producer threads only touch the queue. The worker suspends
//! on the command channel while idle and while waiting out a backoff delay,
//! so shutdown reaches it at every suspension point.

use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};

use crate::config::SinkConfig;
use crate::connection::{ConnectionManager, StateCell};
use crate::queue::{OutboundQueue, QueueEntry};
use crate::stats::SinkStats;

/// Commands processed by the worker thread.
#[derive(Debug)]
pub(crate) enum Command {
    /// New entries are waiting in the queue.
    Wake,
    /// Stop after a best-effort drain; acknowledge when done.
    Shutdown(Sender<()>),
}

/// Command channel depth. Wakes coalesce, so a shallow channel suffices.
const COMMAND_CHANNEL_CAPACITY: usize = 8;

pub(crate) struct WorkerHandles {
    pub tx: Sender<Command>,
    pub join: thread::JoinHandle<()>,
}

pub(crate) fn spawn_worker(
    config: &SinkConfig,
    queue: Arc<OutboundQueue>,
    state: Arc<StateCell>,
    stats: Arc<SinkStats>,
    stop: Arc<AtomicBool>,
) -> WorkerHandles {
    let (tx, rx) = bounded(COMMAND_CHANNEL_CAPACITY);
    let worker = DeliveryWorker {
        rx,
        queue,
        conn: ConnectionManager::new(config, state, stats),
        stop,
        batch_bytes: config.batch_bytes,
        write_retries: config.write_retries,
        shutdown_grace: config.shutdown_grace,
        backoff_until: None,
    };
    let join = thread::Builder::new()
        .name("tcplog-delivery".into())
        .spawn(move || worker.run())
        .unwrap_or_else(|err| panic!("failed to spawn delivery worker: {err}"));
    WorkerHandles { tx, join }
}

struct DeliveryWorker {
    rx: Receiver<Command>,
    queue: Arc<OutboundQueue>,
    conn: ConnectionManager,
    stop: Arc<AtomicBool>,
    batch_bytes: usize,
    write_retries: u32,
    shutdown_grace: Duration,
    /// Earliest instant the next connect attempt is allowed.
    backoff_until: Option<Instant>,
}

impl DeliveryWorker {
    fn run(mut self) {
        loop {
            self.pump();

            let command = match self.backoff_remaining() {
                // Waiting out backoff with work pending: park on the channel
                // so shutdown still reaches us, retry when the delay lapses.
                Some(remaining) => match self.rx.recv_timeout(remaining) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => {
                        self.backoff_until = None;
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                },
                None => self.rx.recv().ok(),
            };

            match command {
                Some(Command::Wake) => {}
                Some(Command::Shutdown(ack)) => {
                    self.final_drain();
                    self.conn.disconnect();
                    let _ = ack.send(());
                    return;
                }
                // Channel closed without a shutdown command; the sink was
                // leaked or panicked. Exit without the grace drain.
                None => {
                    self.conn.disconnect();
                    return;
                }
            }
        }
    }

    /// Remaining backoff wait, when there is queued work to retry for.
    fn backoff_remaining(&mut self) -> Option<Duration> {
        let until = self.backoff_until?;
        if self.queue.is_empty() {
            return None;
        }
        let now = Instant::now();
        if until <= now {
            self.backoff_until = None;
            return None;
        }
        Some(until - now)
    }

    /// Deliver everything currently deliverable.
    ///
    /// Stops when the queue empties, a backoff window opens, or the stop
    /// flag is raised.
    fn pump(&mut self) {
        while !self.stop.load(Ordering::Relaxed) && self.step() {}
    }

    /// Best-effort drain during shutdown, bounded by the grace period.
    ///
    /// Ignores the stop flag; this is the one drain that runs after it.
    /// Waits out backoff windows only while they fit inside the grace
    /// deadline.
    fn final_drain(&mut self) {
        let deadline = Instant::now() + self.shutdown_grace;
        while !self.queue.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            if let Some(until) = self.backoff_until {
                if until >= deadline {
                    return;
                }
                if until > now {
                    thread::sleep(until - now);
                }
                self.backoff_until = None;
            }
            if !self.step() && self.backoff_until.is_none() {
                return;
            }
        }
    }

    /// Connect if needed and deliver one batch.
    ///
    /// Returns `true` when another step may make progress immediately.
    fn step(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        if let Some(until) = self.backoff_until {
            if Instant::now() < until {
                return false;
            }
            self.backoff_until = None;
        }
        if !self.conn.is_connected() {
            if let Err(delay) = self.conn.connect() {
                self.backoff_until = Some(Instant::now() + delay);
                return false;
            }
        }

        let batch = self.queue.next_batch(self.batch_bytes);
        match self.write_batch(&batch) {
            Ok(last_seq) => {
                self.queue.release_through(last_seq);
                self.conn.record_success();
                true
            }
            Err((delivered, err)) => {
                if let Some(seq) = delivered {
                    self.queue.release_through(seq);
                }
                let delay = self.conn.fault(&err);
                self.backoff_until = Some(Instant::now() + delay);
                false
            }
        }
    }

    /// Write a batch sequentially to the active socket.
    ///
    /// Returns the last delivered sequence number, or on fault the prefix
    /// that did make it out (already flushed to the OS buffer) plus the
    /// error. Undelivered entries stay queued for retry after reconnect.
    fn write_batch(&mut self, batch: &[QueueEntry]) -> Result<u64, (Option<u64>, io::Error)> {
        let retries = self.write_retries;
        let Some(stream) = self.conn.writer() else {
            return Err((
                None,
                io::Error::new(io::ErrorKind::NotConnected, "no active connection"),
            ));
        };

        let mut delivered = None;
        for entry in batch {
            if let Err(err) = write_frame(stream, entry.frame.bytes(), retries) {
                return Err((delivered, err));
            }
            delivered = Some(entry.seq);
        }
        if let Err(err) = stream.flush() {
            return Err((delivered, err));
        }
        // Vacuously safe: a batch is never empty.
        delivered.ok_or_else(|| {
            (
                None,
                io::Error::new(io::ErrorKind::InvalidInput, "empty batch"),
            )
        })
    }
}

/// Write one frame, resuming partial writes a bounded number of times.
///
/// A short write consumes one retry; `Interrupted` is resumed for free. Once
/// the budget is spent the frame's remainder is treated as a connection
/// fault.
fn write_frame(stream: &mut std::net::TcpStream, frame: &[u8], retries: u32) -> io::Result<()> {
    let mut written = 0usize;
    let mut attempts = 0u32;
    while written < frame.len() {
        match stream.write(&frame[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket accepted zero bytes",
                ));
            }
            Ok(n) => {
                written += n;
                if written < frame.len() {
                    attempts += 1;
                    if attempts > retries {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "partial write retry budget exhausted",
                        ));
                    }
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(())
}
