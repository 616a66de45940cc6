//! Public sink type exported by the crate.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};
use parking_lot::Mutex;

use crate::config::SinkConfig;
use crate::connection::{ConnectionState, StateCell};
use crate::encoder::Encoder;
use crate::level::Severity;
use crate::queue::OutboundQueue;
use crate::record::{LogRecord, Payload};
use crate::session::{SESSION_END_EVENT, SESSION_START_EVENT, Session};
use crate::stats::{SinkStats, StatsSnapshot};
use crate::warn_limiter::RateLimitedWarner;
use crate::worker::{Command, spawn_worker};

/// Log sink shipping length-prefixed frames to a TCP collector.
///
/// The sink is an explicitly constructed, explicitly owned handle; there is
/// no hidden global. Construction spawns the delivery worker, and
/// [`shutdown`](TcpLogSink::shutdown) (or `Drop`) stops it after a
/// best-effort drain.
///
/// No failure inside the sink ever surfaces to the caller: encoding
/// rejections, overflow drops, and connection faults all degrade to the
/// counters in [`stats`](TcpLogSink::stats). The only observable failure
/// signal is [`flush`](TcpLogSink::flush) returning `false`.
pub struct TcpLogSink {
    encoder: Encoder,
    queue: Arc<OutboundQueue>,
    tx: Option<Sender<Command>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
    state: Arc<StateCell>,
    stats: Arc<SinkStats>,
    warner: RateLimitedWarner,
    session: Mutex<Session>,
    generate_session_ids: bool,
    shutdown_grace: Duration,
}

impl TcpLogSink {
    /// Construct the sink and spawn its delivery worker.
    pub fn new(config: SinkConfig) -> Self {
        let stats = Arc::new(SinkStats::default());
        // Direct construction skips builder validation; a zero capacity
        // would otherwise drop every record on arrival.
        let capacity = config.queue_capacity.max(1);
        let queue = Arc::new(OutboundQueue::new(
            capacity,
            config.queue_byte_budget,
            stats.clone(),
        ));
        let state = Arc::new(StateCell::default());
        let stop = Arc::new(AtomicBool::new(false));
        let handles = spawn_worker(&config, queue.clone(), state.clone(), stats.clone(), stop.clone());
        Self {
            encoder: Encoder::new(config.max_frame_size),
            queue,
            tx: Some(handles.tx),
            handle: Mutex::new(Some(handles.join)),
            stop,
            state,
            stats,
            warner: RateLimitedWarner::new(config.warn_interval),
            session: Mutex::new(Session::default()),
            generate_session_ids: config.generate_session_ids,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Submit a log event. Never blocks beyond the queue mutex.
    pub fn log(&self, severity: Severity, tag: &str, payload: impl Into<Payload>) {
        self.record(LogRecord::new(severity, tag, payload));
    }

    /// Submit a pre-built record.
    pub fn record(&self, record: LogRecord) {
        if self.tx.is_none() {
            self.warner.record_drop();
            self.warner.warn_if_due(|count| {
                log::warn!("tcplog: dropped {count} records after shutdown");
            });
            return;
        }
        match self.encoder.encode(&record) {
            Ok(frame) => {
                let (_seq, dropped) = self.queue.enqueue(frame);
                for _ in 0..dropped {
                    self.warner.record_drop();
                }
                if dropped > 0 {
                    self.warner.warn_if_due(|count| {
                        log::warn!("tcplog: queue full; dropped {count} oldest records");
                    });
                }
                self.wake();
            }
            Err(err) => {
                self.stats.encode_rejected.fetch_add(1, Ordering::Relaxed);
                self.warner.record_drop();
                self.warner.warn_if_due(|count| {
                    log::warn!("tcplog: dropped {count} records; latest encode error: {err}");
                });
            }
        }
    }

    /// Record an analytics-style event with named attributes.
    ///
    /// While a session is active the event is stamped with the session and
    /// user ids. Without one the event still ships, with a warning, since a
    /// log sink has no business silently discarding records.
    pub fn record_event<K, V>(&self, name: &str, attributes: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: BTreeMap<String, String> = attributes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        {
            let session = self.session.lock();
            if !session.is_active() {
                log::warn!("tcplog: record_event {name:?} called before start_session");
            }
            session.stamp(&mut fields);
        }
        self.record(LogRecord::new(Severity::Info, name, fields));
    }

    /// Start a telemetry session and emit the `Session.Start` event.
    ///
    /// An already-active session is ended first, mirroring a restart.
    pub fn start_session<K, V>(&self, attributes: impl IntoIterator<Item = (K, V)>)
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut fields: BTreeMap<String, String> = attributes
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let end_fields = {
            let mut session = self.session.lock();
            let end_fields = session.is_active().then(|| {
                let mut ended = BTreeMap::new();
                session.stamp(&mut ended);
                session.end();
                ended
            });
            session.start(self.generate_session_ids);
            session.stamp(&mut fields);
            end_fields
        };
        if let Some(ended) = end_fields {
            self.record(LogRecord::new(Severity::Info, SESSION_END_EVENT, ended));
        }
        self.record(LogRecord::new(Severity::Info, SESSION_START_EVENT, fields));
    }

    /// End the active session and emit the `Session.End` event.
    pub fn end_session(&self) {
        let fields = {
            let mut session = self.session.lock();
            if !session.is_active() {
                return;
            }
            let mut fields = BTreeMap::new();
            session.stamp(&mut fields);
            session.end();
            fields
        };
        self.record(LogRecord::new(Severity::Info, SESSION_END_EVENT, fields));
    }

    /// Set the user id for subsequent sessions. Ignored while a session is
    /// active.
    pub fn set_user_id(&self, id: impl Into<String>) -> bool {
        self.session.lock().set_user_id(id.into())
    }

    /// Set the session id used by the next `start_session`. Ignored while a
    /// session is active.
    pub fn set_session_id(&self, id: impl Into<String>) -> bool {
        self.session.lock().set_session_id(id.into())
    }

    /// Snapshot of the current session descriptor.
    pub fn session(&self) -> Session {
        self.session.lock().clone()
    }

    /// Block until the queue drains or `timeout` elapses.
    ///
    /// Returns `true` when every buffered frame was flushed to the socket in
    /// time. Returns `false` on timeout or after shutdown; either way the
    /// queue contents are untouched by the wait itself.
    pub fn flush(&self, timeout: Duration) -> bool {
        if self.tx.is_none() {
            return false;
        }
        self.warner.flush(|count| {
            log::warn!("tcplog: dropped {count} records in the last interval");
        });
        self.wake();
        self.queue.wait_empty(timeout)
    }

    /// Stop the sink: best-effort drain within the grace period, then
    /// release the socket and join the worker. Idempotent.
    pub fn shutdown(&mut self) {
        if self.tx.is_some() {
            self.end_session();
        }
        let Some(tx) = self.tx.take() else {
            return;
        };
        self.stop.store(true, Ordering::Relaxed);
        let (ack_tx, ack_rx) = bounded(1);
        if tx.send(Command::Shutdown(ack_tx)).is_ok() {
            // Margin on top of the worker's own grace deadline.
            let _ = ack_rx.recv_timeout(self.shutdown_grace + Duration::from_secs(1));
        }
        drop(tx);
        self.join_worker();
    }

    /// Non-blocking view of the connection manager's state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.load()
    }

    /// Point-in-time copy of the delivery counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Records currently buffered.
    pub fn queued_records(&self) -> usize {
        self.queue.len()
    }

    fn wake(&self) {
        if let Some(tx) = &self.tx {
            // A full channel means the worker is already awake.
            let _ = tx.try_send(Command::Wake);
        }
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        if handle.join().is_err() {
            log::warn!("tcplog: delivery worker thread panicked");
        }
    }
}

impl Drop for TcpLogSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for TcpLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpLogSink")
            .field("state", &self.state.load())
            .field("queued", &self.queue.len())
            .finish()
    }
}
