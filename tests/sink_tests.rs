//! End-to-end tests for the TCP log sink against ephemeral collectors.

use std::collections::BTreeMap;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};

use tcplog::{
    BackoffOverrides, ConnectionState, SESSION_END_EVENT, SESSION_START_EVENT, Severity,
    SinkBuilder, TcpLogSink,
};

#[fixture]
fn tcp_listener() -> TcpListener {
    TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral listener")
}

/// One decoded wire frame.
#[derive(Debug)]
struct Frame {
    severity: u8,
    timestamp_ms: u64,
    tag: String,
    payload: Vec<u8>,
}

impl Frame {
    fn text(&self) -> &str {
        std::str::from_utf8(&self.payload).expect("utf-8 payload")
    }

    fn fields(&self) -> BTreeMap<String, String> {
        rmp_serde::from_slice(&self.payload).expect("messagepack payload")
    }
}

fn read_frame(stream: &mut TcpStream) -> Option<Frame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).ok()?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).ok()?;

    let severity = body[0];
    let timestamp_ms = u64::from_be_bytes(body[1..9].try_into().unwrap());
    let tag_len = u16::from_be_bytes(body[9..11].try_into().unwrap()) as usize;
    let tag = String::from_utf8(body[11..11 + tag_len].to_vec()).expect("utf-8 tag");
    let payload_start = 11 + tag_len + 4;
    Some(Frame {
        severity,
        timestamp_ms,
        tag,
        payload: body[payload_start..].to_vec(),
    })
}

/// Accept one connection and forward every frame it carries.
fn spawn_frame_server(
    listener: TcpListener,
    gate: Option<Arc<Barrier>>,
) -> (SocketAddr, mpsc::Receiver<Frame>) {
    let addr = listener.local_addr().expect("listener has address");
    let (notify_tx, notify_rx) = mpsc::channel();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept connection");
        if let Some(barrier) = gate {
            barrier.wait();
        }
        while let Some(frame) = read_frame(&mut stream) {
            if notify_tx.send(frame).is_err() {
                return;
            }
        }
    });
    (addr, notify_rx)
}

fn build_sink(addr: SocketAddr) -> TcpLogSink {
    SinkBuilder::new()
        .with_endpoint(addr.ip().to_string(), addr.port())
        .with_connect_timeout_ms(500)
        .with_backoff(BackoffOverrides::new().with_base_ms(20).with_cap_ms(60))
        .build()
        .expect("build sink")
}

fn recv_frame(rx: &mpsc::Receiver<Frame>, expectation: &str) -> Frame {
    rx.recv_timeout(Duration::from_secs(2)).expect(expectation)
}

#[rstest]
fn delivers_records_in_enqueue_order(tcp_listener: TcpListener) {
    let (addr, frames) = spawn_frame_server(tcp_listener, None);
    let mut sink = build_sink(addr);
    for i in 0..50 {
        sink.log(Severity::Info, "order", format!("record-{i}"));
    }

    for i in 0..50 {
        let frame = recv_frame(&frames, "frame received");
        assert_eq!(frame.tag, "order");
        assert_eq!(frame.text(), format!("record-{i}"));
        assert_eq!(frame.severity, Severity::Info.code());
    }
    sink.shutdown();
}

#[rstest]
fn wire_timestamp_is_plausible(tcp_listener: TcpListener) {
    let (addr, frames) = spawn_frame_server(tcp_listener, None);
    let before = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64;
    let mut sink = build_sink(addr);
    sink.log(Severity::Error, "clock", "tick");

    let frame = recv_frame(&frames, "frame received");
    assert!(frame.timestamp_ms >= before);
    assert_eq!(frame.severity, Severity::Error.code());
    sink.shutdown();
}

/// The end-to-end overflow scenario: capacity 3, five records enqueued with
/// no collector listening. The oldest two are dropped; the survivors arrive
/// in order once a collector appears.
#[rstest]
fn overflow_drops_oldest_then_delivers_survivors() {
    // Reserve a port with nothing listening on it.
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        listener.local_addr().expect("listener addr")
    };

    let mut sink = SinkBuilder::new()
        .with_endpoint(addr.ip().to_string(), addr.port())
        .with_queue_capacity(3)
        .with_connect_timeout_ms(200)
        .with_backoff(BackoffOverrides::new().with_base_ms(20).with_cap_ms(40))
        .build()
        .expect("build sink");

    for text in ["A", "B", "C", "D", "E"] {
        sink.log(Severity::Info, "overflow", text);
    }

    // Give the worker time to fail a connect attempt or two.
    thread::sleep(Duration::from_millis(100));
    assert_eq!(sink.queued_records(), 3);
    assert_eq!(sink.stats().overflow_dropped, 2);
    assert!(sink.stats().connect_failures >= 1);

    // Now stand the collector up on the same port.
    let listener = TcpListener::bind(addr).expect("rebind reserved port");
    let (_, frames) = spawn_frame_server(listener, None);

    for expected in ["C", "D", "E"] {
        let frame = recv_frame(&frames, "survivor delivered after connect");
        assert_eq!(frame.text(), expected);
    }
    assert!(sink.flush(Duration::from_secs(2)));
    assert_eq!(sink.stats().overflow_dropped, 2);
    sink.shutdown();
}

/// Entries resident at the moment the connection dies are delivered after
/// the sink reconnects.
#[rstest]
fn redelivers_after_connection_loss(tcp_listener: TcpListener) {
    let addr = tcp_listener.local_addr().expect("listener addr");
    let (frames_tx, frames) = mpsc::channel();
    let (dropped_tx, dropped_rx) = mpsc::channel();
    thread::spawn(move || {
        // First connection: read one frame, then hang up with the second
        // frame still unread so the close turns into a reset rather than a
        // clean FIN. The client's next write then fails promptly.
        let (mut stream, _) = tcp_listener.accept().expect("accept first");
        let frame = read_frame(&mut stream).expect("first frame");
        frames_tx.send(frame).expect("forward first frame");
        thread::sleep(Duration::from_millis(50));
        drop(stream);
        dropped_tx.send(()).expect("signal drop");

        // Second connection: forward everything.
        let (mut stream, _) = tcp_listener.accept().expect("accept second");
        while let Some(frame) = read_frame(&mut stream) {
            if frames_tx.send(frame).is_err() {
                return;
            }
        }
    });

    let mut sink = build_sink(addr);
    sink.log(Severity::Info, "loss", "before");
    // The straddler sits unread in the server's buffer when it closes.
    sink.log(Severity::Info, "loss", "straddler");
    assert_eq!(recv_frame(&frames, "frame before loss").text(), "before");

    dropped_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("server dropped connection");
    // Let the reset reach our socket before the next write.
    thread::sleep(Duration::from_millis(100));

    sink.log(Severity::Info, "loss", "after");
    // The straddler may or may not have reached the OS buffer before the
    // reset; if it was retained it must be redelivered ahead of "after".
    let frame = recv_frame(&frames, "frame after reconnect");
    if frame.text() == "straddler" {
        assert_eq!(recv_frame(&frames, "frame after straddler").text(), "after");
    } else {
        assert_eq!(frame.text(), "after");
    }
    assert!(sink.stats().write_faults >= 1);
    sink.shutdown();
}

#[rstest]
fn flush_times_out_without_a_collector() {
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        listener.local_addr().expect("listener addr")
    };
    let mut sink = SinkBuilder::new()
        .with_endpoint(addr.ip().to_string(), addr.port())
        .with_connect_timeout_ms(100)
        .with_backoff(BackoffOverrides::new().with_base_ms(20).with_cap_ms(40))
        .build()
        .expect("build sink");

    sink.log(Severity::Warning, "pending", "stuck");
    let started = Instant::now();
    assert!(!sink.flush(Duration::from_millis(150)));
    assert!(started.elapsed() >= Duration::from_millis(150));
    // Timing out leaves the queue untouched.
    assert_eq!(sink.queued_records(), 1);
    sink.shutdown();
}

#[rstest]
fn flush_returns_true_once_drained(tcp_listener: TcpListener) {
    let (addr, frames) = spawn_frame_server(tcp_listener, None);
    let mut sink = build_sink(addr);
    sink.log(Severity::Info, "drain", "payload");
    assert!(sink.flush(Duration::from_secs(2)));
    assert_eq!(sink.queued_records(), 0);
    drop(frames);
    sink.shutdown();
}

#[rstest]
fn shutdown_drains_pending_records(tcp_listener: TcpListener) {
    let barrier = Arc::new(Barrier::new(2));
    let (addr, frames) = spawn_frame_server(tcp_listener, Some(barrier.clone()));
    let mut sink = build_sink(addr);
    sink.log(Severity::Fatal, "teardown", "last words");

    sink.shutdown();
    barrier.wait();

    let frame = recv_frame(&frames, "frame received after shutdown");
    assert_eq!(frame.text(), "last words");
    assert_eq!(frame.severity, Severity::Fatal.code());
}

#[rstest]
fn logging_after_shutdown_is_a_silent_drop(tcp_listener: TcpListener) {
    let (addr, _frames) = spawn_frame_server(tcp_listener, None);
    let mut sink = build_sink(addr);
    sink.shutdown();

    sink.log(Severity::Info, "late", "ignored");
    assert!(!sink.flush(Duration::from_millis(50)));
    assert_eq!(sink.connection_state(), ConnectionState::Disconnected);
}

#[rstest]
fn session_events_carry_ids_and_bracket_the_session(tcp_listener: TcpListener) {
    let (addr, frames) = spawn_frame_server(tcp_listener, None);
    let mut sink = build_sink(addr);
    assert!(sink.set_user_id("user-42"));

    sink.start_session([("build", "nightly")]);
    sink.record_event("MapLoaded", [("map", "highlands")]);
    sink.end_session();

    let start = recv_frame(&frames, "session start frame");
    assert_eq!(start.tag, SESSION_START_EVENT);
    let start_fields = start.fields();
    assert_eq!(start_fields["userId"], "user-42");
    assert_eq!(start_fields["build"], "nightly");
    let session_id = start_fields["sessionId"].clone();
    assert_eq!(session_id.len(), 32);

    let event = recv_frame(&frames, "map event frame");
    assert_eq!(event.tag, "MapLoaded");
    let event_fields = event.fields();
    assert_eq!(event_fields["map"], "highlands");
    assert_eq!(event_fields["sessionId"], session_id);

    let end = recv_frame(&frames, "session end frame");
    assert_eq!(end.tag, SESSION_END_EVENT);
    assert_eq!(end.fields()["sessionId"], session_id);

    sink.shutdown();
}

#[rstest]
fn oversized_records_are_counted_not_shipped(tcp_listener: TcpListener) {
    let (addr, frames) = spawn_frame_server(tcp_listener, None);
    let mut sink = SinkBuilder::new()
        .with_endpoint(addr.ip().to_string(), addr.port())
        .with_max_frame_size(64)
        .build()
        .expect("build sink");

    sink.log(Severity::Info, "big", "x".repeat(256));
    sink.log(Severity::Info, "small", "fits");

    let frame = recv_frame(&frames, "small frame received");
    assert_eq!(frame.tag, "small");
    assert_eq!(sink.stats().encode_rejected, 1);
    sink.shutdown();
}

#[rstest]
fn concurrent_producers_never_block_on_the_network() {
    // No collector at all; producers must still return promptly.
    let addr = {
        let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind listener");
        listener.local_addr().expect("listener addr")
    };
    let sink = Arc::new(
        SinkBuilder::new()
            .with_endpoint(addr.ip().to_string(), addr.port())
            .with_queue_capacity(128)
            .with_connect_timeout_ms(2_000)
            .build()
            .expect("build sink"),
    );

    let started = Instant::now();
    let producers: Vec<_> = (0..4)
        .map(|worker| {
            let sink = sink.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    sink.log(Severity::Trace, "burst", format!("{worker}-{i}"));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().expect("join producer");
    }
    // 400 enqueues must not be gated on connect timeouts.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(sink.queued_records() <= 128);
}
