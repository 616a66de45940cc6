//! TCP connection lifecycle owned by the delivery worker.
//!
//! The manager holds the one socket handle and drives the state machine
//! Disconnected → Connecting → Connected → Backoff → Connecting. A failed
//! connect attempt moves straight to Backoff and reports the delay to wait;
//! it never retries synchronously inside the call. The current state is
//! published through an atomic cell so other threads can observe it without
//! blocking.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use crate::backoff::BackoffState;
use crate::config::SinkConfig;
use crate::stats::SinkStats;

/// Connection lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Backoff = 3,
}

/// Lock-free read-only view of the manager's state.
#[derive(Debug, Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub fn load(&self) -> ConnectionState {
        match self.0.load(Ordering::Relaxed) {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Backoff,
            _ => ConnectionState::Disconnected,
        }
    }

    fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Relaxed);
    }
}

pub(crate) struct ConnectionManager {
    host: String,
    port: u16,
    connect_timeout: Duration,
    write_timeout: Duration,
    stream: Option<TcpStream>,
    backoff: BackoffState,
    state: Arc<StateCell>,
    stats: Arc<SinkStats>,
}

impl ConnectionManager {
    pub fn new(config: &SinkConfig, state: Arc<StateCell>, stats: Arc<SinkStats>) -> Self {
        state.store(ConnectionState::Disconnected);
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout,
            write_timeout: config.write_timeout,
            stream: None,
            backoff: BackoffState::new(config.backoff.clone()),
            state,
            stats,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// One connect attempt.
    ///
    /// On success the manager is Connected and the socket is ready for
    /// writes. On failure it transitions to Backoff and returns the jittered
    /// delay the caller must wait out before the next attempt.
    pub fn connect(&mut self) -> Result<(), Duration> {
        self.state.store(ConnectionState::Connecting);
        match self.try_connect() {
            Ok(stream) => {
                self.backoff.record_success(Instant::now());
                self.stream = Some(stream);
                self.state.store(ConnectionState::Connected);
                Ok(())
            }
            Err(err) => {
                self.stats.connect_failures.fetch_add(1, Ordering::Relaxed);
                self.state.store(ConnectionState::Backoff);
                let delay = self.backoff.next_sleep();
                log::warn!(
                    "tcplog: connect to {}:{} failed: {err}; retrying in {delay:?}",
                    self.host,
                    self.port,
                );
                Err(delay)
            }
        }
    }

    fn try_connect(&self) -> io::Result<TcpStream> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .collect();
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(self.write_timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no addresses resolved for {}:{}", self.host, self.port),
            )
        }))
    }

    /// Writable socket while Connected.
    pub fn writer(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    /// Record a healthy batch delivery.
    pub fn record_success(&mut self) {
        self.backoff.record_success(Instant::now());
    }

    /// Tear down the socket after an I/O fault and enter Backoff.
    ///
    /// Returns the delay to wait before the next connect attempt. Queued
    /// entries are untouched; they are retried once reconnected.
    pub fn fault(&mut self, err: &io::Error) -> Duration {
        self.stats.write_faults.fetch_add(1, Ordering::Relaxed);
        self.stream = None;
        self.state.store(ConnectionState::Backoff);
        let delay = self.backoff.next_sleep();
        log::warn!(
            "tcplog: connection to {}:{} faulted: {err}; reconnecting in {delay:?}",
            self.host,
            self.port,
        );
        delay
    }

    /// Release the socket during shutdown.
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.state.store(ConnectionState::Disconnected);
    }
}
