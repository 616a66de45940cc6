//! Exponential backoff state machine used by the connection manager.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::config::BackoffPolicy;

/// Floor applied to jittered sleeps so a tiny base never busy-loops.
const MIN_SLEEP_MS: u64 = 10;

/// Tracks reconnection attempts and produces jittered delays.
///
/// The delay ceiling doubles per consecutive failure up to the policy cap and
/// never exceeds it. Jitter samples each sleep uniformly below the current
/// ceiling so a fleet of sinks does not reconnect to the collector in
/// lockstep.
pub struct BackoffState {
    policy: BackoffPolicy,
    current: Duration,
    failing: bool,
    rng: StdRng,
    last_success: Option<Instant>,
}

impl BackoffState {
    /// Create a new state machine from the supplied policy.
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            current: policy.base,
            failing: false,
            rng: StdRng::from_entropy(),
            last_success: None,
            policy,
        }
    }

    /// Record a successful connect or write event.
    pub fn record_success(&mut self, now: Instant) {
        self.failing = false;
        if let Some(success) = self.last_success
            && now.duration_since(success) >= self.policy.reset_after
        {
            self.current = self.policy.base;
        }
        self.last_success = Some(now);
    }

    /// Calculate the next jittered sleep duration following a failure.
    pub fn next_sleep(&mut self) -> Duration {
        // A lone success between failures does not reset the ceiling; only
        // sustained health does, via `record_success`.
        if self.failing {
            self.current = self.current.saturating_mul(2).min(self.policy.cap);
        } else {
            self.failing = true;
        }

        let max_ms = self.current.as_millis().min(u128::from(u64::MAX)) as u64;
        let sleep_ms = match max_ms {
            0 => MIN_SLEEP_MS,
            1..=MIN_SLEEP_MS => max_ms,
            _ => self.rng.gen_range(MIN_SLEEP_MS..=max_ms),
        };
        Duration::from_millis(sleep_ms)
    }

    /// Current un-jittered delay ceiling.
    pub fn ceiling(&self) -> Duration {
        self.current
    }
}
