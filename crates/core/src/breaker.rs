// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-sink circuit breaker.
//!
//! Three states: `Closed`, `Open`, `HalfOpen`. Callers use a
//! three-phase protocol: `try_acquire` decides admission under the
//! lock, the protected operation runs with the lock released, and
//! `record` updates counters and state under the lock again. The lock
//! is never held across the protected operation; for synchronous
//! callers [`CircuitBreaker::execute`] packages the three phases.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

/// Tunables for one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Failures within `rolling_window` that trip the breaker.
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close it again.
    pub success_threshold: u32,
    /// How long to stay open before probing.
    pub open_timeout: Duration,
    /// Window over which failures are counted.
    pub rolling_window: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct Inner {
    config: BreakerConfig,
    state: BreakerState,
    /// Failure instants inside the rolling window.
    failures: VecDeque<Instant>,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
}

/// Three-state failure isolation for one sink.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                config,
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                consecutive_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Current state, advancing `Open → HalfOpen` if the open timeout
    /// has elapsed.
    pub fn state(&self, now: Instant) -> BreakerState {
        let mut inner = self.inner.lock();
        inner.advance_open(now);
        inner.state
    }

    /// Phase one: decide admission. Returns `false` when the breaker
    /// is open and the caller must not run the operation.
    pub fn try_acquire(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        inner.advance_open(now);
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => false,
        }
    }

    /// Phase three: record the outcome of an admitted operation.
    /// Returns the new state when a transition happened.
    pub fn record(&self, now: Instant, success: bool) -> Option<BreakerState> {
        let mut inner = self.inner.lock();
        let before = inner.state;

        if success {
            match inner.state {
                BreakerState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= inner.config.success_threshold {
                        inner.close();
                    }
                }
                BreakerState::Closed => {}
                // A success can arrive after the breaker re-opened
                // from a concurrent failure; it does not reopen state.
                BreakerState::Open => {}
            }
        } else {
            match inner.state {
                BreakerState::HalfOpen => inner.trip(now),
                BreakerState::Closed => {
                    inner.push_failure(now);
                    if inner.failures.len() as u32 >= inner.config.failure_threshold {
                        inner.trip(now);
                    }
                }
                BreakerState::Open => {}
            }
        }

        (inner.state != before).then_some(inner.state)
    }

    /// Run `f` under the three-phase contract. The lock is released
    /// while `f` runs.
    pub fn execute<T, E>(
        &self,
        now: impl Fn() -> Instant,
        f: impl FnOnce() -> Result<T, E>,
    ) -> Result<Result<T, E>, BreakerOpen> {
        if !self.try_acquire(now()) {
            return Err(BreakerOpen);
        }
        let result = f();
        self.record(now(), result.is_ok());
        Ok(result)
    }

    /// Swap the tunables in place (hot reload). State is preserved.
    pub fn update_config(&self, config: BreakerConfig) {
        self.inner.lock().config = config;
    }
}

/// The breaker denied admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker open")]
pub struct BreakerOpen;

impl Inner {
    fn advance_open(&mut self, now: Instant) {
        if self.state == BreakerState::Open {
            if let Some(opened) = self.opened_at {
                if now.duration_since(opened) >= self.config.open_timeout {
                    self.state = BreakerState::HalfOpen;
                    self.consecutive_successes = 0;
                }
            }
        }
    }

    fn push_failure(&mut self, now: Instant) {
        self.failures.push_back(now);
        let cutoff = self.config.rolling_window;
        while let Some(front) = self.failures.front() {
            if now.duration_since(*front) > cutoff {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    fn trip(&mut self, now: Instant) {
        self.state = BreakerState::Open;
        self.opened_at = Some(now);
        self.failures.clear();
        self.consecutive_successes = 0;
    }

    fn close(&mut self) {
        self.state = BreakerState::Closed;
        self.opened_at = None;
        self.failures.clear();
        self.consecutive_successes = 0;
    }
}

#[cfg(test)]
#[path = "breaker_tests.rs"]
mod tests;
