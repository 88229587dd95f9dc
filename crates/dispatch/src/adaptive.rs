// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adaptive batch sizing.
//!
//! Watches recent send latency and the error rate over a small
//! rolling sample. Sustained fast, clean sends grow the batch;
//! failures or slow sends shrink it. The size always stays inside
//! the configured bounds.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

/// Bounds and reference points for adaptation.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveConfig {
    pub enabled: bool,
    pub min_batch: usize,
    pub max_batch: usize,
    /// Latency under which a send counts as fast.
    pub fast_send: Duration,
    /// Latency above which a send counts as slow.
    pub slow_send: Duration,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_batch: 100,
            max_batch: 5000,
            fast_send: Duration::from_millis(250),
            slow_send: Duration::from_secs(2),
        }
    }
}

/// Sends remembered for the rolling error rate.
const SAMPLE: usize = 20;

/// Error rate at or above which the batch shrinks.
const ERROR_RATE_SHRINK: f64 = 0.2;

/// Per-sink batch size controller.
pub struct AdaptiveBatcher {
    config: AdaptiveConfig,
    inner: Mutex<Inner>,
}

struct Inner {
    current: usize,
    outcomes: VecDeque<bool>,
}

impl AdaptiveBatcher {
    pub fn new(config: AdaptiveConfig, initial: usize) -> Self {
        let current = initial.clamp(config.min_batch, config.max_batch);
        Self {
            config,
            inner: Mutex::new(Inner {
                current,
                outcomes: VecDeque::with_capacity(SAMPLE),
            }),
        }
    }

    /// Current target batch size.
    pub fn current(&self) -> usize {
        self.inner.lock().current
    }

    /// Feed one send outcome back into the controller.
    pub fn record_send(&self, latency: Duration, ok: bool) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.outcomes.len() == SAMPLE {
            inner.outcomes.pop_front();
        }
        inner.outcomes.push_back(ok);

        let failures = inner.outcomes.iter().filter(|ok| !**ok).count();
        let error_rate = failures as f64 / inner.outcomes.len() as f64;

        if !ok || error_rate >= ERROR_RATE_SHRINK || latency >= self.config.slow_send {
            inner.current = (inner.current / 2).max(self.config.min_batch);
        } else if latency <= self.config.fast_send && error_rate == 0.0 {
            inner.current = (inner.current + inner.current / 10 + 1).min(self.config.max_batch);
        }
    }
}

#[cfg(test)]
#[path = "adaptive_tests.rs"]
mod tests;
