// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy and the global retry concurrency cap.
//!
//! Backoff is exponential (`base × multiplier^attempt`, capped) with
//! decorrelated jitter: the actual delay is drawn uniformly between
//! the base and the exponential bound, so synchronized failures fan
//! out instead of thundering back together. A `Retry-After` from the
//! remote acts as a floor. Concurrent retries across all sinks share
//! one semaphore; when it is exhausted the batch dead-letters with
//! `retry_saturation` instead of queueing.

use parking_lot::RwLock;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

/// Backoff tunables.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), jittered.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        let bound = self
            .base_delay
            .mul_f64(exp.min(1e6))
            .min(self.max_delay)
            .max(self.base_delay);

        let jittered = if bound > self.base_delay {
            let range = (bound - self.base_delay).as_nanos() as u64;
            let offset = rand::rng().random_range(0..=range);
            self.base_delay + Duration::from_nanos(offset)
        } else {
            bound
        };

        match retry_after {
            Some(floor) => jittered.max(floor).min(self.max_delay.max(floor)),
            None => jittered,
        }
    }
}

/// Shared cap on in-flight retries.
pub struct RetryScheduler {
    policy: RwLock<RetryPolicy>,
    semaphore: Arc<Semaphore>,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy, max_concurrent: usize) -> Self {
        Self {
            policy: RwLock::new(policy),
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        *self.policy.read()
    }

    /// Replace the backoff tunables (hot reload). The semaphore size
    /// is fixed for the process lifetime.
    pub fn update_policy(&self, policy: RetryPolicy) {
        *self.policy.write() = policy;
    }

    /// Claim a retry slot without waiting. `None` means saturation:
    /// the caller dead-letters instead of retrying.
    pub fn try_acquire(&self) -> Option<OwnedSemaphorePermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => None,
        }
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
