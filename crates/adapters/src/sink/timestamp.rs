// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timestamp validation for remote sinks.
//!
//! Remote log stores reject entries too far in the past or future.
//! The validator enforces a local acceptance window before a batch is
//! sealed, so rejections are handled here instead of burning a send.
//! Three policies: `drop` dead-letters the entry, `clamp` moves the
//! timestamp to the window boundary (with an audit record), `learn`
//! drops locally and tightens the window from observed remote
//! rejections.

use chrono::Duration as ChronoDuration;
use drover_core::{AdjustmentReason, Clock, LogEntry, PipelineMetrics};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// What to do with an out-of-window entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampPolicy {
    Drop,
    Clamp,
    Learn,
}

impl TimestampPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            TimestampPolicy::Drop => "drop",
            TimestampPolicy::Clamp => "clamp",
            TimestampPolicy::Learn => "learn",
        }
    }
}

/// Acceptance window relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampWindow {
    pub max_past: Duration,
    pub max_future: Duration,
}

impl Default for TimestampWindow {
    fn default() -> Self {
        Self {
            max_past: Duration::from_secs(24 * 3600),
            max_future: Duration::from_secs(5 * 60),
        }
    }
}

/// Result of validating a batch's entries.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// In-window entries plus any clamped replacements, in order.
    pub accepted: Vec<Arc<LogEntry>>,
    /// Entries the caller must dead-letter.
    pub rejected: Vec<Arc<LogEntry>>,
}

/// Per-sink validator.
pub struct TimestampValidator {
    policy: TimestampPolicy,
    window: TimestampWindow,
    /// Component name stamped on adjustment records.
    component: String,
    /// Tightened past bound learned from remote rejections.
    learned_max_past: Mutex<Option<Duration>>,
    metrics: Arc<PipelineMetrics>,
}

impl TimestampValidator {
    pub fn new(
        policy: TimestampPolicy,
        window: TimestampWindow,
        component: impl Into<String>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            policy,
            window,
            component: component.into(),
            learned_max_past: Mutex::new(None),
            metrics,
        }
    }

    /// The window currently in force, including any learned bound.
    pub fn effective_window(&self) -> TimestampWindow {
        let mut window = self.window;
        if self.policy == TimestampPolicy::Learn {
            if let Some(learned) = *self.learned_max_past.lock() {
                window.max_past = window.max_past.min(learned);
            }
        }
        window
    }

    /// Validate entries against the window, applying the policy.
    pub fn validate(&self, entries: &[Arc<LogEntry>], clock: &dyn Clock) -> ValidationOutcome {
        let now = clock.now();
        let window = self.effective_window();
        let oldest = now - chrono_dur(window.max_past);
        let newest = now + chrono_dur(window.max_future);

        let mut outcome = ValidationOutcome::default();
        for entry in entries {
            let ts = entry.timestamp();
            if ts >= oldest && ts <= newest {
                outcome.accepted.push(Arc::clone(entry));
                continue;
            }

            match self.policy {
                TimestampPolicy::Drop | TimestampPolicy::Learn => {
                    self.metrics
                        .record_timestamp_outcome(self.policy.as_str(), entry.source_id());
                    outcome.rejected.push(Arc::clone(entry));
                }
                TimestampPolicy::Clamp => {
                    let boundary = if ts < oldest { oldest } else { newest };
                    let mut clamped = (**entry).clone();
                    clamped.adjust_timestamp(
                        AdjustmentReason::ClampToWindow,
                        boundary,
                        &self.component,
                        None,
                        clock,
                    );
                    self.metrics
                        .record_timestamp_outcome("clamp", entry.source_id());
                    outcome.accepted.push(Arc::new(clamped));
                }
            }
        }
        outcome
    }

    /// Feed a remote timestamp rejection back into the window.
    ///
    /// `rejected_age` is how far behind now the oldest rejected entry
    /// was. Under the learn policy the local bound tightens to just
    /// under that age, so younger entries keep flowing while the
    /// remote's floor is respected.
    pub fn observe_remote_rejection(&self, rejected_age: Duration) {
        if self.policy != TimestampPolicy::Learn {
            return;
        }
        let tightened = rejected_age.mul_f64(0.95);
        let mut learned = self.learned_max_past.lock();
        let current = learned.unwrap_or(self.window.max_past);
        if tightened < current {
            tracing::info!(
                component = %self.component,
                learned_max_past_secs = tightened.as_secs(),
                "tightened timestamp window from remote rejection"
            );
            *learned = Some(tightened);
        }
    }
}

fn chrono_dur(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

#[cfg(test)]
#[path = "timestamp_tests.rs"]
mod tests;
