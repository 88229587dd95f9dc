// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process pipeline metrics.
//!
//! A single `Arc<PipelineMetrics>` is shared across components.
//! Plain counters are atomics; per-source and per-sink counters live
//! behind a mutex-guarded map. There is no scrape surface here;
//! consumers take a [`MetricsSnapshot`] for health derivation and
//! tests.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared counters and gauges for the whole pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    // Ingress
    pub entries_ingested: AtomicU64,
    pub queue_rejections: AtomicU64,
    // Dedup
    dedup_hits: Mutex<HashMap<String, u64>>,
    // Sinks
    sink_sends_ok: Mutex<HashMap<String, u64>>,
    sink_sends_failed: Mutex<HashMap<String, u64>>,
    /// Keyed by (policy outcome, source_id).
    timestamp_outcomes: Mutex<HashMap<(String, String), u64>>,
    // DLQ
    pub dlq_entries_written: AtomicU64,
    pub dlq_entries_reprocessed: AtomicU64,
    // Monitors
    pub retry_dropped: AtomicU64,
    pub old_file_ignored: AtomicU64,
    pub stream_rotations: AtomicU64,
    // Position store
    pub position_corruption_detected: AtomicU64,
    // Gauges, stored as f64 bits
    queue_utilization: AtomicU64,
    position_backpressure: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dedup_hit(&self, source_id: &str) {
        let mut map = self.dedup_hits.lock();
        *map.entry(source_id.to_string()).or_insert(0) += 1;
    }

    pub fn dedup_hits(&self, source_id: &str) -> u64 {
        self.dedup_hits.lock().get(source_id).copied().unwrap_or(0)
    }

    pub fn record_sink_send(&self, sink_id: &str, ok: bool) {
        let map = if ok {
            &self.sink_sends_ok
        } else {
            &self.sink_sends_failed
        };
        *map.lock().entry(sink_id.to_string()).or_insert(0) += 1;
    }

    pub fn sink_sends(&self, sink_id: &str) -> (u64, u64) {
        let ok = self
            .sink_sends_ok
            .lock()
            .get(sink_id)
            .copied()
            .unwrap_or(0);
        let failed = self
            .sink_sends_failed
            .lock()
            .get(sink_id)
            .copied()
            .unwrap_or(0);
        (ok, failed)
    }

    /// Count a timestamp-policy outcome ("clamp", "drop", "learn")
    /// against the source it applied to.
    pub fn record_timestamp_outcome(&self, outcome: &str, source_id: &str) {
        *self
            .timestamp_outcomes
            .lock()
            .entry((outcome.to_string(), source_id.to_string()))
            .or_insert(0) += 1;
    }

    pub fn timestamp_outcomes(&self, outcome: &str, source_id: &str) -> u64 {
        self.timestamp_outcomes
            .lock()
            .get(&(outcome.to_string(), source_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_queue_utilization(&self, value: f64) {
        self.queue_utilization
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn queue_utilization(&self) -> f64 {
        f64::from_bits(self.queue_utilization.load(Ordering::Relaxed))
    }

    pub fn set_position_backpressure(&self, value: f64) {
        self.position_backpressure
            .store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn position_backpressure(&self) -> f64 {
        f64::from_bits(self.position_backpressure.load(Ordering::Relaxed))
    }

    /// Point-in-time copy of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            entries_ingested: self.entries_ingested.load(Ordering::Relaxed),
            queue_rejections: self.queue_rejections.load(Ordering::Relaxed),
            dedup_hits: self.dedup_hits.lock().clone(),
            sink_sends_ok: self.sink_sends_ok.lock().clone(),
            sink_sends_failed: self.sink_sends_failed.lock().clone(),
            timestamp_outcomes: self
                .timestamp_outcomes
                .lock()
                .iter()
                .map(|((outcome, source), v)| (format!("{outcome}:{source}"), *v))
                .collect(),
            dlq_entries_written: self.dlq_entries_written.load(Ordering::Relaxed),
            dlq_entries_reprocessed: self.dlq_entries_reprocessed.load(Ordering::Relaxed),
            retry_dropped: self.retry_dropped.load(Ordering::Relaxed),
            old_file_ignored: self.old_file_ignored.load(Ordering::Relaxed),
            stream_rotations: self.stream_rotations.load(Ordering::Relaxed),
            position_corruption_detected: self.position_corruption_detected.load(Ordering::Relaxed),
            queue_utilization: self.queue_utilization(),
            position_backpressure: self.position_backpressure(),
        }
    }
}

/// Serializable copy of the registry at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub entries_ingested: u64,
    pub queue_rejections: u64,
    pub dedup_hits: HashMap<String, u64>,
    pub sink_sends_ok: HashMap<String, u64>,
    pub sink_sends_failed: HashMap<String, u64>,
    pub timestamp_outcomes: HashMap<String, u64>,
    pub dlq_entries_written: u64,
    pub dlq_entries_reprocessed: u64,
    pub retry_dropped: u64,
    pub old_file_ignored: u64,
    pub stream_rotations: u64,
    pub position_corruption_detected: u64,
    pub queue_utilization: f64,
    pub position_backpressure: f64,
}

/// Overall process health, derived from pipeline signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
        }
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
