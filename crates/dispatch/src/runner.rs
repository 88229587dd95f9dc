// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-sink delivery runner.
//!
//! Each sink owns a bounded queue and a single batch-assembly task.
//! Batches flush on size or timeout, pass timestamp validation, and
//! go through the sink's circuit breaker. Retryable failures back off
//! under the global retry semaphore; terminal failures and exhausted
//! retries dead-letter every entry of the batch.

use crate::adaptive::{AdaptiveBatcher, AdaptiveConfig};
use crate::retry::RetryScheduler;
use drover_adapters::sink::{SinkTransport, TimestampPolicy, TimestampValidator, TimestampWindow};
use drover_core::{
    Batch, BreakerConfig, BreakerState, CircuitBreaker, Clock, DlqEntry, ErrorClass, LogEntry,
    OpenBatch, PipelineMetrics,
};
use drover_storage::DlqSegmentStore;
use parking_lot::RwLock;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tunables for one sink runner.
#[derive(Debug, Clone)]
pub struct SinkRunnerConfig {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub queue_size: usize,
    pub adaptive: AdaptiveConfig,
    pub breaker: BreakerConfig,
    /// Timestamp validation, for sinks whose remote rejects
    /// out-of-window entries.
    pub timestamp_policy: Option<(TimestampPolicy, TimestampWindow)>,
}

impl Default for SinkRunnerConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            batch_timeout: Duration::from_secs(1),
            queue_size: 10_000,
            adaptive: AdaptiveConfig::default(),
            breaker: BreakerConfig::default(),
            timestamp_policy: None,
        }
    }
}

/// Hot-reloadable batch parameters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BatchParams {
    pub batch_size: usize,
    pub batch_timeout: Duration,
}

/// The dispatcher's view of one sink: enqueue, health, utilization.
#[derive(Clone)]
pub struct SinkHandle {
    id: String,
    tx: mpsc::Sender<Arc<LogEntry>>,
    queue_size: usize,
    breaker: Arc<CircuitBreaker>,
    params: Arc<RwLock<BatchParams>>,
}

impl SinkHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Healthy means the breaker admits sends and the queue has room.
    pub fn is_healthy(&self) -> bool {
        self.breaker.state(Instant::now()) != BreakerState::Open && self.tx.capacity() > 0
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state(Instant::now())
    }

    pub fn queue_utilization(&self) -> f64 {
        1.0 - self.tx.capacity() as f64 / self.queue_size as f64
    }

    /// Non-blocking enqueue of a shared entry.
    pub fn try_enqueue(&self, entry: Arc<LogEntry>) -> bool {
        self.tx.try_send(entry).is_ok()
    }

    /// Apply hot-reloadable settings.
    pub fn update(&self, batch_size: usize, batch_timeout: Duration, breaker: BreakerConfig) {
        *self.params.write() = BatchParams {
            batch_size,
            batch_timeout,
        };
        self.breaker.update_config(breaker);
    }
}

/// Spawns and owns the assembly/send loop for one sink.
pub struct SinkRunner;

impl SinkRunner {
    /// Start a runner task on `tracker`, returning the handle the
    /// dispatcher fans out through.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        config: SinkRunnerConfig,
        transport: Arc<dyn SinkTransport>,
        retries: Arc<RetryScheduler>,
        dlq: Option<Arc<DlqSegmentStore>>,
        metrics: Arc<PipelineMetrics>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> SinkHandle {
        let id = transport.id().to_string();
        let (tx, rx) = mpsc::channel(config.queue_size.max(1));
        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        let params = Arc::new(RwLock::new(BatchParams {
            batch_size: config.batch_size,
            batch_timeout: config.batch_timeout,
        }));
        let validator = config.timestamp_policy.map(|(policy, window)| {
            TimestampValidator::new(policy, window, &id, Arc::clone(&metrics))
        });

        let task = RunnerTask {
            id: id.clone(),
            rx,
            transport,
            breaker: Arc::clone(&breaker),
            adaptive: AdaptiveBatcher::new(config.adaptive, config.batch_size),
            adaptive_enabled: config.adaptive.enabled,
            validator,
            retries,
            dlq,
            metrics,
            clock,
            cancel,
            params: Arc::clone(&params),
        };
        tracker.spawn(task.run());

        SinkHandle {
            id,
            tx,
            queue_size: config.queue_size.max(1),
            breaker,
            params,
        }
    }
}

struct RunnerTask {
    id: String,
    rx: mpsc::Receiver<Arc<LogEntry>>,
    transport: Arc<dyn SinkTransport>,
    breaker: Arc<CircuitBreaker>,
    adaptive: AdaptiveBatcher,
    adaptive_enabled: bool,
    validator: Option<TimestampValidator>,
    retries: Arc<RetryScheduler>,
    dlq: Option<Arc<DlqSegmentStore>>,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    params: Arc<RwLock<BatchParams>>,
}

impl RunnerTask {
    fn target_batch_size(&self) -> usize {
        if self.adaptive_enabled {
            self.adaptive.current()
        } else {
            self.params.read().batch_size
        }
    }

    async fn run(mut self) {
        let mut open: Option<OpenBatch> = None;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    // Final flush: drain whatever is already queued,
                    // then send best-effort
                    while let Ok(entry) = self.rx.try_recv() {
                        let full = push_entry(&mut open, entry, &self.id, self.clock.as_ref())
                            >= self.target_batch_size();
                        if full {
                            if let Some(batch) = open.take() {
                                self.flush(batch).await;
                            }
                        }
                    }
                    if let Some(batch) = open.take() {
                        self.flush(batch).await;
                    }
                    break;
                }
                entry = self.rx.recv() => match entry {
                    Some(entry) => {
                        if open.is_none() {
                            deadline = Some(
                                tokio::time::Instant::now()
                                    + self.params.read().batch_timeout,
                            );
                        }
                        let full = push_entry(&mut open, entry, &self.id, self.clock.as_ref())
                            >= self.target_batch_size();
                        if full {
                            deadline = None;
                            if let Some(batch) = open.take() {
                                self.flush(batch).await;
                            }
                        }
                    }
                    None => {
                        if let Some(batch) = open.take() {
                            self.flush(batch).await;
                        }
                        break;
                    }
                },
                _ = sleep_until_opt(deadline), if deadline.is_some() => {
                    deadline = None;
                    if let Some(batch) = open.take() {
                        self.flush(batch).await;
                    }
                }
            }
        }
        tracing::debug!(sink_id = %self.id, "sink runner exited");
    }

    /// Validate, seal, and deliver one batch.
    async fn flush(&self, open: OpenBatch) {
        if open.is_empty() {
            return;
        }
        let mut batch = open.seal();

        if let Some(validator) = &self.validator {
            let outcome = validator.validate(batch.entries(), self.clock.as_ref());
            if !outcome.rejected.is_empty() {
                self.dead_letter(
                    &outcome.rejected,
                    ErrorClass::TimestampOutOfWindow,
                    "outside acceptance window",
                    batch.retry_count(),
                );
            }
            if outcome.accepted.is_empty() {
                return;
            }
            batch = batch.with_entries(outcome.accepted);
        }

        self.send_with_retries(batch).await;
    }

    async fn send_with_retries(&self, mut batch: Batch) {
        let policy = self.retries.policy();
        // Held across every retry of this batch, bounding concurrent
        // retrying batches process-wide
        let mut _permit = None;

        loop {
            if self.wait_for_breaker().await.is_err() {
                self.dead_letter(
                    batch.entries(),
                    ErrorClass::RetriesExhausted,
                    "breaker open at shutdown",
                    batch.retry_count(),
                );
                return;
            }

            let started = Instant::now();
            let result = self.transport.send(&batch).await;
            let latency = started.elapsed();
            let ok = result.is_ok();

            if let Some(state) = self.breaker.record(Instant::now(), ok) {
                tracing::info!(sink_id = %self.id, state = state.as_str(), "circuit breaker transition");
            }
            self.adaptive.record_send(latency, ok);
            self.metrics.record_sink_send(&self.id, ok);

            let error = match result {
                Ok(()) => {
                    tracing::debug!(
                        sink_id = %self.id,
                        entries = batch.len(),
                        latency_ms = latency.as_millis() as u64,
                        "batch delivered"
                    );
                    return;
                }
                Err(e) => e,
            };

            if error.class == ErrorClass::TimestampOutOfWindow {
                if let (Some(validator), Some(oldest)) = (&self.validator, oldest_age(&batch, self.clock.as_ref())) {
                    validator.observe_remote_rejection(oldest);
                }
                self.dead_letter(
                    batch.entries(),
                    error.class,
                    &error.message,
                    batch.retry_count(),
                );
                return;
            }

            if !error.is_retryable() {
                self.dead_letter(
                    batch.entries(),
                    error.class,
                    &error.message,
                    batch.retry_count(),
                );
                return;
            }

            let attempt = batch.retry_count() + 1;
            if attempt > policy.max_retries {
                self.dead_letter(
                    batch.entries(),
                    ErrorClass::RetriesExhausted,
                    &error.message,
                    batch.retry_count(),
                );
                return;
            }

            if _permit.is_none() {
                match self.retries.try_acquire() {
                    Some(permit) => _permit = Some(permit),
                    None => {
                        self.dead_letter(
                            batch.entries(),
                            ErrorClass::RetrySaturation,
                            "retry semaphore exhausted",
                            batch.retry_count(),
                        );
                        return;
                    }
                }
            }

            batch = batch.for_retry();
            let delay = policy.delay_for(attempt, error.retry_after);
            tracing::debug!(
                sink_id = %self.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying batch"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.dead_letter(
                        batch.entries(),
                        ErrorClass::RetriesExhausted,
                        "shutdown during retry",
                        batch.retry_count(),
                    );
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Park while the breaker is open. `Err` means shutdown fired.
    async fn wait_for_breaker(&self) -> Result<(), ()> {
        loop {
            if self.breaker.try_acquire(Instant::now()) {
                return Ok(());
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(()),
                _ = tokio::time::sleep(Duration::from_millis(250)) => {}
            }
        }
    }

    fn dead_letter(
        &self,
        entries: &[Arc<LogEntry>],
        reason: ErrorClass,
        detail: &str,
        retry_count: u32,
    ) {
        let Some(dlq) = &self.dlq else {
            tracing::warn!(
                sink_id = %self.id,
                entries = entries.len(),
                reason = reason.as_str(),
                "dlq disabled, dropping failed entries"
            );
            return;
        };

        let now = self.clock.now();
        for entry in entries {
            let record = DlqEntry::new((**entry).clone(), &self.id, reason, retry_count, now)
                .with_detail(detail);
            match dlq.write(&record, now) {
                Ok(_) => {
                    self.metrics.dlq_entries_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    tracing::error!(sink_id = %self.id, error = %e, "dlq write failed");
                }
            }
        }
        tracing::warn!(
            sink_id = %self.id,
            entries = entries.len(),
            reason = reason.as_str(),
            detail,
            "batch dead-lettered"
        );
    }
}

/// Push into the open batch, creating it if needed; returns the new
/// length.
fn push_entry(
    open: &mut Option<OpenBatch>,
    entry: Arc<LogEntry>,
    sink_id: &str,
    clock: &dyn Clock,
) -> usize {
    let batch = open.get_or_insert_with(|| OpenBatch::new(sink_id, clock));
    batch.push(entry);
    batch.len()
}

/// Age of the oldest entry relative to now, for window learning.
fn oldest_age(batch: &Batch, clock: &dyn Clock) -> Option<Duration> {
    let now = clock.now();
    batch
        .entries()
        .iter()
        .map(|e| e.timestamp())
        .min()
        .and_then(|oldest| (now - oldest).to_std().ok())
}

async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
