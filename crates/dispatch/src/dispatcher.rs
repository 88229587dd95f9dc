// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: bounded ingress, worker fan-out, shutdown.
//!
//! Producers submit through [`DispatcherHandle::try_submit`], which
//! applies the backpressure levels before the queue. A router task
//! deduplicates raw entries and partitions them to workers by source,
//! so entries from one source stay in ingestion order all the way to
//! each sink. Workers run the processing pipeline and hand one shared
//! `Arc<LogEntry>` to every healthy sink runner.
//!
//! Ordering caveat: a retried batch may land after later batches from
//! the same source. Callers that need strict order must disable
//! retries (`max_retries = 0`) and accept the DLQ growth.

use crate::dedup::{DedupCache, DedupConfig};
use crate::error::DispatchError;
use crate::pipeline::Processor;
use crate::retry::{RetryPolicy, RetryScheduler};
use crate::runner::{SinkHandle, SinkRunner, SinkRunnerConfig};
use drover_adapters::sink::SinkTransport;
use drover_core::{
    BackpressureLevel, BackpressureManager, Clock, Ingest, IngestError, LogEntry,
    PipelineMetrics,
};
use drover_storage::DlqSegmentStore;
use parking_lot::RwLock;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Dispatcher tunables.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Ingress queue capacity. Fixed for the process lifetime.
    pub queue_size: usize,
    pub worker_count: usize,
    pub dedup: DedupConfig,
    pub retry: RetryPolicy,
    /// Global cap on concurrently retrying batches.
    pub retry_concurrency: usize,
    pub drain_timeout: Duration,
    pub sink_stop_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_size: 50_000,
            worker_count: 4,
            dedup: DedupConfig::default(),
            retry: RetryPolicy::default(),
            retry_concurrency: 100,
            drain_timeout: Duration::from_secs(60),
            sink_stop_timeout: Duration::from_secs(30),
        }
    }
}

/// Cadence of the dedup TTL sweep.
const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Ceiling on one worker's partition queue.
const WORKER_QUEUE_MAX: usize = 1024;

/// Partition-queue capacity per worker. Derived from the ingress
/// bound: the partition queues must not dwarf the ingress queue, or
/// downstream buffering would absorb bursts the producers were meant
/// to see as `queue_backpressure`.
fn worker_queue_size(queue_size: usize, workers: usize) -> usize {
    (queue_size / workers.max(1)).clamp(16, WORKER_QUEUE_MAX)
}

/// One queued unit of work.
///
/// Normal submissions fan out to every healthy sink after dedup.
/// Re-submissions from the DLQ carry the sink they originally failed
/// against and skip dedup, so a recovered sink gets the entry while
/// the sinks that already delivered it see nothing new.
#[derive(Debug)]
struct Submission {
    entry: LogEntry,
    target: Option<String>,
}

/// Assembles a [`Dispatcher`].
pub struct DispatcherBuilder {
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    processors: Vec<Box<dyn Processor>>,
    sinks: Vec<(Arc<dyn SinkTransport>, SinkRunnerConfig)>,
    dlq: Option<Arc<DlqSegmentStore>>,
}

impl DispatcherBuilder {
    pub fn new(
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            config,
            clock,
            metrics,
            processors: Vec::new(),
            sinks: Vec::new(),
            dlq: None,
        }
    }

    pub fn dlq(mut self, store: Arc<DlqSegmentStore>) -> Self {
        self.dlq = Some(store);
        self
    }

    pub fn processor(mut self, processor: Box<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    pub fn sink(mut self, transport: Arc<dyn SinkTransport>, config: SinkRunnerConfig) -> Self {
        self.sinks.push((transport, config));
        self
    }

    /// Spawn workers, sink runners, and the dedup sweeper.
    pub fn build(self) -> Dispatcher {
        let (tx, rx) = mpsc::channel::<Submission>(self.config.queue_size.max(1));
        let cancel = CancellationToken::new();
        let workers = TaskTracker::new();
        let runners = TaskTracker::new();
        let retries = Arc::new(RetryScheduler::new(
            self.config.retry,
            self.config.retry_concurrency,
        ));
        let dedup = Arc::new(DedupCache::new(self.config.dedup.clone()));

        let mut sinks = Vec::with_capacity(self.sinks.len());
        for (transport, sink_config) in self.sinks {
            sinks.push(SinkRunner::spawn(
                sink_config,
                transport,
                Arc::clone(&retries),
                self.dlq.clone(),
                Arc::clone(&self.metrics),
                Arc::clone(&self.clock),
                cancel.child_token(),
                &runners,
            ));
        }
        let sinks = Arc::new(sinks);

        let dispatcher = Dispatcher {
            tx,
            queue_size: self.config.queue_size.max(1),
            backpressure: BackpressureManager::default(),
            dedup,
            retries,
            processors: Arc::new(self.processors),
            sinks,
            worker_txs: Arc::new(RwLock::new(Vec::new())),
            dlq: self.dlq,
            metrics: self.metrics,
            clock: self.clock,
            cancel,
            workers,
            runners,
            config: self.config,
        };

        dispatcher.spawn_workers(dispatcher.config.worker_count.max(1));
        dispatcher.spawn_router(rx);
        dispatcher.spawn_dedup_sweeper();
        dispatcher
    }
}

/// Process-wide fan-out of log entries to sinks.
pub struct Dispatcher {
    tx: mpsc::Sender<Submission>,
    queue_size: usize,
    backpressure: BackpressureManager,
    dedup: Arc<DedupCache>,
    retries: Arc<RetryScheduler>,
    processors: Arc<Vec<Box<dyn Processor>>>,
    sinks: Arc<Vec<SinkHandle>>,
    worker_txs: Arc<RwLock<Vec<mpsc::Sender<Submission>>>>,
    dlq: Option<Arc<DlqSegmentStore>>,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    workers: TaskTracker,
    runners: TaskTracker,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Cloneable producer-side handle.
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            tx: self.tx.clone(),
            queue_size: self.queue_size,
            backpressure: self.backpressure,
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn sinks(&self) -> &[SinkHandle] {
        &self.sinks
    }

    pub fn sink(&self, id: &str) -> Option<&SinkHandle> {
        self.sinks.iter().find(|s| s.id() == id)
    }

    /// Entries currently queued at the ingress.
    pub fn queue_len(&self) -> usize {
        self.queue_size - self.tx.capacity()
    }

    pub fn retry_permits_available(&self) -> usize {
        self.retries.available_permits()
    }

    /// Hot-reload entry points.
    pub fn update_dedup(&self, config: DedupConfig) {
        self.dedup.update_config(config);
    }

    pub fn update_retry(&self, policy: RetryPolicy) {
        self.retries.update_policy(policy);
    }

    /// Re-partition onto `count` fresh workers. Old workers drain
    /// their queues and exit.
    pub fn set_worker_count(&self, count: usize) {
        self.spawn_workers(count.max(1));
    }

    fn spawn_workers(&self, count: usize) {
        let capacity = worker_queue_size(self.queue_size, count);
        let mut txs = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, mut rx) = mpsc::channel::<Submission>(capacity);
            txs.push(tx);
            let processors = Arc::clone(&self.processors);
            let sinks = Arc::clone(&self.sinks);
            let clock = Arc::clone(&self.clock);
            let dlq = self.dlq.clone();
            let metrics = Arc::clone(&self.metrics);
            self.workers.spawn(async move {
                while let Some(submission) = rx.recv().await {
                    let Submission { mut entry, target } = submission;
                    for processor in processors.iter() {
                        entry = processor.process(entry);
                    }
                    entry.mark_processed(clock.as_ref());

                    // One shallow copy, shared by every sink
                    let shared = Arc::new(entry);
                    match &target {
                        None => {
                            for sink in sinks.iter() {
                                if !sink.is_healthy() {
                                    continue;
                                }
                                if !sink.try_enqueue(Arc::clone(&shared)) {
                                    tracing::debug!(
                                        sink_id = sink.id(),
                                        "sink queue full, skipping entry"
                                    );
                                }
                            }
                        }
                        Some(target) => {
                            deliver_targeted(&sinks, target, shared, &dlq, &clock, &metrics);
                        }
                    }
                }
                tracing::debug!(worker = index, "dispatch worker exited");
            });
        }
        // Old senders drop here; their workers finish their queues
        *self.worker_txs.write() = txs;
    }

    /// Router: dedup on the raw entry, then partition by source so
    /// per-source ordering survives the worker pool.
    fn spawn_router(&self, mut rx: mpsc::Receiver<Submission>) {
        let dedup = Arc::clone(&self.dedup);
        let worker_txs = Arc::clone(&self.worker_txs);
        let metrics = Arc::clone(&self.metrics);
        let clock = Arc::clone(&self.clock);
        let cancel = self.cancel.clone();

        self.workers.spawn(async move {
            loop {
                let submission = tokio::select! {
                    _ = cancel.cancelled() => match rx.try_recv() {
                        Ok(submission) => submission,
                        Err(_) => break,
                    },
                    submission = rx.recv() => match submission {
                        Some(submission) => submission,
                        None => break,
                    },
                };

                // Re-submissions already passed dedup the first time
                if submission.target.is_none()
                    && dedup.is_duplicate(&submission.entry, clock.now())
                {
                    metrics.record_dedup_hit(submission.entry.source_id());
                    continue;
                }

                let tx = {
                    let txs = worker_txs.read();
                    if txs.is_empty() {
                        break;
                    }
                    let index = partition(submission.entry.source_id(), txs.len());
                    txs[index].clone()
                };
                if tx.send(submission).await.is_err() {
                    tracing::warn!("dispatch worker queue closed");
                }
            }
            // Workers exit when the partition senders drop
            tracing::debug!("dispatch router exited");
        });
    }

    fn spawn_dedup_sweeper(&self) {
        let dedup = Arc::clone(&self.dedup);
        let clock = Arc::clone(&self.clock);
        let cancel = self.cancel.clone();
        self.workers.spawn(async move {
            let mut tick = tokio::time::interval(DEDUP_SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        let removed = dedup.purge_expired(clock.now());
                        if removed > 0 {
                            tracing::debug!(removed, "dedup ttl sweep");
                        }
                    }
                }
            }
        });
    }

    /// Graceful shutdown: drain the ingress (bounded), stop workers,
    /// flush and stop every sink, close the DLQ writer. The first
    /// failure wins; overrunning the ceilings reports
    /// `shutdown_timeout`.
    pub async fn stop(self) -> Result<(), DispatchError> {
        tracing::info!("dispatcher stopping");
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while self.queue_len() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok();

        self.cancel.cancel();
        drop(self.tx);
        self.worker_txs.write().clear();
        self.workers.close();
        self.workers.wait().await;

        self.runners.close();
        let sinks_flushed = tokio::time::timeout(self.config.sink_stop_timeout, async {
            self.runners.wait().await;
        })
        .await
        .is_ok();

        let mut first_error: Option<DispatchError> = None;
        if let Some(dlq) = &self.dlq {
            if let Err(e) = dlq.close_active() {
                first_error.get_or_insert(DispatchError::DlqClose(e.to_string()));
            }
        }

        if !drained || !sinks_flushed {
            tracing::error!(drained, sinks_flushed, "shutdown overran its ceiling");
            return Err(first_error.unwrap_or(DispatchError::ShutdownTimeout));
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                tracing::info!("dispatcher stopped");
                Ok(())
            }
        }
    }
}

/// Fan a re-submitted entry to its original sink only, re-dead-
/// lettering on failure so nothing silently disappears.
fn deliver_targeted(
    sinks: &[SinkHandle],
    target: &str,
    shared: Arc<LogEntry>,
    dlq: &Option<Arc<DlqSegmentStore>>,
    clock: &Arc<dyn Clock>,
    metrics: &Arc<PipelineMetrics>,
) {
    let Some(sink) = sinks.iter().find(|s| s.id() == target) else {
        tracing::warn!(sink_id = target, "re-submission target no longer exists");
        return;
    };
    if sink.is_healthy() && sink.try_enqueue(Arc::clone(&shared)) {
        return;
    }

    let Some(dlq) = dlq else {
        tracing::warn!(sink_id = target, "sink still unavailable, dropping re-submission");
        return;
    };
    let now = clock.now();
    let record = drover_core::DlqEntry::new(
        (*shared).clone(),
        target,
        drover_core::ErrorClass::RetriesExhausted,
        0,
        now,
    )
    .with_detail("sink unavailable during reprocessing");
    match dlq.write(&record, now) {
        Ok(_) => {
            metrics.dlq_entries_written.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::error!(sink_id = target, error = %e, "re-dead-letter failed");
        }
    }
}

/// Producer-facing submission handle.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Submission>,
    queue_size: usize,
    backpressure: BackpressureManager,
    metrics: Arc<PipelineMetrics>,
}

impl DispatcherHandle {
    pub fn queue_utilization(&self) -> f64 {
        1.0 - self.tx.capacity() as f64 / self.queue_size as f64
    }

    /// Re-submit a dead-lettered entry to the sink it failed against.
    /// Skips dedup; fan-out is limited to that sink.
    pub fn try_resubmit(&self, entry: LogEntry, sink_id: &str) -> Result<(), IngestError> {
        self.submit(Submission {
            entry,
            target: Some(sink_id.to_string()),
        })
    }

    fn submit(&self, submission: Submission) -> Result<(), IngestError> {
        let utilization = self.queue_utilization();
        self.metrics.set_queue_utilization(utilization);

        match self.backpressure.level(utilization) {
            BackpressureLevel::Reject => {
                self.metrics.queue_rejections.fetch_add(1, Ordering::Relaxed);
                return Err(IngestError::Backpressure);
            }
            BackpressureLevel::Throttle => {
                // Accepted; the gauge above is the throttle signal
            }
            BackpressureLevel::Accept => {}
        }

        match self.tx.try_send(submission) {
            Ok(()) => {
                self.metrics.entries_ingested.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.queue_rejections.fetch_add(1, Ordering::Relaxed);
                Err(IngestError::Backpressure)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestError::Closed),
        }
    }
}

impl Ingest for DispatcherHandle {
    fn try_submit(&self, entry: LogEntry) -> Result<(), IngestError> {
        self.submit(Submission {
            entry,
            target: None,
        })
    }
}

/// Stable source partition. Workers see a fixed slice of sources, so
/// per-source order is preserved across the pool.
fn partition(source_id: &str, buckets: usize) -> usize {
    if buckets == 0 {
        return 0;
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    source_id.hash(&mut hasher);
    (hasher.finish() as usize) % buckets
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
