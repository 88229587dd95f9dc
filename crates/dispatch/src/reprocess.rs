// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DLQ reprocessing.
//!
//! Reads closed segments oldest-first and re-submits their entries to
//! the dispatcher under a rate cap. A segment is archived only when
//! every entry in it has been accepted; backpressure pauses the round
//! and the segment is retried next time, resuming after its accepted
//! prefix. Re-submissions bypass dedup by design, so the resume
//! cursor is what keeps a deferred segment from delivering its
//! prefix to the target sink twice. Archives past retention are
//! deleted.

use crate::dispatcher::DispatcherHandle;
use drover_core::{Clock, IngestError, LogEntry, PipelineMetrics};
use drover_storage::{DlqSegmentStore, SegmentRef};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Targeted re-submission back into the pipeline. Implemented by
/// [`DispatcherHandle`]; tests substitute fakes.
pub trait Resubmit: Clone + Send + Sync + 'static {
    fn try_resubmit(&self, entry: LogEntry, sink_id: &str) -> Result<(), IngestError>;
}

impl Resubmit for DispatcherHandle {
    fn try_resubmit(&self, entry: LogEntry, sink_id: &str) -> Result<(), IngestError> {
        DispatcherHandle::try_resubmit(self, entry, sink_id)
    }
}

/// Reprocessing tunables.
#[derive(Debug, Clone)]
pub struct ReprocessConfig {
    /// How often to scan for reprocessable segments.
    pub scan_interval: Duration,
    /// Re-submissions per second.
    pub rate_limit: u32,
    /// How long archived segments are kept.
    pub retention: Duration,
}

impl Default for ReprocessConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            rate_limit: 1000,
            retention: Duration::from_secs(24 * 3600),
        }
    }
}

/// Outcome of one reprocessing round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReprocessStats {
    pub resubmitted: usize,
    pub segments_archived: usize,
    pub archives_purged: usize,
    /// True when backpressure cut the round short.
    pub deferred: bool,
}

/// How far a deferred round got into one segment. Segments are
/// append-only and closed, so an entry index is a stable cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SegmentProgress {
    path: PathBuf,
    submitted: usize,
}

/// Drains the DLQ back into the dispatcher.
pub struct DlqReprocessor<R: Resubmit> {
    store: Arc<DlqSegmentStore>,
    ingest: R,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    config: ReprocessConfig,
    /// Resume cursor for the segment a deferred round stopped in.
    resume: Mutex<Option<SegmentProgress>>,
}

impl<R: Resubmit> DlqReprocessor<R> {
    pub fn new(
        store: Arc<DlqSegmentStore>,
        ingest: R,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
        config: ReprocessConfig,
    ) -> Self {
        Self {
            store,
            ingest,
            clock,
            metrics,
            config,
            resume: Mutex::new(None),
        }
    }

    /// Periodic loop. Runs until the token fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.scan_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    match self.run_once(&cancel).await {
                        Ok(stats) if stats.resubmitted > 0 || stats.segments_archived > 0 => {
                            tracing::info!(
                                resubmitted = stats.resubmitted,
                                archived = stats.segments_archived,
                                purged = stats.archives_purged,
                                deferred = stats.deferred,
                                "dlq reprocessing round"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            tracing::warn!(error = %e, "dlq reprocessing failed");
                        }
                    }
                }
            }
        }
    }

    /// One pass over the closed segments.
    pub async fn run_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReprocessStats, drover_storage::DlqError> {
        let mut stats = ReprocessStats::default();
        let delay = Duration::from_secs(1)
            .checked_div(self.config.rate_limit.max(1))
            .unwrap_or(Duration::from_millis(1));
        let resume = self.resume.lock().take();

        'segments: for segment in self.store.segments()? {
            let entries = self.store.read_segment(&segment)?;
            // A previous round may have been cut off mid-segment; its
            // accepted prefix must not be resent (no dedup on this
            // path)
            let skip = match &resume {
                Some(progress) if progress.path == segment.path => progress.submitted,
                _ => 0,
            };
            for (index, record) in entries.iter().enumerate().skip(skip) {
                if cancel.is_cancelled() {
                    self.defer(&segment, index, &mut stats);
                    break 'segments;
                }
                match self
                    .ingest
                    .try_resubmit(record.entry.clone(), &record.failed_sink)
                {
                    Ok(()) => {
                        stats.resubmitted += 1;
                        self.metrics
                            .dlq_entries_reprocessed
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    Err(IngestError::Backpressure) | Err(IngestError::Closed) => {
                        // The rest of this segment waits for the next
                        // round, resuming at this entry
                        self.defer(&segment, index, &mut stats);
                        break 'segments;
                    }
                }
                tokio::time::sleep(delay).await;
            }
            self.store.archive(&segment)?;
            stats.segments_archived += 1;
        }

        stats.archives_purged = self
            .store
            .purge_archives(self.config.retention, self.clock.now())?;
        Ok(stats)
    }

    /// Remember where a cut-off round stopped in a segment.
    fn defer(&self, segment: &SegmentRef, submitted: usize, stats: &mut ReprocessStats) {
        *self.resume.lock() = Some(SegmentProgress {
            path: segment.path.clone(),
            submitted,
        });
        stats.deferred = true;
    }
}

#[cfg(test)]
#[path = "reprocess_tests.rs"]
mod tests;
