// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-container follow-mode readers with periodic stream rotation.
//!
//! Each monitored container gets a long-lived heartbeat task
//! (container-scoped) that opens one stream at a time, and a
//! short-lived reader task per stream (stream-scoped). The two
//! lifetimes are tracked by two distinct `TaskTracker`s; the rotation
//! boundary awaits only the reader. A single tracker covering both
//! would deadlock the boundary: the heartbeat would be waiting on a
//! set that includes itself.
//!
//! The reader never blocks indefinitely: every read is wrapped in
//! `read_timeout` (≤ 30 s) and multiplexed against the stream
//! deadline and cancellation, so a rotation or shutdown is observed
//! within one timeout.

use crate::container::ContainerState;
use crate::runtime::{ContainerEvent, ContainerInfo, ContainerRuntime, LogStream};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use drover_core::{
    truncate_line, AdjustmentReason, Clock, Ingest, IngestError, LogEntry, PipelineMetrics,
    Position, PositionLog, SourceType,
};
use globset::{Glob, GlobSet, GlobSetBuilder};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tunables for the container monitor.
#[derive(Debug, Clone)]
pub struct ContainerMonitorConfig {
    /// How long one follow stream lives before forced rotation.
    pub rotation_interval: Duration,
    /// Bound on a single blocking read. Capped at 30 s.
    pub read_timeout: Duration,
    /// Container-name globs; empty matches everything.
    pub name_patterns: Vec<String>,
    /// Labels a container must carry to be monitored.
    pub required_labels: BTreeMap<String, String>,
    /// Container label keys copied onto entries.
    pub forward_labels: Vec<String>,
    /// Per-node ceiling on concurrently streamed containers.
    pub max_streams: usize,
    pub line_max_bytes: usize,
    pub transient_backoff_base: Duration,
    pub transient_backoff_max: Duration,
    /// Safety-net re-list cadence for missed events.
    pub list_interval: Duration,
}

impl Default for ContainerMonitorConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(300),
            read_timeout: Duration::from_secs(30),
            name_patterns: Vec::new(),
            required_labels: BTreeMap::new(),
            forward_labels: Vec::new(),
            max_streams: 128,
            line_max_bytes: 256 * 1024,
            transient_backoff_base: Duration::from_secs(1),
            transient_backoff_max: Duration::from_secs(60),
            list_interval: Duration::from_secs(60),
        }
    }
}

/// Discovers containers and streams their logs into the pipeline.
pub struct ContainerMonitor<I: Ingest, R: ContainerRuntime> {
    runtime: Arc<R>,
    ingest: I,
    positions: Arc<dyn PositionLog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    config: Arc<RwLock<ContainerMonitorConfig>>,
    name_matcher: Arc<RwLock<Option<GlobSet>>>,
    cancel: CancellationToken,
    /// Container-scoped lifetimes.
    heartbeats: TaskTracker,
    /// Stream-scoped lifetimes. Kept separate from `heartbeats`.
    readers: TaskTracker,
    states: Arc<Mutex<HashMap<String, ContainerState>>>,
    stops: Arc<Mutex<HashMap<String, CancellationToken>>>,
    active_streams: Arc<AtomicUsize>,
}

impl<I: Ingest, R: ContainerRuntime> ContainerMonitor<I, R> {
    pub fn new(
        config: ContainerMonitorConfig,
        runtime: Arc<R>,
        ingest: I,
        positions: Arc<dyn PositionLog>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let name_matcher = build_matcher(&config.name_patterns);
        Self {
            runtime,
            ingest,
            positions,
            clock,
            metrics,
            config: Arc::new(RwLock::new(config)),
            name_matcher: Arc::new(RwLock::new(name_matcher)),
            cancel: CancellationToken::new(),
            heartbeats: TaskTracker::new(),
            readers: TaskTracker::new(),
            states: Arc::new(Mutex::new(HashMap::new())),
            stops: Arc::new(Mutex::new(HashMap::new())),
            active_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace hot-reloadable tunables.
    pub fn update_config(&self, config: ContainerMonitorConfig) {
        *self.name_matcher.write() = build_matcher(&config.name_patterns);
        *self.config.write() = config;
    }

    pub fn state_of(&self, id: &str) -> Option<ContainerState> {
        self.states.lock().get(id).copied()
    }

    /// Streams with a live reader right now.
    pub fn active_streams(&self) -> usize {
        self.active_streams.load(Ordering::SeqCst)
    }

    /// Discovery loop: initial list, runtime events, and a periodic
    /// re-list safety net. Runs until `stop`.
    pub async fn run(&self) {
        let mut events = match self.runtime.events(self.cancel.child_token()).await {
            Ok(rx) => Some(rx),
            Err(e) => {
                tracing::warn!(error = %e, "container events unavailable, relying on list polling");
                None
            }
        };

        self.reconcile().await;

        let list_interval = self.config.read().list_interval;
        let mut list_tick = tokio::time::interval(list_interval);
        list_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = list_tick.tick() => self.reconcile().await,
                event = recv_event(&mut events), if events.is_some() => match event {
                    Some(ContainerEvent::Started(info)) => self.track(info),
                    Some(ContainerEvent::Stopped { id }) => self.untrack(&id),
                    None => {
                        tracing::warn!("container event stream closed, relying on list polling");
                        events = None;
                    }
                },
            }
        }
    }

    /// Align tracked containers with a fresh list.
    async fn reconcile(&self) {
        let listed = match self.runtime.list().await {
            Ok(list) => list,
            Err(e) => {
                tracing::warn!(error = %e, "container list failed");
                return;
            }
        };

        let listed_ids: Vec<&str> = listed.iter().map(|c| c.id.as_str()).collect();
        let gone: Vec<String> = {
            let stops = self.stops.lock();
            stops
                .keys()
                .filter(|id| !listed_ids.contains(&id.as_str()))
                .cloned()
                .collect()
        };
        for id in gone {
            self.untrack(&id);
        }

        for info in listed {
            self.track(info);
        }
    }

    /// Start monitoring a container if it matches the filters and is
    /// not already tracked.
    fn track(&self, info: ContainerInfo) {
        if !self.matches(&info) {
            return;
        }
        {
            let mut stops = self.stops.lock();
            if stops.contains_key(&info.id) {
                return;
            }
            stops.insert(info.id.clone(), self.cancel.child_token());
        }
        self.states
            .lock()
            .insert(info.id.clone(), ContainerState::Discovered);

        tracing::info!(container_id = %info.id, name = %info.name, "monitoring container");

        let ctx = HeartbeatCtx {
            runtime: Arc::clone(&self.runtime),
            ingest: self.ingest.clone(),
            positions: Arc::clone(&self.positions),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
            config: Arc::clone(&self.config),
            readers: self.readers.clone(),
            states: Arc::clone(&self.states),
            active_streams: Arc::clone(&self.active_streams),
            stop: self
                .stops
                .lock()
                .get(&info.id)
                .cloned()
                .unwrap_or_else(CancellationToken::new),
        };
        self.heartbeats.spawn(heartbeat(info, ctx));
    }

    /// Stop monitoring and release the container's resources.
    fn untrack(&self, id: &str) {
        let token = self.stops.lock().remove(id);
        if let Some(token) = token {
            tracing::info!(container_id = %id, "container gone, stopping monitor");
            token.cancel();
            self.positions.remove(id);
        }
    }

    fn matches(&self, info: &ContainerInfo) -> bool {
        let config = self.config.read();
        for (key, value) in &config.required_labels {
            if info.labels.get(key) != Some(value) {
                return false;
            }
        }
        drop(config);

        match self.name_matcher.read().as_ref() {
            Some(matcher) => matcher.is_match(&info.name),
            None => true,
        }
    }

    /// Cancel everything and wait for both trackers: heartbeats
    /// first (they own the readers' lifecycle), then readers.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.heartbeats.close();
        self.heartbeats.wait().await;
        self.readers.close();
        self.readers.wait().await;
        let mut states = self.states.lock();
        for state in states.values_mut() {
            *state = state.transition(ContainerState::Stopped);
        }
    }
}

fn build_matcher(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        match Glob::new(pattern) {
            Ok(glob) => {
                builder.add(glob);
            }
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid container name pattern");
            }
        }
    }
    builder.build().ok()
}

async fn recv_event(
    events: &mut Option<tokio::sync::mpsc::Receiver<ContainerEvent>>,
) -> Option<ContainerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct HeartbeatCtx<I: Ingest, R: ContainerRuntime> {
    runtime: Arc<R>,
    ingest: I,
    positions: Arc<dyn PositionLog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    config: Arc<RwLock<ContainerMonitorConfig>>,
    readers: TaskTracker,
    states: Arc<Mutex<HashMap<String, ContainerState>>>,
    active_streams: Arc<AtomicUsize>,
    stop: CancellationToken,
}

impl<I: Ingest, R: ContainerRuntime> HeartbeatCtx<I, R> {
    fn set_state(&self, id: &str, next: ContainerState) {
        let mut states = self.states.lock();
        if let Some(state) = states.get_mut(id) {
            *state = state.transition(next);
        }
    }
}

/// Container-scoped control loop: opens one stream at a time, awaits
/// its reader, rotates, and backs off on transient failures.
async fn heartbeat<I: Ingest, R: ContainerRuntime>(info: ContainerInfo, ctx: HeartbeatCtx<I, R>) {
    let id = info.id.clone();
    let mut cursor = ctx
        .positions
        .load(&id)
        .map(|p| DateTime::from_timestamp_nanos(p.offset as i64))
        .unwrap_or_else(|| ctx.clock.now());
    let mut backoff = ctx.config.read().transient_backoff_base;

    loop {
        if ctx.stop.is_cancelled() {
            break;
        }

        let (rotation_interval, read_timeout, max_streams) = {
            let config = ctx.config.read();
            (
                config.rotation_interval,
                config.read_timeout.min(Duration::from_secs(30)),
                config.max_streams,
            )
        };

        if ctx.active_streams.load(Ordering::SeqCst) >= max_streams {
            tracing::warn!(container_id = %id, "stream ceiling reached, waiting");
            if sleep_or_cancel(Duration::from_secs(1), &ctx.stop).await {
                break;
            }
            continue;
        }

        let stream = match ctx.runtime.follow_logs(&id, cursor).await {
            Ok(stream) => stream,
            Err(e) if e.is_transient() => {
                tracing::debug!(container_id = %id, error = %e, "stream open failed, backing off");
                if sleep_or_cancel(backoff, &ctx.stop).await {
                    break;
                }
                backoff = (backoff * 2).min(ctx.config.read().transient_backoff_max);
                continue;
            }
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "stream open failed");
                if sleep_or_cancel(backoff, &ctx.stop).await {
                    break;
                }
                backoff = (backoff * 2).min(ctx.config.read().transient_backoff_max);
                continue;
            }
        };

        backoff = ctx.config.read().transient_backoff_base;
        ctx.set_state(&id, ContainerState::Streaming);
        ctx.active_streams.fetch_add(1, Ordering::SeqCst);

        let reader_ctx = ReaderCtx {
            info: info.clone(),
            ingest: ctx.ingest.clone(),
            positions: Arc::clone(&ctx.positions),
            clock: Arc::clone(&ctx.clock),
            config: Arc::clone(&ctx.config),
            stop: ctx.stop.clone(),
        };
        // Rotation boundary: await the reader task only. Readers are
        // tracked separately from heartbeats.
        let handle = ctx
            .readers
            .spawn(read_stream(stream, cursor, rotation_interval, read_timeout, reader_ctx));
        let outcome = match handle.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(container_id = %id, error = %e, "reader task failed");
                ReaderOutcome {
                    cursor,
                    exit: ReaderExit::Failed,
                }
            }
        };
        ctx.active_streams.fetch_sub(1, Ordering::SeqCst);
        cursor = outcome.cursor;

        match outcome.exit {
            ReaderExit::Deadline => {
                ctx.set_state(&id, ContainerState::Rotating);
                ctx.metrics.stream_rotations.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(container_id = %id, "stream rotated");
            }
            ReaderExit::Eof | ReaderExit::Failed => {
                if sleep_or_cancel(backoff, &ctx.stop).await {
                    break;
                }
                backoff = (backoff * 2).min(ctx.config.read().transient_backoff_max);
            }
            ReaderExit::Cancelled => break,
        }
    }

    ctx.set_state(&id, ContainerState::Stopped);
    tracing::debug!(container_id = %id, "heartbeat exited");
}

/// `true` when the token fired before the delay elapsed.
async fn sleep_or_cancel(delay: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

struct ReaderCtx<I: Ingest> {
    info: ContainerInfo,
    ingest: I,
    positions: Arc<dyn PositionLog>,
    clock: Arc<dyn Clock>,
    config: Arc<RwLock<ContainerMonitorConfig>>,
    stop: CancellationToken,
}

#[derive(Debug)]
struct ReaderOutcome {
    cursor: DateTime<Utc>,
    exit: ReaderExit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderExit {
    /// Stream deadline fired; rotation proceeds.
    Deadline,
    /// Runtime ended the stream.
    Eof,
    Failed,
    Cancelled,
}

/// Stream-scoped reader: multiplexes bounded reads against the
/// rotation deadline and cancellation, exits on the first signal.
async fn read_stream<I: Ingest>(
    mut stream: Box<dyn LogStream>,
    mut cursor: DateTime<Utc>,
    rotation_interval: Duration,
    read_timeout: Duration,
    ctx: ReaderCtx<I>,
) -> ReaderOutcome {
    let deadline = tokio::time::sleep(rotation_interval);
    tokio::pin!(deadline);

    let exit = loop {
        tokio::select! {
            _ = ctx.stop.cancelled() => break ReaderExit::Cancelled,
            _ = &mut deadline => break ReaderExit::Deadline,
            read = tokio::time::timeout(read_timeout, stream.next_line()) => match read {
                // Idle read; rotation still proceeds on schedule
                Err(_elapsed) => continue,
                Ok(Ok(Some(line))) => {
                    if let Some(ts) = handle_line(&ctx, line, cursor) {
                        cursor = ts;
                    }
                }
                Ok(Ok(None)) => break ReaderExit::Eof,
                Ok(Err(e)) => {
                    tracing::debug!(container_id = %ctx.info.id, error = %e, "stream read failed");
                    break ReaderExit::Failed;
                }
            },
        }
    };

    stream.close().await;
    ReaderOutcome { cursor, exit }
}

/// Build and submit one entry; returns the advanced cursor on
/// success.
fn handle_line<I: Ingest>(
    ctx: &ReaderCtx<I>,
    line: crate::runtime::ContainerLogLine,
    cursor: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let config = ctx.config.read();
    let message = truncate_line(&line.message, config.line_max_bytes);

    let mut builder = LogEntry::builder(SourceType::Container, &ctx.info.id)
        .message(message)
        .label("container", &ctx.info.name)
        .label("image", &ctx.info.image)
        .label("stream", line.stream.as_str());
    for key in &config.forward_labels {
        if let Some(value) = ctx.info.labels.get(key) {
            builder = builder.label(key.clone(), value.clone());
        }
    }
    drop(config);

    let claimed = line.timestamp;
    if let Some(ts) = claimed {
        builder = builder.original_timestamp(ts);
    }
    let mut entry = builder.build(ctx.clock.as_ref());
    if claimed.is_none() {
        let now = ctx.clock.now();
        entry.adjust_timestamp(
            AdjustmentReason::InvalidFallback,
            now,
            "containermonitor",
            Some("runtime supplied no parsable timestamp".to_string()),
            ctx.clock.as_ref(),
        );
    }

    match ctx.ingest.try_submit(entry) {
        Ok(()) => {
            let next = claimed
                .map(|ts| ts + ChronoDuration::nanoseconds(1))
                .unwrap_or(cursor)
                .max(cursor);
            // Coalesce under save-path pressure; the cursor survives
            // in memory and lands on the next quiet store.
            if ctx.positions.backpressure() < 0.9 {
                ctx.positions.store(Position::new(
                    &ctx.info.id,
                    SourceType::Container,
                    next.timestamp_nanos_opt().unwrap_or(0).max(0) as u64,
                    ctx.clock.now(),
                ));
            }
            Some(next)
        }
        Err(IngestError::Backpressure) => {
            tracing::debug!(container_id = %ctx.info.id, "dropping line under backpressure");
            None
        }
        Err(IngestError::Closed) => None,
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
