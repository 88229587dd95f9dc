// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Glob-driven file discovery and per-file tail tasks.
//!
//! Discovery rescans the configured patterns on an interval; each
//! matched file gets a tail task combining filesystem notifications
//! with a polling fallback. Entries rejected by the dispatcher under
//! backpressure land in a bounded per-path retry buffer that drains
//! ahead of new lines, preserving per-source order; overflow is
//! counted as dropped data.

use crate::file::tailer::Tailer;
use drover_core::{
    Clock, Ingest, IngestError, LogEntry, PipelineMetrics, Position, PositionLog, SourceType,
};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashSet, VecDeque};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Tunables for the file monitor.
#[derive(Debug, Clone)]
pub struct FileMonitorConfig {
    /// Glob patterns or literal paths to tail.
    pub patterns: Vec<String>,
    pub discovery_interval: Duration,
    /// Polling fallback cadence for tail reads.
    pub poll_interval: Duration,
    /// Skip files whose mtime at first discovery is older than this.
    pub ignore_older_than: Option<Duration>,
    pub line_delimiter: u8,
    pub line_max_bytes: usize,
    /// Entries held per path while the dispatcher pushes back.
    pub retry_buffer: usize,
}

impl Default for FileMonitorConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            discovery_interval: Duration::from_secs(10),
            poll_interval: Duration::from_millis(250),
            ignore_older_than: None,
            line_delimiter: b'\n',
            line_max_bytes: 256 * 1024,
            retry_buffer: 1024,
        }
    }
}

/// Watches configured paths and streams their lines into the
/// pipeline.
pub struct FileMonitor<I: Ingest> {
    ingest: I,
    positions: Arc<dyn PositionLog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    config: Arc<RwLock<FileMonitorConfig>>,
    cancel: CancellationToken,
    tails: TaskTracker,
    tailed: Arc<Mutex<HashSet<PathBuf>>>,
    ignored: Arc<Mutex<HashSet<PathBuf>>>,
}

impl<I: Ingest> FileMonitor<I> {
    pub fn new(
        config: FileMonitorConfig,
        ingest: I,
        positions: Arc<dyn PositionLog>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            ingest,
            positions,
            clock,
            metrics,
            config: Arc::new(RwLock::new(config)),
            cancel: CancellationToken::new(),
            tails: TaskTracker::new(),
            tailed: Arc::new(Mutex::new(HashSet::new())),
            ignored: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace hot-reloadable tunables (the patterns list included).
    pub fn update_config(&self, config: FileMonitorConfig) {
        *self.config.write() = config;
    }

    pub fn tailed_paths(&self) -> Vec<PathBuf> {
        self.tailed.lock().iter().cloned().collect()
    }

    /// Discovery loop. Runs until `stop`.
    pub async fn run(&self) {
        loop {
            self.discover_once();
            let interval = self.config.read().discovery_interval;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    fn discover_once(&self) {
        let patterns = self.config.read().patterns.clone();
        for path in discover(&patterns) {
            if self.tailed.lock().contains(&path) || self.ignored.lock().contains(&path) {
                continue;
            }
            if self.too_old(&path) {
                tracing::info!(path = %path.display(), "ignoring old file");
                self.metrics.old_file_ignored.fetch_add(1, Ordering::Relaxed);
                self.ignored.lock().insert(path);
                continue;
            }

            tracing::info!(path = %path.display(), "tailing file");
            self.tailed.lock().insert(path.clone());
            let task = TailTask {
                path,
                ingest: self.ingest.clone(),
                positions: Arc::clone(&self.positions),
                clock: Arc::clone(&self.clock),
                metrics: Arc::clone(&self.metrics),
                config: Arc::clone(&self.config),
                cancel: self.cancel.child_token(),
            };
            self.tails.spawn(task.run());
        }
    }

    /// Old-file policy: judged once, at first discovery.
    fn too_old(&self, path: &Path) -> bool {
        let Some(bound) = self.config.read().ignore_older_than else {
            return false;
        };
        let Ok(meta) = std::fs::metadata(path) else {
            return false;
        };
        let Ok(modified) = meta.modified() else {
            return false;
        };
        match modified.elapsed() {
            Ok(age) => age > bound,
            Err(_) => false,
        }
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        self.tails.close();
        self.tails.wait().await;
    }
}

/// Expand patterns into existing file paths.
fn discover(patterns: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for pattern in patterns {
        if !has_glob_meta(pattern) {
            let path = PathBuf::from(pattern);
            if path.is_file() {
                found.push(path);
            }
            continue;
        }

        let Some((base, matcher)) = compile_pattern(pattern) else {
            continue;
        };
        let mut stack = vec![base];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                } else if matcher.is_match(&path) {
                    found.push(path);
                }
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

fn has_glob_meta(pattern: &str) -> bool {
    pattern.contains(['*', '?', '[', '{'])
}

/// Split a pattern into its literal base directory and a matcher for
/// full paths.
fn compile_pattern(pattern: &str) -> Option<(PathBuf, GlobSet)> {
    let path = Path::new(pattern);
    let mut base = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) if has_glob_meta(&part.to_string_lossy()) => break,
            other => base.push(other.as_os_str()),
        }
    }
    if base.as_os_str().is_empty() {
        base.push(".");
    }

    // `*` must not cross directory separators; `**` still does
    let glob = match GlobBuilder::new(pattern).literal_separator(true).build() {
        Ok(g) => g,
        Err(e) => {
            tracing::warn!(pattern, error = %e, "ignoring invalid file pattern");
            return None;
        }
    };
    let mut builder = GlobSetBuilder::new();
    builder.add(glob);
    builder.build().ok().map(|set| (base, set))
}

struct TailTask<I: Ingest> {
    path: PathBuf,
    ingest: I,
    positions: Arc<dyn PositionLog>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PipelineMetrics>,
    config: Arc<RwLock<FileMonitorConfig>>,
    cancel: CancellationToken,
}

impl<I: Ingest> TailTask<I> {
    async fn run(self) {
        let source_id = self.path.to_string_lossy().into_owned();
        let (delimiter, line_max_bytes) = {
            let config = self.config.read();
            (config.line_delimiter, config.line_max_bytes)
        };
        let mut tailer = Tailer::new(&self.path, delimiter, line_max_bytes);
        if let Some(position) = self.positions.load(&source_id) {
            if let Err(e) = tailer.resume_from(&position) {
                tracing::warn!(path = %self.path.display(), error = %e, "resume failed");
            }
        }

        // Notifications wake the loop early; polling is the fallback
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(8);
        let _watcher = create_file_watcher(&self.path, wake_tx);

        let mut retry: VecDeque<LogEntry> = VecDeque::new();

        loop {
            let poll_interval = self.config.read().poll_interval;
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = wake_rx.recv() => {}
                _ = tokio::time::sleep(poll_interval) => {}
            }

            self.drain_retries(&mut retry);

            let outcome = match tailer.poll() {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), error = %e, "tail poll failed");
                    continue;
                }
            };

            for line in outcome.lines {
                let entry = LogEntry::builder(SourceType::File, source_id.clone())
                    .message(line)
                    .label("file", source_id.clone())
                    .build(self.clock.as_ref());
                self.submit_or_buffer(entry, &mut retry);
            }

            // Persist the offset only once everything before it has
            // been accepted; a crash then re-reads, never skips.
            if retry.is_empty() && self.positions.backpressure() < 0.9 {
                let mut position = Position::new(
                    source_id.clone(),
                    SourceType::File,
                    outcome.offset,
                    self.clock.now(),
                );
                if let Some(identity) = tailer.identity() {
                    position = position.with_identity(identity);
                }
                self.positions.store(position);
            }
        }
    }

    fn drain_retries(&self, retry: &mut VecDeque<LogEntry>) {
        while let Some(entry) = retry.pop_front() {
            match self.ingest.try_submit(entry.clone()) {
                Ok(()) => {}
                Err(IngestError::Backpressure) => {
                    retry.push_front(entry);
                    break;
                }
                Err(IngestError::Closed) => {
                    retry.clear();
                    break;
                }
            }
        }
    }

    fn submit_or_buffer(&self, entry: LogEntry, retry: &mut VecDeque<LogEntry>) {
        // Order within the source: nothing may jump the buffer
        if !retry.is_empty() {
            self.buffer(entry, retry);
            return;
        }
        match self.ingest.try_submit(entry.clone()) {
            Ok(()) => {}
            Err(IngestError::Backpressure) => self.buffer(entry, retry),
            Err(IngestError::Closed) => {}
        }
    }

    fn buffer(&self, entry: LogEntry, retry: &mut VecDeque<LogEntry>) {
        let cap = self.config.read().retry_buffer;
        if retry.len() >= cap {
            self.metrics.retry_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(path = %self.path.display(), "retry buffer full, dropping line");
            return;
        }
        retry.push_back(entry);
    }
}

/// Watch one file, sending a unit wake on any event.
fn create_file_watcher(path: &Path, tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        if result.is_ok() {
            let _ = tx.try_send(());
        }
    })
    .ok()?;
    // Watch the parent so rotation (rename + recreate) still wakes us
    let target = path.parent().unwrap_or(path);
    match watcher.watch(target, RecursiveMode::NonRecursive) {
        Ok(()) => Some(watcher),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "file watcher unavailable, polling only");
            None
        }
    }
}

#[cfg(test)]
#[path = "monitor_tests.rs"]
mod tests;
