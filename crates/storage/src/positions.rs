// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The position store: durable per-source tail offsets.
//!
//! The in-memory table absorbs updates without blocking; a flush
//! serializes the table and writes it atomically (temp file + fsync +
//! rename + directory fsync). Producers coalesce naturally because
//! updates overwrite per source between flushes. The flush cadence is
//! adaptive: idle stores flush slowly, busy stores flush near the
//! configured minimum so the crash data-loss window stays small.
//!
//! Startup validates the live file and falls back through checkpoint
//! generations, newest first. A store that exhausts every recovery
//! source starts empty and reports the corruption exactly once.

use crate::checkpoint::{CheckpointError, Checkpoints};
use drover_core::{PipelineMetrics, Position};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Current schema version of `positions.json`.
const SCHEMA_VERSION: u32 = 1;

/// Update rate (entries/s) at or below which the store idles at
/// `flush_interval_max`.
const IDLE_RATE: f64 = 10.0;

/// Update rate at or above which the store flushes at
/// `flush_interval_min`.
const BUSY_RATE: f64 = 10_000.0;

/// Errors from the position store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
    #[error("invalid positions file: {0}")]
    Invalid(String),
}

/// Tunables for the store.
#[derive(Debug, Clone)]
pub struct PositionStoreConfig {
    /// Path of the live `positions.json`.
    pub path: PathBuf,
    pub flush_interval_min: Duration,
    pub flush_interval_max: Duration,
    /// Checkpoint generations to keep.
    pub generations: usize,
    /// Flushes between checkpoint rotations.
    pub checkpoint_every: u32,
    /// Pending updates at which `backpressure()` reads 1.0.
    pub backpressure_threshold: u64,
}

impl Default for PositionStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("positions.json"),
            flush_interval_min: Duration::from_millis(500),
            flush_interval_max: Duration::from_secs(5),
            generations: 3,
            checkpoint_every: 10,
            backpressure_threshold: 10_000,
        }
    }
}

/// On-disk schema. Positions are stored as a list so duplicate
/// source ids are detectable at validation time.
#[derive(Debug, Serialize, Deserialize)]
struct PositionsFile {
    version: u32,
    positions: Vec<Position>,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushStats {
    pub positions: usize,
    /// Set when this flush also rotated a checkpoint generation.
    pub checkpoint_generation: Option<u64>,
}

/// Durable map of `source_id → Position`.
pub struct PositionStore {
    config: PositionStoreConfig,
    checkpoints: Checkpoints,
    table: RwLock<HashMap<String, Position>>,
    /// Updates recorded since the last flush.
    pending: AtomicU64,
    flushes_since_checkpoint: AtomicU32,
    /// Serializes the write path; readers never take it.
    flush_lock: Mutex<FlushState>,
    metrics: Arc<PipelineMetrics>,
}

#[derive(Debug)]
struct FlushState {
    last_flush: Instant,
}

impl PositionStore {
    /// Open the store, validating the live file and recovering from
    /// checkpoints if needed.
    pub fn open(
        config: PositionStoreConfig,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self, StoreError> {
        let checkpoint_dir = config
            .path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("checkpoints");
        let checkpoints = Checkpoints::new(checkpoint_dir, config.generations);

        let table = Self::load_or_recover(&config.path, &checkpoints, &metrics)?;

        Ok(Self {
            config,
            checkpoints,
            table: RwLock::new(table),
            pending: AtomicU64::new(0),
            flushes_since_checkpoint: AtomicU32::new(0),
            flush_lock: Mutex::new(FlushState {
                last_flush: Instant::now(),
            }),
            metrics,
        })
    }

    fn load_or_recover(
        path: &Path,
        checkpoints: &Checkpoints,
        metrics: &PipelineMetrics,
    ) -> Result<HashMap<String, Position>, StoreError> {
        match read_and_validate(path) {
            Ok(Some(table)) => return Ok(table),
            Ok(None) => return Ok(HashMap::new()),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "positions file failed validation, attempting checkpoint recovery"
                );
                metrics
                    .position_corruption_detected
                    .fetch_add(1, Ordering::Relaxed);
            }
        }

        for candidate in checkpoints.recovery_candidates()? {
            match read_and_validate(&candidate) {
                Ok(Some(table)) => {
                    tracing::info!(
                        checkpoint = %candidate.display(),
                        positions = table.len(),
                        "recovered positions from checkpoint"
                    );
                    return Ok(table);
                }
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(
                        checkpoint = %candidate.display(),
                        error = %e,
                        "checkpoint failed validation, trying older generation"
                    );
                }
            }
        }

        tracing::error!(
            path = %path.display(),
            "all recovery sources failed, starting with empty positions"
        );
        Ok(HashMap::new())
    }

    /// Upsert a position. Never blocks on I/O.
    pub fn record(&self, position: Position) {
        let mut table = self.table.write();
        table.insert(position.source_id.clone(), position);
        drop(table);

        self.pending.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_position_backpressure(self.backpressure());
    }

    pub fn get(&self, source_id: &str) -> Option<Position> {
        self.table.read().get(source_id).cloned()
    }

    /// Drop a source that was explicitly removed.
    pub fn remove(&self, source_id: &str) {
        if self.table.write().remove(source_id).is_some() {
            self.pending.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn all(&self) -> Vec<Position> {
        self.table.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.read().is_empty()
    }

    /// Save-path saturation in `[0, 1]`; producers should coalesce
    /// updates when this is high.
    pub fn backpressure(&self) -> f64 {
        let pending = self.pending.load(Ordering::Relaxed) as f64;
        (pending / self.config.backpressure_threshold as f64).min(1.0)
    }

    /// Next flush delay, shrinking from `flush_interval_max` toward
    /// `flush_interval_min` as the update rate grows.
    pub fn adaptive_interval(&self) -> Duration {
        let elapsed = self.flush_lock.lock().last_flush.elapsed();
        let pending = self.pending.load(Ordering::Relaxed) as f64;
        let rate = pending / elapsed.as_secs_f64().max(0.001);
        interval_for_rate(
            rate,
            self.config.flush_interval_min,
            self.config.flush_interval_max,
        )
    }

    /// Write the table to disk. Serialized internally; a checkpoint
    /// generation is rotated every `checkpoint_every` flushes.
    pub fn flush(&self) -> Result<FlushStats, StoreError> {
        let mut state = self.flush_lock.lock();

        let data = {
            let table = self.table.read();
            let mut positions: Vec<Position> = table.values().cloned().collect();
            positions.sort_by(|a, b| a.source_id.cmp(&b.source_id));
            serde_json::to_vec_pretty(&PositionsFile {
                version: SCHEMA_VERSION,
                positions,
            })?
        };

        write_atomic(&self.config.path, &data)?;
        let positions = self.table.read().len();

        self.pending.store(0, Ordering::Relaxed);
        self.metrics.set_position_backpressure(0.0);
        state.last_flush = Instant::now();

        let flushes = self.flushes_since_checkpoint.fetch_add(1, Ordering::Relaxed) + 1;
        let checkpoint_generation = if flushes >= self.config.checkpoint_every {
            self.flushes_since_checkpoint.store(0, Ordering::Relaxed);
            Some(self.checkpoints.write_next(&data)?)
        } else {
            None
        };

        Ok(FlushStats {
            positions,
            checkpoint_generation,
        })
    }

    /// Flush and rotate a checkpoint unconditionally. Used on clean
    /// shutdown.
    pub fn force_flush(&self) -> Result<FlushStats, StoreError> {
        self.flushes_since_checkpoint
            .store(self.config.checkpoint_every, Ordering::Relaxed);
        self.flush()
    }

    /// Whether there are updates that have not reached disk.
    pub fn dirty(&self) -> bool {
        self.pending.load(Ordering::Relaxed) > 0
    }
}

impl drover_core::PositionLog for PositionStore {
    fn load(&self, source_id: &str) -> Option<Position> {
        self.get(source_id)
    }

    fn store(&self, position: Position) {
        self.record(position);
    }

    fn remove(&self, source_id: &str) {
        PositionStore::remove(self, source_id);
    }

    fn backpressure(&self) -> f64 {
        PositionStore::backpressure(self)
    }
}

/// Map an update rate to a flush interval, interpolating between the
/// bounds on a log scale.
fn interval_for_rate(rate: f64, min: Duration, max: Duration) -> Duration {
    if rate <= IDLE_RATE {
        return max;
    }
    if rate >= BUSY_RATE {
        return min;
    }
    let t = (rate.ln() - IDLE_RATE.ln()) / (BUSY_RATE.ln() - IDLE_RATE.ln());
    let secs = max.as_secs_f64() + t * (min.as_secs_f64() - max.as_secs_f64());
    Duration::from_secs_f64(secs)
}

/// Read and validate a positions file.
///
/// `Ok(None)` means the file does not exist; validation failures are
/// errors so the caller can fall back to checkpoints.
fn read_and_validate(path: &Path) -> Result<Option<HashMap<String, Position>>, StoreError> {
    let data = match fs::read(path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let file: PositionsFile = serde_json::from_slice(&data)?;
    if file.version != SCHEMA_VERSION {
        return Err(StoreError::Invalid(format!(
            "unsupported schema version {}",
            file.version
        )));
    }

    let mut table = HashMap::with_capacity(file.positions.len());
    for position in file.positions {
        if table.insert(position.source_id.clone(), position).is_some() {
            return Err(StoreError::Invalid("duplicate source_id".to_string()));
        }
    }
    Ok(Some(table))
}

/// Write via temp file, fsync, atomic rename, then directory fsync so
/// the rename survives power loss.
fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    if let Some(parent) = path.parent() {
        let dir = File::open(parent)?;
        dir.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "positions_tests.rs"]
mod tests;
