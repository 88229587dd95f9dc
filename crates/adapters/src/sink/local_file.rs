// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local rotating-file transport.
//!
//! Writes newline-delimited JSON records to `<prefix>.jsonl` in the
//! configured directory. The live file rotates on size or age to
//! `<prefix>-<ts>.jsonl`, optionally gzipped; the oldest rotated
//! files are deleted to honor the total-size and retention-age
//! budgets.

use super::{SinkTransport, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use drover_core::{Batch, Clock, ErrorClass};
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for one local-file destination.
#[derive(Debug, Clone)]
pub struct LocalFileConfig {
    pub id: String,
    pub directory: PathBuf,
    pub prefix: String,
    /// Rotate when the live file exceeds this size.
    pub rotate_bytes: u64,
    /// Rotate when the live file is older than this.
    pub rotate_age: Duration,
    pub compress: bool,
    /// Delete oldest rotated files beyond this total size.
    pub retention_total_bytes: u64,
    /// Delete rotated files older than this.
    pub retention_age: Duration,
}

impl Default for LocalFileConfig {
    fn default() -> Self {
        Self {
            id: "localfile".to_string(),
            directory: PathBuf::from("local_file_sink"),
            prefix: "drover".to_string(),
            rotate_bytes: 64 << 20,
            rotate_age: Duration::from_secs(3600),
            compress: true,
            retention_total_bytes: 1 << 30,
            retention_age: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

struct ActiveFile {
    writer: BufWriter<File>,
    bytes: u64,
    opened_at: DateTime<Utc>,
}

/// Rotating newline-delimited JSON sink on the local disk.
pub struct LocalFileTransport {
    config: LocalFileConfig,
    clock: Arc<dyn Clock>,
    active: Mutex<Option<ActiveFile>>,
}

impl LocalFileTransport {
    pub fn new(config: LocalFileConfig, clock: Arc<dyn Clock>) -> Result<Self, TransportError> {
        fs::create_dir_all(&config.directory).map_err(io_err)?;
        Ok(Self {
            config,
            clock,
            active: Mutex::new(None),
        })
    }

    fn live_path(&self) -> PathBuf {
        self.config
            .directory
            .join(format!("{}.jsonl", self.config.prefix))
    }

    /// Append the batch, rotating first if the live file is over
    /// budget.
    fn write_batch(&self, batch: &Batch) -> Result<(), TransportError> {
        let now = self.clock.now();
        let mut active = self.active.lock();

        if let Some(file) = active.as_ref() {
            let age = (now - file.opened_at).to_std().unwrap_or(Duration::ZERO);
            if file.bytes >= self.config.rotate_bytes || age >= self.config.rotate_age {
                if let Some(file) = active.take() {
                    self.rotate(file, now)?;
                }
            }
        }

        if active.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.live_path())
                .map_err(io_err)?;
            let bytes = file.metadata().map_err(io_err)?.len();
            *active = Some(ActiveFile {
                writer: BufWriter::new(file),
                bytes,
                opened_at: now,
            });
        }

        if let Some(file) = active.as_mut() {
            for entry in batch.entries() {
                let mut line = serde_json::to_vec(&**entry).map_err(|e| {
                    TransportError::new(ErrorClass::InternalInvariant, format!("encode: {e}"))
                })?;
                line.push(b'\n');
                file.writer.write_all(&line).map_err(io_err)?;
                file.bytes += line.len() as u64;
            }
            file.writer.flush().map_err(io_err)?;
        }
        Ok(())
    }

    /// Close the live file, stamp it, compress if configured, and
    /// prune old rotations.
    fn rotate(&self, mut file: ActiveFile, now: DateTime<Utc>) -> Result<(), TransportError> {
        file.writer.flush().map_err(io_err)?;
        file.writer.get_ref().sync_all().map_err(io_err)?;
        drop(file);

        let stamp = now.timestamp_millis();
        let rotated = self
            .config
            .directory
            .join(format!("{}-{stamp}.jsonl", self.config.prefix));
        fs::rename(self.live_path(), &rotated).map_err(io_err)?;

        if self.config.compress {
            compress_file(&rotated).map_err(io_err)?;
        }

        self.prune(now)?;
        Ok(())
    }

    /// Enforce the retention budgets over rotated files.
    fn prune(&self, now: DateTime<Utc>) -> Result<(), TransportError> {
        let mut rotated: Vec<(PathBuf, i64, u64)> = Vec::new();
        for entry in fs::read_dir(&self.config.directory).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            let path = entry.path();
            let Some(stamp) = rotated_stamp(&path, &self.config.prefix) else {
                continue;
            };
            let size = entry.metadata().map_err(io_err)?.len();
            rotated.push((path, stamp, size));
        }
        rotated.sort_by_key(|(_, stamp, _)| *stamp);

        let age_cutoff = now.timestamp_millis() - self.config.retention_age.as_millis() as i64;
        let mut total: u64 = rotated.iter().map(|(_, _, size)| *size).sum();

        for (path, stamp, size) in &rotated {
            let over_budget = total > self.config.retention_total_bytes;
            let too_old = *stamp < age_cutoff;
            if !over_budget && !too_old {
                break;
            }
            fs::remove_file(path).map_err(io_err)?;
            total -= size;
            tracing::debug!(path = %path.display(), "pruned rotated sink file");
        }
        Ok(())
    }

    /// Flush and fsync the live file (shutdown path).
    pub fn flush(&self) -> Result<(), TransportError> {
        if let Some(file) = self.active.lock().as_mut() {
            file.writer.flush().map_err(io_err)?;
            file.writer.get_ref().sync_all().map_err(io_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl SinkTransport for LocalFileTransport {
    fn id(&self) -> &str {
        &self.config.id
    }

    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        self.write_batch(batch)
    }
}

/// Disk trouble is worth retrying; the volume may come back.
fn io_err(e: std::io::Error) -> TransportError {
    TransportError::new(ErrorClass::TransientNetwork, e.to_string())
}

/// Replace `path` with `path.gz`.
fn compress_file(path: &Path) -> std::io::Result<()> {
    let data = fs::read(path)?;
    let gz_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(".gz");
        PathBuf::from(os)
    };
    let file = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder.write_all(&data)?;
    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    fs::remove_file(path)?;
    Ok(())
}

/// Parse `<prefix>-<ms>.jsonl[.gz]` into its timestamp.
fn rotated_stamp(path: &Path, prefix: &str) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name
        .strip_suffix(".jsonl.gz")
        .or_else(|| name.strip_suffix(".jsonl"))?;
    stem.strip_prefix(prefix)?.strip_prefix('-')?.parse().ok()
}

#[cfg(test)]
#[path = "local_file_tests.rs"]
mod tests;
