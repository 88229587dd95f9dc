// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dead-letter queue segments.
//!
//! Entries that failed terminally are appended as newline-delimited
//! JSON to `segment-<ts>.jsonl` files. The active segment is fsynced
//! when it closes; a crash mid-write can lose only the trailing
//! partial line, which startup detects by parse failure and truncates
//! away. Drained segments are archived as `.done` and deleted after a
//! retention period.

use chrono::{DateTime, Utc};
use drover_core::DlqEntry;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors from DLQ operations
#[derive(Debug, Error)]
pub enum DlqError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A closed segment eligible for reprocessing, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentRef {
    pub path: PathBuf,
    /// Creation timestamp embedded in the file name (ms since epoch).
    pub created_ms: i64,
}

/// Outcome of one append.
#[derive(Debug, Clone, Copy)]
pub struct DlqWriteOutcome {
    /// True when the append closed the previous segment.
    pub rotated: bool,
}

struct ActiveSegment {
    path: PathBuf,
    writer: BufWriter<File>,
    bytes: u64,
    entries: u64,
}

/// Append-only segmented store under one directory.
pub struct DlqSegmentStore {
    dir: PathBuf,
    segment_max_bytes: u64,
    segment_max_entries: u64,
    active: Mutex<Option<ActiveSegment>>,
}

impl DlqSegmentStore {
    /// Open the store, repairing a torn trailing line in the newest
    /// segment if the previous process died mid-write.
    pub fn open(
        dir: impl Into<PathBuf>,
        segment_max_bytes: u64,
        segment_max_entries: u64,
    ) -> Result<Self, DlqError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let store = Self {
            dir,
            segment_max_bytes,
            segment_max_entries,
            active: Mutex::new(None),
        };
        store.repair_newest_segment()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry, rotating the segment when it exceeds the
    /// size or entry budget.
    pub fn write(&self, entry: &DlqEntry, now: DateTime<Utc>) -> Result<DlqWriteOutcome, DlqError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut active = self.active.lock();
        let mut rotated = false;

        if let Some(segment) = active.as_ref() {
            if segment.bytes + line.len() as u64 > self.segment_max_bytes
                || segment.entries >= self.segment_max_entries
            {
                if let Some(segment) = active.take() {
                    close_segment(segment)?;
                    rotated = true;
                }
            }
        }

        if active.is_none() {
            *active = Some(self.open_segment(now)?);
        }

        // Invariant: populated just above
        if let Some(segment) = active.as_mut() {
            segment.writer.write_all(&line)?;
            segment.writer.flush()?;
            segment.bytes += line.len() as u64;
            segment.entries += 1;
        }

        Ok(DlqWriteOutcome { rotated })
    }

    /// Close the active segment, making it durable and eligible for
    /// reprocessing.
    pub fn close_active(&self) -> Result<(), DlqError> {
        if let Some(segment) = self.active.lock().take() {
            close_segment(segment)?;
        }
        Ok(())
    }

    /// Closed segments, oldest first. The active segment is excluded.
    pub fn segments(&self) -> Result<Vec<SegmentRef>, DlqError> {
        let active_path = self.active.lock().as_ref().map(|s| s.path.clone());
        let mut segments = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if Some(&path) == active_path.as_ref() {
                continue;
            }
            if let Some(created_ms) = parse_segment_name(&path) {
                segments.push(SegmentRef { path, created_ms });
            }
        }
        segments.sort_by_key(|s| s.created_ms);
        Ok(segments)
    }

    /// Read every complete entry from a segment. A torn trailing line
    /// ends the read without failing it.
    pub fn read_segment(&self, segment: &SegmentRef) -> Result<Vec<DlqEntry>, DlqError> {
        let file = File::open(&segment.path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(
                        segment = %segment.path.display(),
                        error = %e,
                        "stopping segment read at unparsable line"
                    );
                    break;
                }
            }
        }
        Ok(entries)
    }

    /// Mark a fully reprocessed segment as archived.
    pub fn archive(&self, segment: &SegmentRef) -> Result<(), DlqError> {
        let mut archived = segment.path.clone().into_os_string();
        archived.push(".done");
        fs::rename(&segment.path, PathBuf::from(archived))?;
        Ok(())
    }

    /// Delete archived segments older than the retention period.
    /// Returns how many were removed.
    pub fn purge_archives(&self, retention: Duration, now: DateTime<Utc>) -> Result<usize, DlqError> {
        let cutoff_ms = now.timestamp_millis() - retention.as_millis() as i64;
        let mut purged = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(stem) = archived_stem(&path) else {
                continue;
            };
            if let Some(created_ms) = parse_segment_stem(&stem) {
                if created_ms < cutoff_ms {
                    fs::remove_file(&path)?;
                    purged += 1;
                }
            }
        }
        Ok(purged)
    }

    fn open_segment(&self, now: DateTime<Utc>) -> Result<ActiveSegment, DlqError> {
        let mut ms = now.timestamp_millis();
        let path = loop {
            let candidate = self.dir.join(format!("segment-{ms}.jsonl"));
            if !candidate.exists() {
                break candidate;
            }
            ms += 1;
        };
        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        Ok(ActiveSegment {
            path,
            writer: BufWriter::new(file),
            bytes: 0,
            entries: 0,
        })
    }

    /// Truncate a torn trailing line left by a mid-write crash.
    fn repair_newest_segment(&self) -> Result<(), DlqError> {
        let Some(newest) = self.segments()?.pop() else {
            return Ok(());
        };

        let data = fs::read(&newest.path)?;
        let mut good_end = 0usize;
        let mut cursor = 0usize;
        while let Some(nl) = data[cursor..].iter().position(|b| *b == b'\n') {
            let line = &data[cursor..cursor + nl];
            let end = cursor + nl + 1;
            if !line.is_empty() && serde_json::from_slice::<serde_json::Value>(line).is_err() {
                break;
            }
            good_end = end;
            cursor = end;
        }

        if good_end < data.len() {
            tracing::warn!(
                segment = %newest.path.display(),
                lost_bytes = data.len() - good_end,
                "truncating torn trailing line in dlq segment"
            );
            let file = OpenOptions::new().write(true).open(&newest.path)?;
            file.set_len(good_end as u64)?;
            file.sync_all()?;
        }
        Ok(())
    }
}

fn close_segment(mut segment: ActiveSegment) -> Result<(), DlqError> {
    segment.writer.flush()?;
    segment.writer.get_ref().sync_all()?;
    Ok(())
}

/// Parse `segment-<ms>.jsonl`, rejecting archived files.
fn parse_segment_name(path: &Path) -> Option<i64> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".jsonl")?;
    parse_segment_stem(stem)
}

fn parse_segment_stem(stem: &str) -> Option<i64> {
    stem.strip_prefix("segment-")?.parse().ok()
}

/// For `segment-<ms>.jsonl.done`, return `segment-<ms>`.
fn archived_stem(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".jsonl.done")?;
    Some(stem.to_string())
}

#[cfg(test)]
#[path = "dlq_tests.rs"]
mod tests;
