// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generational checkpoints of the position table.
//!
//! Each checkpoint is a full copy of the positions file, named by a
//! monotonically increasing generation number under `checkpoints/`.
//! The newest generations are the recovery sources when the live file
//! fails validation; the oldest is deleted once the configured count
//! is exceeded.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from checkpoint operations
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Manages the `checkpoints/` directory next to the positions file.
#[derive(Debug, Clone)]
pub struct Checkpoints {
    dir: PathBuf,
    keep: usize,
}

impl Checkpoints {
    pub fn new(dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            dir: dir.into(),
            keep: keep.max(1),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generation numbers present on disk, oldest first.
    pub fn generations(&self) -> Result<Vec<u64>, CheckpointError> {
        let mut gens = Vec::new();
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(gens),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if let Some(gen) = parse_generation(&entry.file_name()) {
                gens.push(gen);
            }
        }
        gens.sort_unstable();
        Ok(gens)
    }

    pub fn path_for(&self, generation: u64) -> PathBuf {
        self.dir.join(format!("{generation:06}.json"))
    }

    /// Write the next generation from the serialized position table,
    /// then prune beyond the keep count. Returns the new generation.
    pub fn write_next(&self, data: &[u8]) -> Result<u64, CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        let next = self.generations()?.last().map_or(1, |g| g + 1);
        let path = self.path_for(next);
        let tmp = path.with_extension("tmp");

        {
            let mut file = File::create(&tmp)?;
            file.write_all(data)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        let dir = File::open(&self.dir)?;
        dir.sync_all()?;

        self.prune()?;
        Ok(next)
    }

    /// Delete the oldest generations beyond the keep count.
    fn prune(&self) -> Result<(), CheckpointError> {
        let gens = self.generations()?;
        if gens.len() <= self.keep {
            return Ok(());
        }
        for gen in &gens[..gens.len() - self.keep] {
            let path = self.path_for(*gen);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to prune checkpoint");
            }
        }
        Ok(())
    }

    /// Candidate recovery files, newest generation first.
    pub fn recovery_candidates(&self) -> Result<Vec<PathBuf>, CheckpointError> {
        let mut gens = self.generations()?;
        gens.reverse();
        Ok(gens.into_iter().map(|g| self.path_for(g)).collect())
    }
}

/// Parse `NNNNNN.json` into a generation number.
fn parse_generation(name: &std::ffi::OsStr) -> Option<u64> {
    let name = name.to_str()?;
    let stem = name.strip_suffix(".json")?;
    if stem.len() != 6 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
