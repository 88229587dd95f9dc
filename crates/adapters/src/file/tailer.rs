// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Position-tracked tailer for one file.
//!
//! The tailer keeps the file handle open across polls, so a rename
//! (rotation) does not cut off the old file's remaining bytes: they
//! are drained from the still-open handle before the new file under
//! the original path is adopted at offset zero. Truncation in place
//! is detected by the size shrinking below the read offset.

use drover_core::{truncate_line, FileIdentity, Position};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from tail operations
#[derive(Debug, Error)]
pub enum TailerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// What one poll produced.
#[derive(Debug, Default)]
pub struct TailOutcome {
    /// Complete lines, already capped at `line_max_bytes`.
    pub lines: Vec<String>,
    /// Offset after the last complete line of the current identity.
    pub offset: u64,
    /// True when the file was rotated or truncated this poll.
    pub rotated: bool,
}

/// Incremental reader for one path.
pub struct Tailer {
    path: PathBuf,
    delimiter: u8,
    line_max_bytes: usize,
    file: Option<File>,
    identity: Option<FileIdentity>,
    offset: u64,
    /// Bytes after the last delimiter, carried between polls.
    carry: Vec<u8>,
    /// Set while discarding an over-long line's remainder.
    skipping: bool,
}

impl Tailer {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8, line_max_bytes: usize) -> Self {
        Self {
            path: path.into(),
            delimiter,
            line_max_bytes,
            file: None,
            identity: None,
            offset: 0,
            carry: Vec::new(),
            skipping: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn identity(&self) -> Option<FileIdentity> {
        self.identity
    }

    /// Adopt a persisted position if it still describes the file on
    /// disk; otherwise the tailer starts from offset zero.
    pub fn resume_from(&mut self, position: &Position) -> Result<(), TailerError> {
        let Some(stored_identity) = position.file_identity else {
            return Ok(());
        };
        let meta = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let current = FileIdentity::of(&meta);
        if current.same_file(&stored_identity) && meta.len() >= position.offset {
            self.offset = position.offset;
        }
        Ok(())
    }

    /// Read newly appended bytes, splitting complete lines.
    pub fn poll(&mut self) -> Result<TailOutcome, TailerError> {
        let mut outcome = TailOutcome::default();

        if self.file.is_none() && !self.open()? {
            outcome.offset = self.offset;
            return Ok(outcome);
        }

        // Detect in-place truncation before reading
        if let (Some(file), Some(_)) = (&self.file, self.identity) {
            let len = file.metadata()?.len();
            if len < self.offset {
                tracing::info!(path = %self.path.display(), "file truncated, restarting from zero");
                self.reset_to_path()?;
                outcome.rotated = true;
            }
        }

        self.drain_into(&mut outcome)?;

        // A rename leaves the handle on the old inode; drain it fully
        // (done above), then adopt whatever now lives at the path.
        if self.identity_changed()? {
            tracing::info!(path = %self.path.display(), "file rotated, following new file");
            self.reset_to_path()?;
            outcome.rotated = true;
            self.drain_into(&mut outcome)?;
        }

        outcome.offset = self.offset;
        Ok(outcome)
    }

    /// `false` when the path does not exist yet.
    fn open(&mut self) -> Result<bool, TailerError> {
        match File::open(&self.path) {
            Ok(mut file) => {
                let meta = file.metadata()?;
                let identity = FileIdentity::of(&meta);
                if self.offset > meta.len() {
                    self.offset = 0;
                }
                file.seek(SeekFrom::Start(self.offset))?;
                self.identity = Some(identity);
                self.file = Some(file);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn identity_changed(&self) -> Result<bool, TailerError> {
        let Some(current) = self.identity else {
            return Ok(false);
        };
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(!FileIdentity::of(&meta).same_file(&current)),
            // Old file renamed away and nothing new yet
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop the handle and start fresh on the current path contents.
    fn reset_to_path(&mut self) -> Result<(), TailerError> {
        self.file = None;
        self.identity = None;
        self.offset = 0;
        self.carry.clear();
        self.skipping = false;
        self.open()?;
        Ok(())
    }

    /// Read to EOF of the open handle, appending complete lines.
    fn drain_into(&mut self, outcome: &mut TailOutcome) -> Result<(), TailerError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(());
        };

        let mut buf = [0u8; 8192];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            let mut chunk = &buf[..n];
            while let Some(pos) = chunk.iter().position(|b| *b == self.delimiter) {
                let (head, rest) = chunk.split_at(pos);
                self.offset += (self.carry.len() + head.len() + 1) as u64;
                if self.skipping {
                    self.skipping = false;
                    self.carry.clear();
                } else {
                    self.carry.extend_from_slice(head);
                    let line = String::from_utf8_lossy(&self.carry).into_owned();
                    outcome.lines.push(truncate_line(&line, self.line_max_bytes));
                    self.carry.clear();
                }
                chunk = &rest[1..];
            }

            if !self.skipping {
                self.carry.extend_from_slice(chunk);
                // Bound memory on delimiter-free input: emit the
                // truncated head and discard until the next delimiter.
                if self.carry.len() > self.line_max_bytes {
                    let line = String::from_utf8_lossy(&self.carry).into_owned();
                    outcome.lines.push(truncate_line(&line, self.line_max_bytes));
                    self.offset += self.carry.len() as u64;
                    self.carry.clear();
                    self.skipping = true;
                }
            } else {
                self.offset += chunk.len() as u64;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tailer_tests.rs"]
mod tests;
