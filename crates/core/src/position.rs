// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable tail positions.

use crate::entry::SourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identity of a file independent of its path contents, used to
/// detect rotation across restarts: the device/inode pair survives
/// renames, while a new file under the same path gets a new inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
    /// Size observed when the identity was first recorded.
    pub size_at_discovery: u64,
}

#[cfg(unix)]
impl FileIdentity {
    pub fn of(meta: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            device: meta.dev(),
            inode: meta.ino(),
            size_at_discovery: meta.len(),
        }
    }

    /// Same underlying file, regardless of growth since discovery.
    pub fn same_file(&self, other: &FileIdentity) -> bool {
        self.device == other.device && self.inode == other.inode
    }
}

/// The persisted tail offset for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub source_id: String,
    pub source_type: SourceType,
    /// Byte offset for files; nanosecond timestamp cursor for
    /// container streams.
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_identity: Option<FileIdentity>,
    pub last_update: DateTime<Utc>,
}

impl Position {
    pub fn new(
        source_id: impl Into<String>,
        source_type: SourceType,
        offset: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_type,
            offset,
            file_identity: None,
            last_update: now,
        }
    }

    pub fn with_identity(mut self, identity: FileIdentity) -> Self {
        self.file_identity = Some(identity);
        self
    }
}

/// Store seam used by monitors. Implementations must never block the
/// caller on I/O; [`PositionLog::backpressure`] tells producers when
/// to coalesce updates.
pub trait PositionLog: Send + Sync + 'static {
    fn load(&self, source_id: &str) -> Option<Position>;
    fn store(&self, position: Position);
    fn remove(&self, source_id: &str);
    /// Save-path saturation in `[0, 1]`.
    fn backpressure(&self) -> f64;
}

#[cfg(test)]
#[path = "position_tests.rs"]
mod tests;
