// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dead-letter record persisted for entries that failed
//! terminally.

use crate::entry::LogEntry;
use crate::error::ErrorClass;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One line of a DLQ segment file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlqEntry {
    pub entry: LogEntry,
    /// Sink the entry was bound for when it failed.
    pub failed_sink: String,
    pub reason: ErrorClass,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Retries consumed before the entry was dead-lettered.
    pub retry_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl DlqEntry {
    pub fn new(
        entry: LogEntry,
        failed_sink: impl Into<String>,
        reason: ErrorClass,
        retry_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            entry,
            failed_sink: failed_sink.into(),
            reason,
            error_detail: None,
            retry_count,
            enqueued_at: now,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.error_detail = Some(detail.into());
        self
    }
}
