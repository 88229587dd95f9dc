// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batches of entries bound for one sink.
//!
//! Assembly happens on an [`OpenBatch`]; sealing yields an immutable
//! [`Batch`] for transmission. The type split is what enforces
//! immutability after seal.

use crate::clock::Clock;
use crate::entry::LogEntry;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A batch under assembly.
#[derive(Debug)]
pub struct OpenBatch {
    sink_id: String,
    created_at: DateTime<Utc>,
    entries: Vec<Arc<LogEntry>>,
    size_bytes: usize,
}

impl OpenBatch {
    pub fn new(sink_id: impl Into<String>, clock: &dyn Clock) -> Self {
        Self {
            sink_id: sink_id.into(),
            created_at: clock.now(),
            entries: Vec::new(),
            size_bytes: 0,
        }
    }

    pub fn push(&mut self, entry: Arc<LogEntry>) {
        self.size_bytes += entry_weight(&entry);
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Age of the batch, used for the batch-timeout flush trigger.
    pub fn age(&self, clock: &dyn Clock) -> chrono::Duration {
        clock.now() - self.created_at
    }

    /// Seal for transmission. The result can no longer grow.
    pub fn seal(self) -> Batch {
        Batch {
            sink_id: self.sink_id,
            created_at: self.created_at,
            entries: self.entries,
            size_bytes: self.size_bytes,
            retry_count: 0,
        }
    }
}

/// An immutable, sealed batch.
#[derive(Debug, Clone)]
pub struct Batch {
    sink_id: String,
    created_at: DateTime<Utc>,
    entries: Vec<Arc<LogEntry>>,
    size_bytes: usize,
    retry_count: u32,
}

impl Batch {
    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn entries(&self) -> &[Arc<LogEntry>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// The same batch with its retry count bumped.
    pub fn for_retry(mut self) -> Self {
        self.retry_count += 1;
        self
    }

    /// Rebuild a batch with entries replaced (timestamp validation may
    /// substitute clamped copies). Metadata is recomputed; the retry
    /// count carries over.
    pub fn with_entries(self, entries: Vec<Arc<LogEntry>>) -> Self {
        let size_bytes = entries.iter().map(|e| entry_weight(e)).sum();
        Self {
            entries,
            size_bytes,
            ..self
        }
    }
}

/// Approximate wire weight of an entry: message plus label text.
fn entry_weight(entry: &LogEntry) -> usize {
    entry.message().len()
        + entry
            .labels()
            .iter()
            .map(|(k, v)| k.len() + v.len())
            .sum::<usize>()
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
