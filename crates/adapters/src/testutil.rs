// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fakes for monitor tests.

use drover_core::{Ingest, IngestError, LogEntry, Position, PositionLog};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Ingest fake that records entries and can simulate backpressure.
#[derive(Clone, Default)]
pub struct FakeIngest {
    inner: Arc<FakeIngestInner>,
}

#[derive(Default)]
struct FakeIngestInner {
    entries: Mutex<Vec<LogEntry>>,
    reject: Mutex<bool>,
}

impl FakeIngest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        *self.inner.reject.lock() = reject;
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.inner
            .entries
            .lock()
            .iter()
            .map(|e| e.message().to_string())
            .collect()
    }
}

impl Ingest for FakeIngest {
    fn try_submit(&self, entry: LogEntry) -> Result<(), IngestError> {
        if *self.inner.reject.lock() {
            return Err(IngestError::Backpressure);
        }
        self.inner.entries.lock().push(entry);
        Ok(())
    }
}

/// In-memory position log.
#[derive(Default)]
pub struct FakePositions {
    table: Mutex<HashMap<String, Position>>,
    backpressure: Mutex<f64>,
}

impl FakePositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_backpressure(&self, value: f64) {
        *self.backpressure.lock() = value;
    }
}

impl PositionLog for FakePositions {
    fn load(&self, source_id: &str) -> Option<Position> {
        self.table.lock().get(source_id).cloned()
    }

    fn store(&self, position: Position) {
        self.table
            .lock()
            .insert(position.source_id.clone(), position);
    }

    fn remove(&self, source_id: &str) {
        self.table.lock().remove(source_id);
    }

    fn backpressure(&self) -> f64 {
        *self.backpressure.lock()
    }
}
