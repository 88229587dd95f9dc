// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The seam between monitors and the dispatcher.
//!
//! Monitors never block on the pipeline: `try_submit` either accepts
//! the entry immediately or reports backpressure, and the caller
//! decides whether to buffer, coalesce, or drop.

use crate::entry::LogEntry;
use thiserror::Error;

/// Submission failures visible to producers. Everything downstream of
/// the ingress queue is recovered internally by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IngestError {
    /// The ingress queue is at or above the reject threshold.
    #[error("queue backpressure")]
    Backpressure,
    /// The dispatcher has shut down.
    #[error("dispatcher closed")]
    Closed,
}

/// Non-blocking entry submission implemented by the dispatcher handle.
pub trait Ingest: Clone + Send + Sync + 'static {
    fn try_submit(&self, entry: LogEntry) -> Result<(), IngestError>;
}
