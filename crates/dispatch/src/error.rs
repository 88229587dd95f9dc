// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the dispatch pipeline

use thiserror::Error;

/// Errors surfaced by dispatcher lifecycle operations. Delivery
/// failures never appear here; they become DLQ entries and counters.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("shutdown timed out")]
    ShutdownTimeout,
    #[error("sink flush failed: {0}")]
    SinkFlush(String),
    #[error("position flush failed: {0}")]
    PositionFlush(String),
    #[error("dlq close failed: {0}")]
    DlqClose(String),
}
