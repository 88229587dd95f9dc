// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed error taxonomy used for metrics labels and DLQ
//! classification.
//!
//! Components map their concrete failures into this set at the
//! boundary where an entry's fate is decided; everything upstream
//! keeps its own `thiserror` enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a delivery failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Retryable: connection refused, reset, timeout.
    TransientNetwork,
    /// Retryable, honoring Retry-After where present.
    RateLimited,
    /// Terminal for the entry unless clamp policy is enabled.
    TimestampOutOfWindow,
    /// Terminal: the remote rejected the payload itself.
    PayloadRejected,
    /// Terminal at the producer; the caller must back off.
    QueueBackpressure,
    /// Terminal: the retry semaphore was exhausted.
    RetrySaturation,
    /// Terminal: the batch used up its retry budget.
    RetriesExhausted,
    /// Reported once per incident; recovery is attempted.
    PositionCorruptionDetected,
    /// Process-level: shutdown did not finish inside the ceiling.
    ShutdownTimeout,
    /// Should never occur; logged with full context.
    InternalInvariant,
}

impl ErrorClass {
    /// Whether the dispatcher may schedule a retry for this failure.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::TransientNetwork | ErrorClass::RateLimited)
    }

    /// Stable snake_case name, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::TransientNetwork => "transient_network",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::TimestampOutOfWindow => "timestamp_out_of_window",
            ErrorClass::PayloadRejected => "payload_rejected",
            ErrorClass::QueueBackpressure => "queue_backpressure",
            ErrorClass::RetrySaturation => "retry_saturation",
            ErrorClass::RetriesExhausted => "retries_exhausted",
            ErrorClass::PositionCorruptionDetected => "position_corruption_detected",
            ErrorClass::ShutdownTimeout => "shutdown_timeout",
            ErrorClass::InternalInvariant => "internal_invariant",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
