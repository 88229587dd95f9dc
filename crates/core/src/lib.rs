// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-core: shared types for the drover log delivery pipeline.
//!
//! Everything that crosses a crate boundary lives here: the log entry
//! and its timestamp-adjustment audit trail, batches, durable tail
//! positions, the DLQ record, the closed error taxonomy, dedup
//! fingerprints, the circuit breaker, backpressure levels, the clock
//! abstraction, and the in-process metrics registry.

pub mod backpressure;
pub mod batch;
pub mod breaker;
pub mod clock;
pub mod dlq;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod ingest;
pub mod metrics;
pub mod position;

pub use backpressure::{BackpressureLevel, BackpressureManager};
pub use batch::{Batch, OpenBatch};
pub use breaker::{BreakerConfig, BreakerOpen, BreakerState, CircuitBreaker};
pub use clock::{Clock, SystemClock};
pub use dlq::DlqEntry;
pub use entry::{
    truncate_line, AdjustmentReason, EntryBuilder, LogEntry, SourceType, TimestampAdjustment,
    TRUNCATION_MARKER,
};
pub use error::ErrorClass;
pub use fingerprint::{fingerprint, normalize_message, FingerprintCacheEntry};
pub use ingest::{Ingest, IngestError};
pub use metrics::{HealthState, MetricsSnapshot, PipelineMetrics};
pub use position::{FileIdentity, Position, PositionLog};

#[cfg(any(test, feature = "test-support"))]
pub use clock::FakeClock;
