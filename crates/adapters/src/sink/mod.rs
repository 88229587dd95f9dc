// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sink transports.
//!
//! A transport delivers one sealed batch to its destination. Queueing,
//! batching, retries, and circuit breaking all live upstream in the
//! dispatcher's sink runner; transports only know how to send and how
//! to classify their failures.

mod http;
mod local_file;
mod timestamp;

pub use http::{HttpAggregatorConfig, HttpAggregatorTransport};
pub use local_file::{LocalFileConfig, LocalFileTransport};
pub use timestamp::{TimestampPolicy, TimestampValidator, TimestampWindow, ValidationOutcome};

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeTransport;

use async_trait::async_trait;
use drover_core::{Batch, ErrorClass};
use std::time::Duration;
use thiserror::Error;

/// A failed delivery, classified for the retry/DLQ decision.
#[derive(Debug, Clone, Error)]
#[error("{class}: {message}")]
pub struct TransportError {
    pub class: ErrorClass,
    pub message: String,
    /// Present when the remote supplied a Retry-After.
    pub retry_after: Option<Duration>,
}

impl TransportError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.class.is_retryable()
    }
}

/// Delivery of sealed batches to one destination.
#[async_trait]
pub trait SinkTransport: Send + Sync + 'static {
    /// Stable identifier, used in metrics labels and DLQ records.
    fn id(&self) -> &str;

    /// Deliver one batch. Implementations must be cancel-safe: an
    /// abandoned send may or may not have reached the destination
    /// (delivery is at-least-once).
    async fn send(&self, batch: &Batch) -> Result<(), TransportError>;
}
