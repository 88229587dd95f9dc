// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake transport for tests: records batches, injects failures.

use super::{SinkTransport, TransportError};
use async_trait::async_trait;
use drover_core::Batch;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scriptable in-memory transport.
#[derive(Clone)]
pub struct FakeTransport {
    id: String,
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    sent: Mutex<Vec<Batch>>,
    /// Failures consumed one per send, before `always_fail`.
    scripted: Mutex<VecDeque<TransportError>>,
    always_fail: Mutex<Option<TransportError>>,
}

impl FakeTransport {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            inner: Arc::new(Inner::default()),
        }
    }

    /// Queue one failure for the next send.
    pub fn push_failure(&self, error: TransportError) {
        self.inner.scripted.lock().push_back(error);
    }

    /// Fail every send with this error until cleared.
    pub fn set_always_fail(&self, error: Option<TransportError>) {
        *self.inner.always_fail.lock() = error;
    }

    pub fn sent_batches(&self) -> Vec<Batch> {
        self.inner.sent.lock().clone()
    }

    /// Messages across all delivered batches, in delivery order.
    pub fn sent_messages(&self) -> Vec<String> {
        self.inner
            .sent
            .lock()
            .iter()
            .flat_map(|b| b.entries().iter().map(|e| e.message().to_string()))
            .collect()
    }

    pub fn send_count(&self) -> usize {
        self.inner.sent.lock().len()
    }
}

#[async_trait]
impl SinkTransport for FakeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    async fn send(&self, batch: &Batch) -> Result<(), TransportError> {
        if let Some(error) = self.inner.scripted.lock().pop_front() {
            return Err(error);
        }
        if let Some(error) = self.inner.always_fail.lock().clone() {
            return Err(error);
        }
        self.inner.sent.lock().push(batch.clone());
        Ok(())
    }
}
