// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake container runtime for tests.

use super::{
    ContainerEvent, ContainerInfo, ContainerLogLine, ContainerRuntime, LogStream, RuntimeError,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Scriptable runtime: containers are added and removed by the test,
/// lines are pushed per container and fan out to open streams.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    containers: Mutex<HashMap<String, ContainerInfo>>,
    event_subscribers: Mutex<Vec<mpsc::Sender<ContainerEvent>>>,
    stream_senders: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<ContainerLogLine>>>>,
    streams_opened: Mutex<HashMap<String, usize>>,
    streams_closed: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container and emit its start event.
    pub fn add_container(&self, id: &str, name: &str, labels: &[(&str, &str)]) {
        let info = ContainerInfo {
            id: id.to_string(),
            name: name.to_string(),
            image: "fake:latest".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        };
        self.inner
            .containers
            .lock()
            .insert(id.to_string(), info.clone());
        self.broadcast(ContainerEvent::Started(info));
    }

    /// Remove a container and emit its stop event. Open streams end.
    pub fn remove_container(&self, id: &str) {
        self.inner.containers.lock().remove(id);
        self.inner.stream_senders.lock().remove(id);
        self.broadcast(ContainerEvent::Stopped { id: id.to_string() });
    }

    /// Deliver one line to every open stream of a container.
    pub fn push_line(&self, id: &str, timestamp: DateTime<Utc>, message: &str) {
        self.push(id, Some(timestamp), message);
    }

    /// Deliver a line whose timestamp the runtime failed to provide.
    pub fn push_raw_line(&self, id: &str, message: &str) {
        self.push(id, None, message);
    }

    fn push(&self, id: &str, timestamp: Option<DateTime<Utc>>, message: &str) {
        let senders = self.inner.stream_senders.lock();
        if let Some(list) = senders.get(id) {
            for tx in list {
                let _ = tx.send(ContainerLogLine {
                    timestamp,
                    message: message.to_string(),
                    stream: super::StreamKind::Stdout,
                });
            }
        }
    }

    /// How many streams have been opened for a container (rotation
    /// count plus one).
    pub fn streams_opened(&self, id: &str) -> usize {
        self.inner
            .streams_opened
            .lock()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn streams_closed(&self) -> usize {
        self.inner.streams_closed.load(Ordering::SeqCst)
    }

    /// Streams with a live reader right now.
    pub fn open_stream_count(&self) -> usize {
        self.inner
            .stream_senders
            .lock()
            .values()
            .map(|v| v.iter().filter(|tx| !tx.is_closed()).count())
            .sum()
    }

    fn broadcast(&self, event: ContainerEvent) {
        let mut subscribers = self.inner.event_subscribers.lock();
        subscribers.retain(|tx| tx.try_send(event.clone()).is_ok());
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError> {
        Ok(self.inner.containers.lock().values().cloned().collect())
    }

    async fn events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ContainerEvent>, RuntimeError> {
        let (tx, rx) = mpsc::channel(64);
        self.inner.event_subscribers.lock().push(tx.clone());
        tokio::spawn(async move {
            cancel.cancelled().await;
            drop(tx);
        });
        Ok(rx)
    }

    async fn follow_logs(
        &self,
        id: &str,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn LogStream>, RuntimeError> {
        if !self.inner.containers.lock().contains_key(id) {
            return Err(RuntimeError::CommandFailed(format!(
                "no such container: {id}"
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .stream_senders
            .lock()
            .entry(id.to_string())
            .or_default()
            .push(tx);
        *self
            .inner
            .streams_opened
            .lock()
            .entry(id.to_string())
            .or_insert(0) += 1;

        Ok(Box::new(FakeStream {
            rx,
            since,
            closed_counter: Arc::clone(&self.inner),
            closed: false,
        }))
    }
}

/// Stream half of [`FakeRuntime`].
pub struct FakeStream {
    rx: mpsc::UnboundedReceiver<ContainerLogLine>,
    since: DateTime<Utc>,
    closed_counter: Arc<Inner>,
    closed: bool,
}

#[async_trait]
impl LogStream for FakeStream {
    async fn next_line(&mut self) -> Result<Option<ContainerLogLine>, RuntimeError> {
        loop {
            match self.rx.recv().await {
                Some(line) => {
                    // Respect the cursor the way `--since` does
                    if line.timestamp.map_or(true, |ts| ts >= self.since) {
                        return Ok(Some(line));
                    }
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_counter.streams_closed.fetch_add(1, Ordering::SeqCst);
        }
        self.rx.close();
    }
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closed_counter.streams_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}
