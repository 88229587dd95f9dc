// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container runtime adapters.
//!
//! The monitor talks to the runtime through [`ContainerRuntime`]:
//! list running containers, subscribe to lifecycle events, and open a
//! follow-mode log stream from a timestamp cursor. Production is the
//! `docker` CLI; tests use [`FakeRuntime`].

mod docker;

pub use docker::DockerCliRuntime;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeRuntime, FakeStream};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors from runtime operations
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),
    #[error("command failed: {0}")]
    CommandFailed(String),
    #[error("unparsable runtime output: {0}")]
    Parse(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    /// Whether the monitor should re-open the stream with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RuntimeError::Unavailable(_) | RuntimeError::CommandFailed(_) | RuntimeError::Io(_)
        )
    }
}

/// A running container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub labels: BTreeMap<String, String>,
}

/// Lifecycle events from the runtime's event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerEvent {
    Started(ContainerInfo),
    Stopped { id: String },
}

/// Which of the container's standard streams a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// One line read from a container log stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLogLine {
    /// Timestamp claimed by the runtime; `None` when unparsable.
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
    pub stream: StreamKind,
}

/// An open follow-mode log stream for one container.
#[async_trait]
pub trait LogStream: Send {
    /// Next line, or `None` at end of stream. Must be cancel-safe:
    /// the reader wraps this in a timeout and may drop the future.
    async fn next_line(&mut self) -> Result<Option<ContainerLogLine>, RuntimeError>;

    /// Tear the stream down, releasing the underlying resources.
    async fn close(&mut self);
}

/// Adapter over the local container runtime.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Currently running containers.
    async fn list(&self) -> Result<Vec<ContainerInfo>, RuntimeError>;

    /// Subscribe to lifecycle events. The channel closes when the
    /// token is cancelled.
    async fn events(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<ContainerEvent>, RuntimeError>;

    /// Open a follow-mode stream of log lines at or after `since`.
    async fn follow_logs(
        &self,
        id: &str,
        since: DateTime<Utc>,
    ) -> Result<Box<dyn LogStream>, RuntimeError>;
}
