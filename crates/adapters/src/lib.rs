// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! drover-adapters: everything that touches the outside world.
//!
//! Sink transports deliver sealed batches; the container runtime
//! adapter wraps the `docker` CLI; the monitors turn raw log sources
//! into pipeline entries. Each seam has a production implementation
//! and a fake behind the `test-support` feature.

pub mod container;
pub mod file;
pub mod runtime;
pub mod sink;
pub mod subprocess;

#[cfg(test)]
pub(crate) mod testutil;

pub use container::{ContainerMonitor, ContainerMonitorConfig, ContainerState};
pub use file::{FileMonitor, FileMonitorConfig, TailOutcome, Tailer, TailerError};
pub use runtime::{
    ContainerEvent, ContainerInfo, ContainerLogLine, ContainerRuntime, DockerCliRuntime,
    LogStream, RuntimeError, StreamKind,
};
pub use sink::{
    HttpAggregatorConfig, HttpAggregatorTransport, LocalFileConfig, LocalFileTransport,
    SinkTransport, TimestampPolicy, TimestampValidator, TimestampWindow, TransportError,
    ValidationOutcome,
};

#[cfg(any(test, feature = "test-support"))]
pub use runtime::{FakeRuntime, FakeStream};
#[cfg(any(test, feature = "test-support"))]
pub use sink::FakeTransport;
