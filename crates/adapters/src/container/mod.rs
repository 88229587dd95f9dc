// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container stream monitoring.

mod monitor;

pub use monitor::{ContainerMonitor, ContainerMonitorConfig};

use std::fmt;

/// Per-container lifecycle. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Discovered,
    Streaming,
    Rotating,
    Stopped,
}

impl ContainerState {
    /// Apply a transition, refusing to leave `Stopped`.
    pub fn transition(self, next: ContainerState) -> ContainerState {
        if self == ContainerState::Stopped {
            return ContainerState::Stopped;
        }
        next
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Discovered => "discovered",
            ContainerState::Streaming => "streaming",
            ContainerState::Rotating => "rotating",
            ContainerState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}
