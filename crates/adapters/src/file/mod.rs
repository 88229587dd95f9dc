// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File tailing.

mod monitor;
mod tailer;

pub use monitor::{FileMonitor, FileMonitorConfig};
pub use tailer::{TailOutcome, Tailer, TailerError};
