// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Health derivation.
//!
//! `healthy | degraded | unhealthy`, derived from circuit-breaker
//! states, ingress utilization, DLQ growth, and position-save lag.
//! The admin surface that would serve this is out of scope; the
//! daemon logs transitions and exposes it programmatically.

use drover_core::{BreakerState, HealthState};

/// Signals feeding the health decision.
#[derive(Debug, Clone, Default)]
pub struct HealthInputs {
    pub breaker_states: Vec<BreakerState>,
    pub queue_utilization: f64,
    /// DLQ entries written minus reprocessed over the last interval.
    pub dlq_growth: u64,
    pub position_backpressure: f64,
}

pub fn derive_health(inputs: &HealthInputs) -> HealthState {
    let open = inputs
        .breaker_states
        .iter()
        .filter(|s| **s == BreakerState::Open)
        .count();
    let total = inputs.breaker_states.len();

    // No healthy delivery path left, or the ingress is rejecting
    if (total > 0 && open == total) || inputs.queue_utilization >= 0.95 {
        return HealthState::Unhealthy;
    }

    let recovering = inputs
        .breaker_states
        .iter()
        .any(|s| *s != BreakerState::Closed);
    if recovering
        || inputs.queue_utilization >= 0.70
        || inputs.dlq_growth > 0
        || inputs.position_backpressure >= 0.9
    {
        return HealthState::Degraded;
    }

    HealthState::Healthy
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod tests;
