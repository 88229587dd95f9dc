// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    empty        = { 0.0, BackpressureLevel::Accept },
    light        = { 0.69, BackpressureLevel::Accept },
    at_throttle  = { 0.70, BackpressureLevel::Throttle },
    heavy        = { 0.94, BackpressureLevel::Throttle },
    at_reject    = { 0.95, BackpressureLevel::Reject },
    full         = { 1.0, BackpressureLevel::Reject },
)]
fn default_thresholds(utilization: f64, expected: BackpressureLevel) {
    let mgr = BackpressureManager::default();
    assert_eq!(mgr.level(utilization), expected);
}

#[test]
fn custom_thresholds() {
    let mgr = BackpressureManager::new(0.5, 0.9);
    assert_eq!(mgr.level(0.49), BackpressureLevel::Accept);
    assert_eq!(mgr.level(0.5), BackpressureLevel::Throttle);
    assert_eq!(mgr.level(0.9), BackpressureLevel::Reject);
}
