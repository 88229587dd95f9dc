// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::sync::atomic::Ordering;

#[test]
fn labeled_counters_accumulate() {
    let m = PipelineMetrics::new();
    m.record_dedup_hit("file:/a.log");
    m.record_dedup_hit("file:/a.log");
    m.record_dedup_hit("file:/b.log");

    assert_eq!(m.dedup_hits("file:/a.log"), 2);
    assert_eq!(m.dedup_hits("file:/b.log"), 1);
    assert_eq!(m.dedup_hits("file:/c.log"), 0);
}

#[test]
fn sink_send_counters_split_by_outcome() {
    let m = PipelineMetrics::new();
    m.record_sink_send("http", true);
    m.record_sink_send("http", true);
    m.record_sink_send("http", false);
    assert_eq!(m.sink_sends("http"), (2, 1));
    assert_eq!(m.sink_sends("local"), (0, 0));
}

#[test]
fn gauges_round_trip_f64() {
    let m = PipelineMetrics::new();
    m.set_queue_utilization(0.73);
    m.set_position_backpressure(0.25);
    assert_eq!(m.queue_utilization(), 0.73);
    assert_eq!(m.position_backpressure(), 0.25);
}

#[test]
fn snapshot_captures_everything() {
    let m = PipelineMetrics::new();
    m.entries_ingested.fetch_add(10, Ordering::Relaxed);
    m.record_dedup_hit("s");
    m.record_timestamp_outcome("clamp", "file:/a.log");
    m.set_queue_utilization(0.5);

    let snap = m.snapshot();
    assert_eq!(snap.entries_ingested, 10);
    assert_eq!(snap.dedup_hits["s"], 1);
    assert_eq!(snap.timestamp_outcomes["clamp:file:/a.log"], 1);
    assert_eq!(m.timestamp_outcomes("clamp", "file:/a.log"), 1);
    assert_eq!(m.timestamp_outcomes("drop", "file:/a.log"), 0);
    assert_eq!(snap.queue_utilization, 0.5);

    // Snapshot is serializable for the health surface
    let json = serde_json::to_value(&snap).unwrap();
    assert_eq!(json["entries_ingested"], 10);
}
