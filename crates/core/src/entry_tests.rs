// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use chrono::Duration;

fn entry(clock: &FakeClock) -> LogEntry {
    LogEntry::builder(SourceType::File, "/var/log/app.log")
        .message("pid=42 started")
        .label("app", "web")
        .build(clock)
}

#[test]
fn build_stamps_ingestion_and_defaults_original() {
    let clock = FakeClock::new();
    let e = entry(&clock);
    assert_eq!(e.ingestion_timestamp(), clock.now());
    assert_eq!(e.original_timestamp(), clock.now());
    assert_eq!(e.timestamp(), e.original_timestamp());
    assert!(e.adjustments().is_empty());
    assert!(e.processed_at().is_none());
}

#[test]
fn explicit_original_timestamp_is_kept() {
    let clock = FakeClock::new();
    let claimed = clock.now() - Duration::hours(2);
    let e = LogEntry::builder(SourceType::Container, "abc123")
        .message("hello")
        .original_timestamp(claimed)
        .build(&clock);
    assert_eq!(e.original_timestamp(), claimed);
    assert_eq!(e.timestamp(), claimed);
    assert_eq!(e.ingestion_timestamp(), clock.now());
}

#[test]
fn adjust_timestamp_appends_audit_record() {
    let clock = FakeClock::new();
    let mut e = entry(&clock);
    let before = e.timestamp();
    let to = before + Duration::hours(1);

    clock.advance(Duration::seconds(5));
    e.adjust_timestamp(
        AdjustmentReason::ClampToWindow,
        to,
        "httpaggregator",
        None,
        &clock,
    );

    assert_eq!(e.timestamp(), to);
    assert_eq!(e.adjustments().len(), 1);
    let adj = &e.adjustments()[0];
    assert_eq!(adj.reason, AdjustmentReason::ClampToWindow);
    assert_eq!(adj.from, before);
    assert_eq!(adj.to, to);
    assert_eq!(adj.at, clock.now());
    assert_eq!(adj.component, "httpaggregator");

    // Original and ingestion timestamps are untouched
    assert_eq!(e.original_timestamp(), before);
    assert_eq!(e.ingestion_timestamp(), before);
}

#[test]
fn every_adjustment_is_recorded_in_order() {
    let clock = FakeClock::new();
    let mut e = entry(&clock);
    let t1 = e.timestamp() + Duration::minutes(1);
    let t2 = e.timestamp() + Duration::minutes(2);

    e.adjust_timestamp(AdjustmentReason::TimezoneFix, t1, "pipeline", None, &clock);
    e.adjust_timestamp(
        AdjustmentReason::DriftCorrection,
        t2,
        "pipeline",
        Some("ntp skew".into()),
        &clock,
    );

    assert_eq!(e.adjustments().len(), 2);
    assert_eq!(e.adjustments()[0].to, e.adjustments()[1].from);
    assert_eq!(e.timestamp(), t2);
}

#[test]
fn with_extra_labels_builds_new_entry() {
    let clock = FakeClock::new();
    let e = entry(&clock);
    let enriched = e.with_extra_labels([("env".to_string(), "prod".to_string())]);

    assert_eq!(e.labels().len(), 1);
    assert_eq!(enriched.labels().len(), 2);
    assert_eq!(enriched.labels()["env"], "prod");
    assert_eq!(enriched.message(), e.message());
    assert_eq!(enriched.ingestion_timestamp(), e.ingestion_timestamp());
}

#[test]
fn mark_processed_stamps_once() {
    let clock = FakeClock::new();
    let mut e = entry(&clock);
    clock.advance(Duration::milliseconds(3));
    e.mark_processed(&clock);
    assert_eq!(e.processed_at(), Some(clock.now()));
}

#[test]
fn serde_round_trip() {
    let clock = FakeClock::new();
    let mut e = entry(&clock);
    e.adjust_timestamp(
        AdjustmentReason::InvalidFallback,
        clock.now(),
        "filemonitor",
        None,
        &clock,
    );

    let json = serde_json::to_string(&e).unwrap();
    let back: LogEntry = serde_json::from_str(&json).unwrap();
    assert_eq!(back, e);
}

#[yare::parameterized(
    under_cap  = { "short", 100, "short" },
    at_cap     = { "exact", 5, "exact" },
    over_cap   = { "0123456789", 4, "0123...[truncated]" },
)]
fn truncation(input: &str, cap: usize, expected: &str) {
    assert_eq!(truncate_line(input, cap), expected);
}

#[test]
fn truncation_respects_char_boundaries() {
    // 'é' is two bytes; a cap landing mid-char must back off
    let line = "aé-and-more";
    let out = truncate_line(line, 2);
    assert!(out.starts_with('a'));
    assert!(out.ends_with(TRUNCATION_MARKER));
    assert!(!out.contains('é'));
}
