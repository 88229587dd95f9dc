// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::clock::FakeClock;
use crate::entry::SourceType;
use chrono::Duration;

fn entry(clock: &FakeClock, msg: &str) -> Arc<LogEntry> {
    Arc::new(
        LogEntry::builder(SourceType::File, "/a.log")
            .message(msg)
            .label("app", "web")
            .build(clock),
    )
}

#[test]
fn open_batch_accumulates_size() {
    let clock = FakeClock::new();
    let mut open = OpenBatch::new("http", &clock);
    assert!(open.is_empty());

    open.push(entry(&clock, "hello"));
    open.push(entry(&clock, "world!"));

    assert_eq!(open.len(), 2);
    // "hello" + "world!" + 2 * ("app" + "web")
    assert_eq!(open.size_bytes(), 5 + 6 + 2 * 6);
}

#[test]
fn age_tracks_clock() {
    let clock = FakeClock::new();
    let open = OpenBatch::new("http", &clock);
    clock.advance(Duration::milliseconds(250));
    assert_eq!(open.age(&clock), Duration::milliseconds(250));
}

#[test]
fn seal_preserves_order_and_metadata() {
    let clock = FakeClock::new();
    let mut open = OpenBatch::new("http", &clock);
    open.push(entry(&clock, "first"));
    open.push(entry(&clock, "second"));
    let size = open.size_bytes();

    let batch = open.seal();
    assert_eq!(batch.sink_id(), "http");
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.size_bytes(), size);
    assert_eq!(batch.retry_count(), 0);
    assert_eq!(batch.entries()[0].message(), "first");
    assert_eq!(batch.entries()[1].message(), "second");
}

#[test]
fn for_retry_bumps_count() {
    let clock = FakeClock::new();
    let mut open = OpenBatch::new("http", &clock);
    open.push(entry(&clock, "x"));
    let batch = open.seal().for_retry().for_retry();
    assert_eq!(batch.retry_count(), 2);
}

#[test]
fn with_entries_recomputes_size_and_keeps_retries() {
    let clock = FakeClock::new();
    let mut open = OpenBatch::new("http", &clock);
    open.push(entry(&clock, "0123456789"));
    let batch = open.seal().for_retry();

    let smaller = batch.with_entries(vec![entry(&clock, "x")]);
    assert_eq!(smaller.len(), 1);
    assert_eq!(smaller.size_bytes(), 1 + 6);
    assert_eq!(smaller.retry_count(), 1);
}
