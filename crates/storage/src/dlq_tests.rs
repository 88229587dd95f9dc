// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::{Clock, ErrorClass, FakeClock, LogEntry, SourceType};
use tempfile::tempdir;

fn dlq_entry(clock: &FakeClock, msg: &str) -> DlqEntry {
    let entry = LogEntry::builder(SourceType::File, "/a.log")
        .message(msg)
        .build(clock);
    DlqEntry::new(entry, "http", ErrorClass::RetriesExhausted, 3, clock.now())
}

#[test]
fn write_and_read_round_trip() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = DlqSegmentStore::open(dir.path(), 1 << 20, 1000).unwrap();

    let first = dlq_entry(&clock, "first");
    let second = dlq_entry(&clock, "second");
    store.write(&first, clock.now()).unwrap();
    store.write(&second, clock.now()).unwrap();
    store.close_active().unwrap();

    let segments = store.segments().unwrap();
    assert_eq!(segments.len(), 1);
    let entries = store.read_segment(&segments[0]).unwrap();
    assert_eq!(entries, vec![first, second]);
}

#[test]
fn rotates_on_entry_budget() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = DlqSegmentStore::open(dir.path(), 1 << 20, 2).unwrap();

    for i in 0..5 {
        clock.advance(chrono::Duration::milliseconds(1));
        store.write(&dlq_entry(&clock, &format!("m{i}")), clock.now()).unwrap();
    }
    store.close_active().unwrap();

    let segments = store.segments().unwrap();
    assert_eq!(segments.len(), 3);
    // Oldest first, two entries per full segment
    assert_eq!(store.read_segment(&segments[0]).unwrap().len(), 2);
    assert_eq!(store.read_segment(&segments[1]).unwrap().len(), 2);
    assert_eq!(store.read_segment(&segments[2]).unwrap().len(), 1);
}

#[test]
fn rotates_on_size_budget() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = DlqSegmentStore::open(dir.path(), 600, 1000).unwrap();

    for i in 0..4 {
        clock.advance(chrono::Duration::milliseconds(1));
        store.write(&dlq_entry(&clock, &format!("m{i}")), clock.now()).unwrap();
    }
    store.close_active().unwrap();
    assert!(store.segments().unwrap().len() >= 2);
}

#[test]
fn active_segment_is_not_listed() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = DlqSegmentStore::open(dir.path(), 1 << 20, 1000).unwrap();
    store.write(&dlq_entry(&clock, "x"), clock.now()).unwrap();
    assert!(store.segments().unwrap().is_empty());

    store.close_active().unwrap();
    assert_eq!(store.segments().unwrap().len(), 1);
}

#[test]
fn torn_trailing_line_is_truncated_on_open() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let path;
    {
        let store = DlqSegmentStore::open(dir.path(), 1 << 20, 1000).unwrap();
        store.write(&dlq_entry(&clock, "kept"), clock.now()).unwrap();
        store.close_active().unwrap();
        path = store.segments().unwrap()[0].path.clone();
    }

    // Simulate a crash mid-write
    let mut data = std::fs::read(&path).unwrap();
    data.extend_from_slice(b"{\"entry\":{\"mess");
    std::fs::write(&path, &data).unwrap();

    let store = DlqSegmentStore::open(dir.path(), 1 << 20, 1000).unwrap();
    let segments = store.segments().unwrap();
    let entries = store.read_segment(&segments[0]).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry.message(), "kept");

    // The torn bytes are gone from disk
    let repaired = std::fs::read(&path).unwrap();
    assert!(repaired.ends_with(b"\n"));
}

#[test]
fn archive_hides_segment_and_purge_honors_retention() {
    let dir = tempdir().unwrap();
    let clock = FakeClock::new();
    let store = DlqSegmentStore::open(dir.path(), 1 << 20, 1000).unwrap();
    store.write(&dlq_entry(&clock, "x"), clock.now()).unwrap();
    store.close_active().unwrap();

    let segment = store.segments().unwrap().remove(0);
    store.archive(&segment).unwrap();
    assert!(store.segments().unwrap().is_empty());

    // Not yet past retention
    clock.advance(chrono::Duration::hours(1));
    assert_eq!(
        store
            .purge_archives(Duration::from_secs(7200), clock.now())
            .unwrap(),
        0
    );

    clock.advance(chrono::Duration::hours(2));
    assert_eq!(
        store
            .purge_archives(Duration::from_secs(7200), clock.now())
            .unwrap(),
        1
    );
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}
