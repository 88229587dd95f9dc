// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use drover_core::{Clock, FakeClock, SourceType};

fn entry(clock: &FakeClock, source: &str, msg: &str) -> LogEntry {
    LogEntry::builder(SourceType::File, source)
        .message(msg)
        .build(clock)
}

fn cache(config: DedupConfig) -> DedupCache {
    DedupCache::new(config)
}

#[test]
fn first_sighting_is_not_a_duplicate() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());
    assert!(!c.is_duplicate(&entry(&clock, "/a", "msg"), clock.now()));
    assert_eq!(c.len(), 1);
}

#[test]
fn repeat_within_window_is_a_duplicate() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());
    let e = entry(&clock, "/a", "pid=42 started");

    assert!(!c.is_duplicate(&e, clock.now()));
    assert!(c.is_duplicate(&e, clock.now()));
    assert!(c.is_duplicate(&e, clock.now()));
    // Still one cached fingerprint
    assert_eq!(c.len(), 1);
}

#[test]
fn normalization_collapses_variants() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());
    assert!(!c.is_duplicate(&entry(&clock, "/a", "PID=42  Started"), clock.now()));
    assert!(c.is_duplicate(&entry(&clock, "/a", "pid=42 started"), clock.now()));
}

#[test]
fn different_sources_do_not_collide() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());
    assert!(!c.is_duplicate(&entry(&clock, "/a", "msg"), clock.now()));
    assert!(!c.is_duplicate(&entry(&clock, "/b", "msg"), clock.now()));
}

#[test]
fn expired_fingerprint_is_fresh_again() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig {
        ttl: Duration::from_secs(10),
        ..DedupConfig::default()
    });
    let e = entry(&clock, "/a", "msg");

    assert!(!c.is_duplicate(&e, clock.now()));
    clock.advance(chrono::Duration::seconds(11));
    // Same fingerprint, but the first sighting has aged out
    assert!(!c.is_duplicate(&e, clock.now()));
    assert!(c.is_duplicate(&e, clock.now()));
}

#[test]
fn size_eviction_is_lru() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig {
        max_entries: 2,
        ..DedupConfig::default()
    });

    let a = entry(&clock, "/a", "a");
    let b = entry(&clock, "/b", "b");
    let d = entry(&clock, "/d", "d");

    assert!(!c.is_duplicate(&a, clock.now()));
    assert!(!c.is_duplicate(&b, clock.now()));
    // Touch /a so /b is the least recent
    assert!(c.is_duplicate(&a, clock.now()));
    assert!(!c.is_duplicate(&d, clock.now()));
    assert_eq!(c.len(), 2);

    // /b was evicted; /a survived
    assert!(c.is_duplicate(&a, clock.now()));
    assert!(!c.is_duplicate(&b, clock.now()));
}

#[test]
fn purge_removes_only_expired() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig {
        ttl: Duration::from_secs(10),
        ..DedupConfig::default()
    });

    c.is_duplicate(&entry(&clock, "/old", "x"), clock.now());
    clock.advance(chrono::Duration::seconds(8));
    c.is_duplicate(&entry(&clock, "/new", "y"), clock.now());
    clock.advance(chrono::Duration::seconds(3));

    assert_eq!(c.purge_expired(clock.now()), 1);
    assert_eq!(c.len(), 1);
}

#[test]
fn disabled_cache_never_deduplicates() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig {
        enabled: false,
        ..DedupConfig::default()
    });
    let e = entry(&clock, "/a", "msg");
    assert!(!c.is_duplicate(&e, clock.now()));
    assert!(!c.is_duplicate(&e, clock.now()));
    assert!(c.is_empty());
}

#[test]
fn timestamps_in_same_window_collide() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());

    let first = LogEntry::builder(SourceType::File, "/a")
        .message("m")
        .original_timestamp(clock.now())
        .build(&clock);
    let second = LogEntry::builder(SourceType::File, "/a")
        .message("m")
        .original_timestamp(clock.now() + chrono::Duration::milliseconds(400))
        .build(&clock);

    assert!(!c.is_duplicate(&first, clock.now()));
    assert!(c.is_duplicate(&second, clock.now()));
}

#[test]
fn update_config_shrinks_capacity() {
    let clock = FakeClock::new();
    let c = cache(DedupConfig::default());
    for i in 0..10 {
        c.is_duplicate(&entry(&clock, &format!("/s{i}"), "m"), clock.now());
    }
    c.update_config(DedupConfig {
        max_entries: 3,
        ..DedupConfig::default()
    });
    assert_eq!(c.len(), 3);
}
