// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dedup fingerprints.
//!
//! A fingerprint is a 64-bit hash over `(source_id, normalized
//! message, timestamp rounded to the dedup window)`. Normalization
//! and hashing are deterministic: the hasher seeds are fixed, so the
//! same line always maps to the same fingerprint, including across
//! restarts.

use ahash::RandomState;
use chrono::{DateTime, Utc};
use std::hash::{BuildHasher, Hasher};
use std::time::Duration;

// Fixed seeds keep fingerprints stable across processes.
const SEEDS: (u64, u64, u64, u64) = (
    0x4cf5_ad43_2745_937f,
    0x9e37_79b9_7f4a_7c15,
    0x85eb_ca6b_27d4_eb4f,
    0xc2b2_ae35_87fd_70e5,
);

/// Lowercase the message and collapse runs of whitespace to a single
/// space, trimming the ends.
pub fn normalize_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut in_gap = true;
    for ch in message.chars() {
        if ch.is_whitespace() {
            if !in_gap {
                out.push(' ');
                in_gap = true;
            }
        } else {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            in_gap = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Compute the dedup fingerprint for an entry.
pub fn fingerprint(
    source_id: &str,
    message: &str,
    timestamp: DateTime<Utc>,
    window: Duration,
) -> u64 {
    let state = RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3);
    let mut hasher = state.build_hasher();

    hasher.write(source_id.as_bytes());
    hasher.write_u8(0);
    hasher.write(normalize_message(message).as_bytes());
    hasher.write_u8(0);
    hasher.write_i64(round_to_window(timestamp, window));
    hasher.finish()
}

/// Round a timestamp down to the start of its dedup window, in
/// milliseconds since epoch. A zero window disables rounding.
fn round_to_window(timestamp: DateTime<Utc>, window: Duration) -> i64 {
    let ms = timestamp.timestamp_millis();
    let window_ms = window.as_millis() as i64;
    if window_ms <= 0 {
        return ms;
    }
    ms.div_euclid(window_ms) * window_ms
}

/// Bookkeeping for one cached fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintCacheEntry {
    pub fingerprint: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub hit_count: u64,
}

impl FingerprintCacheEntry {
    pub fn new(fingerprint: u64, now: DateTime<Utc>) -> Self {
        Self {
            fingerprint,
            first_seen: now,
            last_seen: now,
            hit_count: 0,
        }
    }

    /// Record a duplicate observation.
    pub fn hit(&mut self, now: DateTime<Utc>) {
        self.last_seen = now;
        self.hit_count += 1;
    }
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
