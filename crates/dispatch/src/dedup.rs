// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fingerprint deduplication.
//!
//! A bounded LRU of fingerprints with a TTL. Size evictions happen on
//! insert (LRU semantics); expired entries are swept by a periodic
//! scan driven from the dispatcher. Dedup runs on the raw ingested
//! entry, before any enrichment, so derived labels cannot perturb
//! fingerprints.

use chrono::{DateTime, Utc};
use drover_core::{fingerprint, FingerprintCacheEntry, LogEntry};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::Duration;

/// Dedup tunables.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub max_entries: usize,
    pub ttl: Duration,
    /// Timestamp rounding window for fingerprints.
    pub window: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 100_000,
            ttl: Duration::from_secs(300),
            window: Duration::from_secs(1),
        }
    }
}

/// Bounded LRU + TTL fingerprint map.
pub struct DedupCache {
    inner: Mutex<Inner>,
}

struct Inner {
    config: DedupConfig,
    cache: LruCache<u64, FingerprintCacheEntry>,
}

impl DedupCache {
    pub fn new(config: DedupConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                config,
                cache: LruCache::new(capacity),
            }),
        }
    }

    /// `true` when the entry is a duplicate within the window.
    pub fn is_duplicate(&self, entry: &LogEntry, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if !inner.config.enabled {
            return false;
        }

        let fp = fingerprint(
            entry.source_id(),
            entry.message(),
            entry.timestamp(),
            inner.config.window,
        );
        let ttl = inner.config.ttl;

        if let Some(cached) = inner.cache.get_mut(&fp) {
            let age = (now - cached.first_seen).to_std().unwrap_or(Duration::ZERO);
            if age < ttl {
                cached.hit(now);
                return true;
            }
            // Expired but not yet swept: reuse the slot as fresh
            *cached = FingerprintCacheEntry::new(fp, now);
            return false;
        }

        inner.cache.put(fp, FingerprintCacheEntry::new(fp, now));
        false
    }

    /// Sweep entries past the TTL. Returns how many were removed.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut inner = self.inner.lock();
        let ttl = inner.config.ttl;
        let expired: Vec<u64> = inner
            .cache
            .iter()
            .filter(|(_, e)| (now - e.first_seen).to_std().unwrap_or(Duration::ZERO) >= ttl)
            .map(|(fp, _)| *fp)
            .collect();
        for fp in &expired {
            inner.cache.pop(fp);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().cache.is_empty()
    }

    /// Replace tunables; a shrunk capacity evicts oldest first.
    pub fn update_config(&self, config: DedupConfig) {
        let mut inner = self.inner.lock();
        let capacity = NonZeroUsize::new(config.max_entries.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        inner.cache.resize(capacity);
        inner.config = config;
    }
}

#[cfg(test)]
#[path = "dedup_tests.rs"]
mod tests;
