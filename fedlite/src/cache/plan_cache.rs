// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Query plan caching to avoid replanning

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::CacheEntryMetadata;
use crate::plan::Plan;

pub const DEFAULT_PLAN_CACHE_SIZE: usize = 1024;

/// Plan cache statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlanCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    pub total_planning_time_saved_ms: u64,
    pub current_entries: usize,
}

impl PlanCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cached plan entry; never mutated after insertion apart from access bookkeeping
struct PlanCacheEntry {
    plan: Plan,
    planning_time: Duration,
    metadata: CacheEntryMetadata,
}

struct Inner {
    entries: LruCache<u64, PlanCacheEntry>,
    stats: PlanCacheStats,
}

/// Fixed-capacity LRU of post-processed plans keyed by operation digest
pub struct PlanCache {
    inner: Mutex<Inner>,
}

impl PlanCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries)
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: PlanCacheStats::default(),
            }),
        }
    }

    /// Get cached plan if available
    pub fn get(&self, key: u64) -> Option<Plan> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.metadata.update_access();
                inner.stats.hits += 1;
                inner.stats.total_planning_time_saved_ms += entry.planning_time.as_millis() as u64;
                Some(entry.plan.clone())
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Check for a plan without touching statistics or recency
    pub fn contains(&self, key: u64) -> bool {
        self.inner.lock().entries.contains(&key)
    }

    /// Like [`PlanCache::get`] but leaves statistics and recency alone
    pub fn peek(&self, key: u64) -> Option<Plan> {
        self.inner.lock().entries.peek(&key).map(|e| e.plan.clone())
    }

    /// Insert plan into cache
    ///
    /// An existing entry under `key` is kept; the first plan inserted wins.
    pub fn insert(&self, key: u64, plan: Plan, planning_time: Duration) -> Plan {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        if let Some(existing) = inner.entries.peek(&key) {
            return existing.plan.clone();
        }
        let entry = PlanCacheEntry {
            plan: plan.clone(),
            planning_time,
            metadata: CacheEntryMetadata::new(0),
        };
        if inner.entries.push(key, entry).is_some() {
            inner.stats.evictions += 1;
        }
        inner.stats.inserts += 1;
        inner.stats.current_entries = inner.entries.len();
        plan
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn stats(&self) -> PlanCacheStats {
        let inner = self.inner.lock();
        let mut stats = inner.stats.clone();
        stats.current_entries = inner.entries.len();
        stats
    }

    /// Age of the oldest entry, if any
    pub fn oldest_entry_age(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        let now = Instant::now();
        inner
            .entries
            .iter()
            .map(|(_, entry)| now.duration_since(entry.metadata.created_at))
            .max()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.stats.current_entries = 0;
    }
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new(DEFAULT_PLAN_CACHE_SIZE)
    }
}
