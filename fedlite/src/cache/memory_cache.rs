// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-memory loader cache
//!
//! LRU-bounded with per-entry TTL. Caches built with
//! [`InMemoryLoaderCache::with_operation_log`] also record every call, which
//! makes them useful for asserting hit and write patterns. The log grows with
//! every call, so it is off unless asked for.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use log::trace;
use lru::LruCache;
use parking_lot::Mutex;

use super::{CacheEntry, CacheEntryMetadata, LoaderCache};
use crate::error::CacheError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOperationKind {
    Get,
    Set,
    Delete,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOperation {
    pub kind: CacheOperationKind,
    pub keys: Vec<String>,
    /// For `Get`, whether each key hit
    pub hits: Vec<bool>,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl MemoryCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct StoredEntry {
    value: Vec<u8>,
    metadata: CacheEntryMetadata,
}

struct Inner {
    entries: LruCache<String, StoredEntry>,
    /// `None` while the operation log is disabled
    operations: Option<Vec<CacheOperation>>,
    stats: MemoryCacheStats,
}

impl Inner {
    fn record(&mut self, operation: impl FnOnce() -> CacheOperation) {
        if let Some(operations) = self.operations.as_mut() {
            operations.push(operation());
        }
    }
}

pub struct InMemoryLoaderCache {
    inner: Mutex<Inner>,
}

impl InMemoryLoaderCache {
    pub fn new(max_entries: usize) -> Self {
        let entries = match NonZeroUsize::new(max_entries) {
            Some(capacity) => LruCache::new(capacity),
            None => LruCache::unbounded(),
        };
        Self {
            inner: Mutex::new(Inner {
                entries,
                operations: None,
                stats: MemoryCacheStats::default(),
            }),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Record every `get`, `set` and `delete` until [`Self::clear_operations`]
    pub fn with_operation_log(self) -> Self {
        self.inner.lock().operations = Some(Vec::new());
        self
    }

    /// Recorded calls; always empty without [`Self::with_operation_log`]
    pub fn operations(&self) -> Vec<CacheOperation> {
        self.inner.lock().operations.clone().unwrap_or_default()
    }

    pub fn clear_operations(&self) {
        if let Some(operations) = self.inner.lock().operations.as_mut() {
            operations.clear();
        }
    }

    pub fn stats(&self) -> MemoryCacheStats {
        self.inner.lock().stats.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw stored value without touching LRU order or the log
    pub fn peek(&self, key: &str) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .entries
            .peek(key)
            .filter(|e| !e.metadata.is_expired())
            .map(|e| e.value.clone())
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        if let Some(operations) = inner.operations.as_mut() {
            operations.clear();
        }
        inner.stats = MemoryCacheStats::default();
    }
}

#[async_trait]
impl LoaderCache for InMemoryLoaderCache {
    async fn get(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut result = Vec::with_capacity(keys.len());
        let mut hits = Vec::with_capacity(keys.len());
        for key in keys {
            let expired = inner
                .entries
                .peek(key)
                .map_or(false, |e| e.metadata.is_expired());
            if expired {
                inner.entries.pop(key);
                inner.stats.expirations += 1;
            }
            match inner.entries.get_mut(key) {
                Some(entry) => {
                    entry.metadata.update_access();
                    let value = entry.value.clone();
                    inner.stats.hits += 1;
                    hits.push(true);
                    result.push(Some(CacheEntry::new(key.clone(), value)));
                }
                None => {
                    inner.stats.misses += 1;
                    hits.push(false);
                    result.push(None);
                }
            }
        }
        trace!("cache get {:?} -> hits {:?}", keys, hits);
        inner.record(|| CacheOperation {
            kind: CacheOperationKind::Get,
            keys: keys.to_vec(),
            hits,
            ttl: None,
        });
        Ok(result)
    }

    async fn set(&self, entries: Vec<CacheEntry>, ttl: Duration) -> Result<(), CacheError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        for entry in entries {
            let metadata = CacheEntryMetadata::new(entry.value.len()).with_ttl(ttl);
            let stored = StoredEntry {
                value: entry.value,
                metadata,
            };
            if let Some((evicted, _)) = inner.entries.push(entry.key.clone(), stored) {
                if evicted != entry.key {
                    inner.stats.evictions += 1;
                }
            }
            inner.stats.sets += 1;
        }
        trace!("cache set {:?} ttl {:?}", keys, ttl);
        inner.record(|| CacheOperation {
            kind: CacheOperationKind::Set,
            keys,
            hits: Vec::new(),
            ttl: Some(ttl),
        });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        for key in keys {
            if inner.entries.pop(key).is_some() {
                inner.stats.deletes += 1;
            }
        }
        inner.record(|| CacheOperation {
            kind: CacheOperationKind::Delete,
            keys: keys.to_vec(),
            hits: Vec::new(),
            ttl: None,
        });
        Ok(())
    }
}
