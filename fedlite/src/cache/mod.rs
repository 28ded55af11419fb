// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Caching
//!
//! Two unrelated caches live here:
//! - the plan cache, keyed by the digest of a normalized operation
//! - loader caches, pluggable key/value stores the resolver uses for
//!   root-field and entity results

pub mod cache_config;
pub mod memory_cache;
pub mod plan_cache;

pub use cache_config::{
    CachePolicy, CachingOptions, EntityCacheConfiguration, RootFieldCacheConfiguration,
    SubgraphCachingConfig,
};
pub use memory_cache::{CacheOperation, CacheOperationKind, InMemoryLoaderCache};
pub use plan_cache::{PlanCache, PlanCacheStats};

use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::CacheError;

/// One cached data fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// Opaque bytes, JSON for everything the resolver stores
    pub value: Vec<u8>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Pluggable key/value store consulted by the resolver
///
/// Implementations must be safe for concurrent use; the resolver adds no
/// locking of its own around these calls.
#[async_trait]
pub trait LoaderCache: Send + Sync {
    /// Look up `keys`; the result has exactly one slot per key, `None` for a miss
    ///
    /// Report unreadable or unavailable keys as misses rather than failing
    /// the call. The resolver treats an `Err`, or a result of the wrong
    /// length, as a miss for every key, so one bad key would otherwise throw
    /// away the hits of the whole batch.
    async fn get(&self, keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError>;

    /// Store `entries`; a zero `ttl` keeps them until deleted
    async fn set(&self, entries: Vec<CacheEntry>, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, keys: &[String]) -> Result<(), CacheError>;
}

/// Bookkeeping attached to every stored entry
#[derive(Debug, Clone)]
pub struct CacheEntryMetadata {
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub access_count: u32,
    pub size_bytes: usize,
    pub ttl: Option<Duration>,
}

impl CacheEntryMetadata {
    pub fn new(size_bytes: usize) -> Self {
        let now = Instant::now();
        Self {
            created_at: now,
            last_accessed: now,
            access_count: 0,
            size_bytes,
            ttl: None,
        }
    }

    /// A zero TTL means the entry never expires
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = if ttl.is_zero() { None } else { Some(ttl) };
        self
    }

    pub fn is_expired(&self) -> bool {
        if let Some(ttl) = self.ttl {
            self.created_at.elapsed() > ttl
        } else {
            false
        }
    }

    pub fn update_access(&mut self) {
        self.last_accessed = Instant::now();
        self.access_count += 1;
    }
}
