// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Loader cache keys and fault-tolerant cache access
//!
//! Keys are built by hand rather than through `serde_json` so member order is
//! exactly the one external cache backends expect:
//! - root field: `{"__typename":"Query","field":"user"}`, plus `"args"` when present
//! - entity: `{"__typename":"User","keys":{"id":"1"}}`
//!
//! A cache that errors or misbehaves never fails a request. Lookups degrade
//! to misses and failed writes are logged.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde_json::Value as Json;

use crate::cache::{CacheEntry, LoaderCache};

fn quote(value: &str) -> String {
    Json::String(value.to_string()).to_string()
}

/// Key of one root field result
pub fn root_field_cache_key(type_name: &str, field_name: &str, arguments: &[(String, Json)]) -> String {
    let mut key = format!(
        "{{\"__typename\":{},\"field\":{}",
        quote(type_name),
        quote(field_name)
    );
    if !arguments.is_empty() {
        key.push_str(",\"args\":{");
        for (i, (name, value)) in arguments.iter().enumerate() {
            if i > 0 {
                key.push(',');
            }
            let _ = write!(key, "{}:{}", quote(name), value);
        }
        key.push('}');
    }
    key.push('}');
    key
}

/// Key of one entity, `None` when a key field is missing from `representation`
pub fn entity_cache_key(type_name: &str, key_fields: &[String], representation: &Json) -> Option<String> {
    let mut key = format!("{{\"__typename\":{},\"keys\":{{", quote(type_name));
    for (i, field) in key_fields.iter().enumerate() {
        let value = representation.get(field).filter(|v| !v.is_null())?;
        if i > 0 {
            key.push(',');
        }
        let _ = write!(key, "{}:{}", quote(field), value);
    }
    key.push_str("}}");
    Some(key)
}

/// Scope a key to the headers forwarded to the subgraph
pub fn with_header_prefix(key: String, headers_hash: u64) -> String {
    format!("{}:{}", headers_hash, key)
}

/// Look up `keys`, returning one parsed value or `None` per key
pub(crate) async fn load_cached(
    cache: &Arc<dyn LoaderCache>,
    cache_name: &str,
    keys: &[String],
) -> Vec<Option<Json>> {
    let misses = || vec![None; keys.len()];
    let entries = match cache.get(keys).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cache '{}' get failed, treating as miss: {}", cache_name, e);
            return misses();
        }
    };
    if entries.len() != keys.len() {
        warn!(
            "cache '{}' returned {} entries for {} keys, treating as miss",
            cache_name,
            entries.len(),
            keys.len()
        );
        return misses();
    }
    entries
        .into_iter()
        .map(|entry| {
            let entry = entry?;
            match serde_json::from_slice::<Json>(&entry.value) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(
                        "cache '{}' holds unreadable value for {}: {}",
                        cache_name, entry.key, e
                    );
                    None
                }
            }
        })
        .collect()
}

/// Store values; failures are logged and otherwise ignored
pub(crate) async fn store_cached(
    cache: &Arc<dyn LoaderCache>,
    cache_name: &str,
    values: Vec<(String, &Json)>,
    ttl: Duration,
) -> usize {
    if values.is_empty() {
        return 0;
    }
    let entries: Vec<CacheEntry> = values
        .into_iter()
        .map(|(key, value)| CacheEntry::new(key, value.to_string()))
        .collect();
    let count = entries.len();
    match cache.set(entries, ttl).await {
        Ok(()) => count,
        Err(e) => {
            warn!("cache '{}' set failed: {}", cache_name, e);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryLoaderCache;
    use crate::error::CacheError;
    use async_trait::async_trait;
    use serde_json::json;

    #[test]
    fn test_root_field_key() {
        assert_eq!(
            root_field_cache_key("Query", "user", &[]),
            r#"{"__typename":"Query","field":"user"}"#
        );
        assert_eq!(
            root_field_cache_key(
                "Query",
                "user",
                &[("id".to_string(), json!("1")), ("first".to_string(), json!(5))]
            ),
            r#"{"__typename":"Query","field":"user","args":{"id":"1","first":5}}"#
        );
    }

    #[test]
    fn test_entity_key() {
        let keys = vec!["id".to_string()];
        assert_eq!(
            entity_cache_key("User", &keys, &json!({"__typename": "User", "id": "1234"})).unwrap(),
            r#"{"__typename":"User","keys":{"id":"1234"}}"#
        );
        assert!(entity_cache_key("User", &keys, &json!({"__typename": "User"})).is_none());
        let compound = vec!["upc".to_string(), "sku".to_string()];
        assert_eq!(
            entity_cache_key("Product", &compound, &json!({"sku": 7, "upc": "top-1"})).unwrap(),
            r#"{"__typename":"Product","keys":{"upc":"top-1","sku":7}}"#
        );
    }

    #[test]
    fn test_header_prefix() {
        assert_eq!(
            with_header_prefix(r#"{"a":1}"#.to_string(), 42),
            r#"42:{"a":1}"#
        );
    }

    struct BrokenCache;

    #[async_trait]
    impl LoaderCache for BrokenCache {
        async fn get(&self, _keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }

        async fn set(&self, _entries: Vec<CacheEntry>, _ttl: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("down".to_string()))
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
            Ok(())
        }
    }

    struct ShortCache;

    #[async_trait]
    impl LoaderCache for ShortCache {
        async fn get(&self, _keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
            Ok(vec![Some(CacheEntry::new("a", "1"))])
        }

        async fn set(&self, _entries: Vec<CacheEntry>, _ttl: Duration) -> Result<(), CacheError> {
            Ok(())
        }

        async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_cache_degrades_to_misses() {
        let cache: Arc<dyn LoaderCache> = Arc::new(BrokenCache);
        let keys = vec!["a".to_string(), "b".to_string()];
        assert_eq!(load_cached(&cache, "broken", &keys).await, vec![None, None]);
        let value = json!({"id": "1"});
        assert_eq!(
            store_cached(&cache, "broken", vec![("a".to_string(), &value)], Duration::ZERO).await,
            0
        );

        let cache: Arc<dyn LoaderCache> = Arc::new(ShortCache);
        assert_eq!(load_cached(&cache, "short", &keys).await, vec![None, None]);
    }

    #[tokio::test]
    async fn test_unreadable_value_is_a_miss() {
        let memory = Arc::new(InMemoryLoaderCache::unbounded());
        memory
            .set(
                vec![CacheEntry::new("a", "{not json"), CacheEntry::new("b", r#"{"id":"2"}"#)],
                Duration::ZERO,
            )
            .await
            .unwrap();
        let cache: Arc<dyn LoaderCache> = memory;
        let loaded = load_cached(&cache, "memory", &["a".to_string(), "b".to_string()]).await;
        assert_eq!(loaded, vec![None, Some(json!({"id": "2"}))]);
    }
}
