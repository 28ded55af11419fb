// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache configuration and policies

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::time::Duration;

/// Cache policy for a top-level field on one subgraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootFieldCacheConfiguration {
    pub type_name: String,
    pub field_name: String,
    pub cache_name: String,
    /// Zero keeps entries until they are deleted
    #[serde(with = "ttl_seconds", default)]
    pub ttl: Duration,
    /// Prefix keys with a digest of the forwarded subgraph headers
    #[serde(default)]
    pub include_subgraph_header_prefix: bool,
}

impl RootFieldCacheConfiguration {
    pub fn new(type_name: &str, field_name: &str, cache_name: &str, ttl: Duration) -> Self {
        Self {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
            cache_name: cache_name.to_string(),
            ttl,
            include_subgraph_header_prefix: false,
        }
    }

    pub fn with_header_prefix(mut self) -> Self {
        self.include_subgraph_header_prefix = true;
        self
    }
}

/// Cache policy for a federated entity type on one subgraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCacheConfiguration {
    pub type_name: String,
    pub cache_name: String,
    #[serde(with = "ttl_seconds", default)]
    pub ttl: Duration,
    #[serde(default)]
    pub include_subgraph_header_prefix: bool,
    /// Fetch only the entities that missed instead of the whole batch
    #[serde(default)]
    pub enable_partial_cache_load: bool,
}

impl EntityCacheConfiguration {
    pub fn new(type_name: &str, cache_name: &str, ttl: Duration) -> Self {
        Self {
            type_name: type_name.to_string(),
            cache_name: cache_name.to_string(),
            ttl,
            include_subgraph_header_prefix: false,
            enable_partial_cache_load: false,
        }
    }

    pub fn with_partial_cache_load(mut self) -> Self {
        self.enable_partial_cache_load = true;
        self
    }

    pub fn with_header_prefix(mut self) -> Self {
        self.include_subgraph_header_prefix = true;
        self
    }
}

/// All cache policies of one subgraph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubgraphCachingConfig {
    pub subgraph_name: String,
    #[serde(default)]
    pub root_field_caching: Vec<RootFieldCacheConfiguration>,
    #[serde(default)]
    pub entity_caching: Vec<EntityCacheConfiguration>,
}

impl SubgraphCachingConfig {
    pub fn new(subgraph_name: &str) -> Self {
        Self {
            subgraph_name: subgraph_name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_root_field(mut self, config: RootFieldCacheConfiguration) -> Self {
        self.root_field_caching.push(config);
        self
    }

    pub fn with_entity(mut self, config: EntityCacheConfiguration) -> Self {
        self.entity_caching.push(config);
        self
    }
}

/// Engine-wide caching switches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachingOptions {
    /// Consult loader caches at all
    pub enable_l2_cache: bool,
}

impl Default for CachingOptions {
    fn default() -> Self {
        Self {
            enable_l2_cache: true,
        }
    }
}

/// Lookup of cache policies by subgraph and type
#[derive(Debug, Clone, Default)]
pub struct CachePolicy {
    subgraphs: HashMap<String, SubgraphCachingConfig>,
    enabled: bool,
}

impl CachePolicy {
    pub fn new(configs: Vec<SubgraphCachingConfig>, options: &CachingOptions) -> Self {
        Self {
            subgraphs: configs
                .into_iter()
                .map(|c| (c.subgraph_name.clone(), c))
                .collect(),
            enabled: options.enable_l2_cache,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && !self.subgraphs.is_empty()
    }

    pub fn root_field(
        &self,
        subgraph_name: &str,
        type_name: &str,
        field_name: &str,
    ) -> Option<&RootFieldCacheConfiguration> {
        if !self.enabled {
            return None;
        }
        self.subgraphs
            .get(subgraph_name)?
            .root_field_caching
            .iter()
            .find(|c| c.type_name == type_name && c.field_name == field_name)
    }

    pub fn entity(&self, subgraph_name: &str, type_name: &str) -> Option<&EntityCacheConfiguration> {
        if !self.enabled {
            return None;
        }
        self.subgraphs
            .get(subgraph_name)?
            .entity_caching
            .iter()
            .find(|c| c.type_name == type_name)
    }

    /// Check every configuration for missing names
    pub fn validate(&self) -> Result<(), String> {
        for config in self.subgraphs.values() {
            if config.subgraph_name.is_empty() {
                return Err("Subgraph caching config requires a subgraph name".to_string());
            }
            for root in &config.root_field_caching {
                if root.type_name.is_empty() || root.field_name.is_empty() {
                    return Err(format!(
                        "Root field cache config on '{}' requires type and field names",
                        config.subgraph_name
                    ));
                }
                if root.cache_name.is_empty() {
                    return Err(format!(
                        "Root field cache config {}.{} requires a cache name",
                        root.type_name, root.field_name
                    ));
                }
            }
            for entity in &config.entity_caching {
                if entity.type_name.is_empty() || entity.cache_name.is_empty() {
                    return Err(format!(
                        "Entity cache config on '{}' requires type and cache names",
                        config.subgraph_name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Every cache name referenced by any policy
    pub fn cache_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .subgraphs
            .values()
            .flat_map(|c| {
                c.root_field_caching
                    .iter()
                    .map(|r| r.cache_name.as_str())
                    .chain(c.entity_caching.iter().map(|e| e.cache_name.as_str()))
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}

mod ttl_seconds {
    use super::*;

    pub fn serialize<S: Serializer>(ttl: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(ttl.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> CachePolicy {
        CachePolicy::new(
            vec![SubgraphCachingConfig::new("accounts")
                .with_root_field(RootFieldCacheConfiguration::new(
                    "Query",
                    "me",
                    "default",
                    Duration::from_secs(30),
                ))
                .with_entity(
                    EntityCacheConfiguration::new("User", "entities", Duration::ZERO)
                        .with_partial_cache_load(),
                )],
            &CachingOptions::default(),
        )
    }

    #[test]
    fn test_lookup() {
        let policy = policy();
        assert!(policy.root_field("accounts", "Query", "me").is_some());
        assert!(policy.root_field("accounts", "Query", "other").is_none());
        assert!(policy.root_field("reviews", "Query", "me").is_none());
        assert!(policy.entity("accounts", "User").unwrap().enable_partial_cache_load);
        assert!(policy.validate().is_ok());
        assert_eq!(policy.cache_names(), vec!["default", "entities"]);
    }

    #[test]
    fn test_disabled_policy_finds_nothing() {
        let policy = CachePolicy::new(
            vec![SubgraphCachingConfig::new("accounts").with_entity(EntityCacheConfiguration::new(
                "User",
                "default",
                Duration::ZERO,
            ))],
            &CachingOptions {
                enable_l2_cache: false,
            },
        );
        assert!(policy.entity("accounts", "User").is_none());
        assert!(!policy.is_enabled());
    }

    #[test]
    fn test_deserialize_ttl_seconds() {
        let config: SubgraphCachingConfig = serde_json::from_str(
            r#"{"subgraph_name":"accounts","entity_caching":[{"type_name":"User","cache_name":"default","ttl":60,"enable_partial_cache_load":true}]}"#,
        )
        .unwrap();
        let entity = &config.entity_caching[0];
        assert_eq!(entity.ttl, Duration::from_secs(60));
        assert!(entity.enable_partial_cache_load);
        assert!(!entity.include_subgraph_header_prefix);
    }

    #[test]
    fn test_validate_rejects_missing_cache_name() {
        let policy = CachePolicy::new(
            vec![SubgraphCachingConfig::new("accounts").with_root_field(
                RootFieldCacheConfiguration::new("Query", "me", "", Duration::ZERO),
            )],
            &CachingOptions::default(),
        );
        assert!(policy.validate().is_err());
    }
}
