// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Engine configuration

use serde::{Deserialize, Serialize};

use crate::cache::plan_cache::DEFAULT_PLAN_CACHE_SIZE;
use crate::cache::{CachePolicy, CachingOptions, SubgraphCachingConfig};
use crate::error::EngineError;
use crate::resolve::{ErrorBehavior, ResolverBuilder, ResolverOptions};

/// Settings of one [`ExecutionEngine`](super::ExecutionEngine) and its resolver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Maximum number of plans kept in the plan cache
    pub plan_cache_size: usize,
    /// Behavior used when neither the caller nor the request selects one
    pub default_error_behavior: Option<ErrorBehavior>,
    pub resolver: ResolverOptions,
    pub caching: CachingOptions,
    pub subgraph_caching: Vec<SubgraphCachingConfig>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            plan_cache_size: DEFAULT_PLAN_CACHE_SIZE,
            default_error_behavior: None,
            resolver: ResolverOptions::default(),
            caching: CachingOptions::default(),
            subgraph_caching: Vec::new(),
        }
    }
}

impl EngineSettings {
    /// Load settings from a JSON document; absent members keep their defaults
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let settings: EngineSettings = serde_json::from_str(json)
            .map_err(|e| EngineError::Configuration(format!("invalid engine settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.plan_cache_size == 0 {
            return Err(EngineError::Configuration(
                "plan_cache_size must be greater than 0".to_string(),
            ));
        }
        self.resolver.validate().map_err(EngineError::Configuration)?;
        CachePolicy::new(self.subgraph_caching.clone(), &self.caching)
            .validate()
            .map_err(EngineError::Configuration)
    }

    /// A resolver builder carrying the resolver and caching settings
    ///
    /// Data sources and named caches still have to be registered on it.
    pub fn resolver_builder(&self) -> ResolverBuilder {
        ResolverBuilder::new(self.resolver.clone())
            .caching_options(self.caching.clone())
            .subgraph_caching(self.subgraph_caching.clone())
    }

    /// Configure for development: small plan cache, no loader caching
    pub fn development() -> Self {
        Self {
            plan_cache_size: 64,
            caching: CachingOptions {
                enable_l2_cache: false,
            },
            ..Default::default()
        }
    }
}
