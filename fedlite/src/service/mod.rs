// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Service capability data source
//!
//! Answers `__service { capabilities { identifier value description } }` so
//! clients can discover that the `onError` request extension is supported
//! and which error behavior applies when they do not set one.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;

use crate::error::ResolveError;
use crate::request::Headers;
use crate::resolve::{DataSource, ErrorBehavior};

pub const ON_ERROR_CAPABILITY: &str = "graphql.onError";
pub const DEFAULT_ERROR_BEHAVIOR_CAPABILITY: &str = "graphql.defaultErrorBehavior";

/// One entry of `__service.capabilities`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub identifier: String,
    pub value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ServiceDataSource {
    default_error_behavior: Option<ErrorBehavior>,
}

impl ServiceDataSource {
    pub fn new(default_error_behavior: Option<ErrorBehavior>) -> Self {
        Self {
            default_error_behavior,
        }
    }

    pub fn capabilities(&self) -> Vec<Capability> {
        let mut capabilities = vec![Capability {
            identifier: ON_ERROR_CAPABILITY.to_string(),
            value: None,
            description: Some(
                "Supports the onError request extension with PROPAGATE, NULL and HALT".to_string(),
            ),
        }];
        if let Some(behavior) = self.default_error_behavior {
            capabilities.push(Capability {
                identifier: DEFAULT_ERROR_BEHAVIOR_CAPABILITY.to_string(),
                value: Some(behavior.as_str().to_string()),
                description: Some("Error behavior used when onError is not set".to_string()),
            });
        }
        capabilities
    }
}

#[async_trait]
impl DataSource for ServiceDataSource {
    async fn load(&self, _headers: &Headers, _input: &[u8]) -> Result<Vec<u8>, ResolveError> {
        let body = json!({
            "data": {
                "__service": {
                    "capabilities": self.capabilities(),
                }
            }
        });
        serde_json::to_vec(&body).map_err(|e| ResolveError::InvalidResponse(e.to_string()))
    }
}
