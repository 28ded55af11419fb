// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-call execution context

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tokio_util::sync::CancellationToken;

use super::ErrorBehavior;
use crate::request::Headers;

/// Which trace details to attach under `extensions.trace`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceOptions {
    pub enable: bool,
    /// Include the rendered subgraph request bodies
    #[serde(default)]
    pub include_input: bool,
    /// Include plan cache and planning timings
    #[serde(default)]
    pub include_planner_stats: bool,
}

impl TraceOptions {
    pub fn enabled() -> Self {
        Self {
            enable: true,
            include_input: true,
            include_planner_stats: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    pub error_behavior: ErrorBehavior,
    /// Whether `error_behavior` was chosen by the caller or the request
    pub error_behavior_explicit: bool,
    pub tracing: TraceOptions,
}

/// Planning facts recorded by the engine before dispatch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannerStats {
    pub plan_cache_hit: bool,
    pub planning_time: Duration,
}

/// Request-scoped state handed to the resolver
///
/// Contexts are pooled by the engine; [`Context::reset`] must clear every
/// field that carries request data.
#[derive(Debug, Clone)]
pub struct Context {
    pub variables: Json,
    pub headers: Headers,
    pub options: ExecutionOptions,
    pub planner_stats: Option<PlannerStats>,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            variables: Json::Object(Map::new()),
            headers: Headers::new(),
            options: ExecutionOptions::default(),
            planner_stats: None,
            cancel,
        }
    }

    pub fn with_variables(mut self, variables: Json) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_error_behavior(mut self, behavior: ErrorBehavior) -> Self {
        self.options.error_behavior = behavior;
        self.options.error_behavior_explicit = true;
        self
    }

    pub fn with_tracing(mut self, tracing: TraceOptions) -> Self {
        self.options.tracing = tracing;
        self
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn set_cancel_token(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn error_behavior(&self) -> ErrorBehavior {
        self.options.error_behavior
    }

    /// Clear all request-scoped state so the context can serve another call
    pub fn reset(&mut self) {
        self.variables = Json::Object(Map::new());
        self.headers = Headers::new();
        self.options = ExecutionOptions::default();
        self.planner_stats = None;
        self.cancel = CancellationToken::new();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}
