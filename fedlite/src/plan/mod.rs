// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution plans and the planner seam
//!
//! The planner that maps a normalized operation onto subgraph fetches is an
//! external collaborator behind the [`Planner`] trait. Its output is
//! post-processed into the executable form kept in the plan cache.

pub mod postprocess;

pub use postprocess::PostProcessor;

use std::sync::Arc;

use crate::ast::{Document, OperationType};
use crate::error::OperationReport;
use crate::resolve::fetch::{FetchTreeNode, InputTemplate, PostProcessing};
use crate::resolve::node::Object;
use crate::schema::Schema;

/// Resolvable execution shape for one normalized operation
///
/// Plans are immutable once built; clones share the same inner plan.
#[derive(Debug, Clone)]
pub enum Plan {
    Synchronous(Arc<SynchronousResponsePlan>),
    Subscription(Arc<SubscriptionResponsePlan>),
    /// A planner result this engine cannot dispatch
    Unsupported { kind: String },
}

impl Plan {
    pub fn synchronous(response: GraphQLResponse) -> Self {
        Plan::Synchronous(Arc::new(SynchronousResponsePlan { response }))
    }

    pub fn subscription(trigger: SubscriptionTrigger, response: GraphQLResponse) -> Self {
        Plan::Subscription(Arc::new(SubscriptionResponsePlan { trigger, response }))
    }

    pub fn kind(&self) -> &str {
        match self {
            Plan::Synchronous(_) => "synchronous",
            Plan::Subscription(_) => "subscription",
            Plan::Unsupported { kind } => kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynchronousResponsePlan {
    pub response: GraphQLResponse,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionResponsePlan {
    pub trigger: SubscriptionTrigger,
    pub response: GraphQLResponse,
}

/// Fetches to run and the response shape to render from their data
#[derive(Debug, Clone, PartialEq)]
pub struct GraphQLResponse {
    pub fetches: FetchTreeNode,
    pub data: Object,
    pub info: OperationInfo,
}

impl GraphQLResponse {
    pub fn new(fetches: FetchTreeNode, data: Object) -> Self {
        Self {
            fetches,
            data,
            info: OperationInfo::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationInfo {
    pub operation_type: OperationType,
    pub operation_name: Option<String>,
}

impl Default for OperationInfo {
    fn default() -> Self {
        Self {
            operation_type: OperationType::Query,
            operation_name: None,
        }
    }
}

/// Upstream event stream that drives a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionTrigger {
    pub data_source_id: String,
    pub data_source_name: String,
    pub input: InputTemplate,
    pub post_processing: PostProcessing,
}

/// Builds a plan from a normalized operation
///
/// Called with the engine's planning lock held, so implementations may keep
/// mutable state without their own synchronization.
pub trait Planner: Send {
    fn plan(
        &mut self,
        operation: &Document,
        schema: &Schema,
        operation_name: Option<&str>,
    ) -> Result<Plan, OperationReport>;
}

impl<F> Planner for F
where
    F: FnMut(&Document, &Schema, Option<&str>) -> Result<Plan, OperationReport> + Send,
{
    fn plan(
        &mut self,
        operation: &Document,
        schema: &Schema,
        operation_name: Option<&str>,
    ) -> Result<Plan, OperationReport> {
        self(operation, schema, operation_name)
    }
}
