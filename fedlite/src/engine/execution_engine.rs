// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution engine: normalize, validate, plan once, dispatch
//!
//! Plans are keyed by the xxh64 digest of the printed normalized operation
//! and the schema digest. Cache hits never touch the planning lock; misses
//! are planned one at a time behind a single mutex.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh64::Xxh64;

use super::config::EngineSettings;
use super::context_pool::ContextPool;
use crate::ast::{print_operation, Document};
use crate::cache::{PlanCache, PlanCacheStats};
use crate::error::{EngineError, OperationReport, RequestError};
use crate::plan::{Plan, Planner, PostProcessor};
use crate::request::{Headers, Request};
use crate::resolve::{
    Context, ErrorBehavior, PlannerStats, Resolver, ResponseWriter, SubscriptionIdentifier,
    TraceOptions,
};
use crate::schema::Schema;

/// Per-call configuration applied to the isolated execution context
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOption {
    /// Forward extra headers to subgraphs and drop the excluded ones
    AdditionalHeaders {
        headers: Headers,
        exclude_keys: Vec<String>,
    },
    RequestTrace(TraceOptions),
    /// Overrides the request's `onError` extension
    ErrorBehavior(ErrorBehavior),
}

pub fn with_additional_headers(headers: Headers, exclude_keys: Vec<String>) -> ExecutionOption {
    ExecutionOption::AdditionalHeaders {
        headers,
        exclude_keys,
    }
}

pub fn with_request_trace_options(options: TraceOptions) -> ExecutionOption {
    ExecutionOption::RequestTrace(options)
}

pub fn with_error_behavior(behavior: ErrorBehavior) -> ExecutionOption {
    ExecutionOption::ErrorBehavior(behavior)
}

/// Streams printed operation text straight into the hasher
struct HashWriter<'a>(&'a mut Xxh64);

impl fmt::Write for HashWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.0.update(s.as_bytes());
        Ok(())
    }
}

pub struct ExecutionEngine {
    schema: Schema,
    schema_hash: u64,
    planner: Mutex<Box<dyn Planner>>,
    post_processor: PostProcessor,
    plan_cache: PlanCache,
    resolver: Resolver,
    contexts: ContextPool,
    settings: EngineSettings,
}

impl ExecutionEngine {
    pub fn new(
        schema: Schema,
        planner: Box<dyn Planner>,
        resolver: Resolver,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        settings.validate()?;
        let schema_hash = schema.hash();
        Ok(Self {
            schema,
            schema_hash,
            planner: Mutex::new(planner),
            post_processor: PostProcessor::new(),
            plan_cache: PlanCache::new(settings.plan_cache_size),
            resolver,
            contexts: ContextPool::new(),
            settings,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn plan_cache_stats(&self) -> PlanCacheStats {
        self.plan_cache.stats()
    }

    pub fn plan_cache_len(&self) -> usize {
        self.plan_cache.len()
    }

    /// Contexts returned to the pool so far
    pub fn released_contexts(&self) -> u64 {
        self.contexts.released()
    }

    /// Execute one request and write its response
    ///
    /// Synchronous operations write exactly one response. Subscriptions block
    /// until the upstream stream ends or `cancel` fires, writing one response
    /// per event.
    pub async fn execute(
        &self,
        cancel: CancellationToken,
        request: &mut Request,
        writer: &mut dyn ResponseWriter,
        options: &[ExecutionOption],
    ) -> Result<(), EngineError> {
        let (plan, stats) = self.prepare(request)?;
        let mut ctx = self.contexts.acquire();
        self.configure(&mut ctx, cancel, request, options, stats);

        match plan {
            Plan::Synchronous(sync) => {
                self.resolver
                    .resolve_graphql_response(&ctx, &sync.response, writer)
                    .await?
            }
            Plan::Subscription(subscription) => {
                self.resolver
                    .resolve_graphql_subscription(&ctx, &subscription, writer)
                    .await?
            }
            Plan::Unsupported { kind } => {
                warn!("cannot dispatch plan of kind '{}'", kind);
                return Err(EngineError::ExecutionNotPossible);
            }
        }
        Ok(())
    }

    /// Register a subscription on the resolver's event loop and return
    ///
    /// The subscription runs until the upstream ends, `cancel` fires or it is
    /// removed with [`Resolver::async_unsubscribe_subscription`].
    pub async fn execute_async_subscription(
        &self,
        cancel: CancellationToken,
        request: &mut Request,
        writer: Box<dyn ResponseWriter>,
        id: SubscriptionIdentifier,
        options: &[ExecutionOption],
    ) -> Result<(), EngineError> {
        let (plan, stats) = self.prepare(request)?;
        let subscription = match plan {
            Plan::Subscription(subscription) => subscription,
            other => {
                warn!("plan of kind '{}' cannot be subscribed to", other.kind());
                return Err(EngineError::ExecutionNotPossible);
            }
        };
        let mut ctx = self.contexts.acquire();
        self.configure(&mut ctx, cancel, request, options, stats);
        let ctx = ctx.detach();
        self.resolver
            .async_resolve_graphql_subscription(ctx, subscription, writer, id)
            .await?;
        Ok(())
    }

    fn prepare(&self, request: &mut Request) -> Result<(Plan, PlannerStats), EngineError> {
        request.normalize(&self.schema)?;
        let validation = request.validate(&self.schema);
        if !validation.valid {
            return Err(EngineError::Validation(OperationReport {
                errors: validation.errors,
            }));
        }
        request.validate_variables().map_err(EngineError::Validation)?;

        let document = request
            .document()
            .ok_or(EngineError::Request(RequestError::EmptyRequest))?;
        let key = self.operation_key(document)?;
        if let Some(plan) = self.plan_cache.get(key) {
            debug!("plan cache hit for {:016x}", key);
            return Ok((
                plan,
                PlannerStats {
                    plan_cache_hit: true,
                    planning_time: Duration::ZERO,
                },
            ));
        }
        debug!("plan cache miss for {:016x}", key);
        self.plan_operation(key, document)
    }

    fn operation_key(&self, document: &Document) -> Result<u64, EngineError> {
        let mut hasher = Xxh64::new(0);
        print_operation(document, 0, &mut HashWriter(&mut hasher)).map_err(|_| {
            EngineError::Planning(OperationReport::from_message("failed to print operation"))
        })?;
        hasher.update(&self.schema_hash.to_le_bytes());
        Ok(hasher.digest())
    }

    fn plan_operation(&self, key: u64, document: &Document) -> Result<(Plan, PlannerStats), EngineError> {
        let mut planner = self.planner.lock();
        // Another caller may have planned this operation while we waited
        if let Some(plan) = self.plan_cache.peek(key) {
            return Ok((
                plan,
                PlannerStats {
                    plan_cache_hit: true,
                    planning_time: Duration::ZERO,
                },
            ));
        }

        let started = Instant::now();
        let operation_name = document.operations.first().and_then(|op| op.name.as_deref());
        let plan = planner
            .plan(document, &self.schema, operation_name)
            .map_err(EngineError::Planning)?;
        let plan = self
            .post_processor
            .process(plan)
            .map_err(EngineError::Planning)?;
        let planning_time = started.elapsed();
        debug!(
            "planned {} operation in {:?}",
            plan.kind(),
            planning_time
        );
        let plan = self.plan_cache.insert(key, plan, planning_time);
        Ok((
            plan,
            PlannerStats {
                plan_cache_hit: false,
                planning_time,
            },
        ))
    }

    /// Fill a fresh context; options win over the request, which wins over settings
    fn configure(
        &self,
        ctx: &mut Context,
        cancel: CancellationToken,
        request: &Request,
        options: &[ExecutionOption],
        stats: PlannerStats,
    ) {
        ctx.set_cancel_token(cancel);
        ctx.variables = request.variables_object();
        ctx.planner_stats = Some(stats);

        let (behavior, explicit) = request.on_error_behavior();
        ctx.options.error_behavior = match (explicit, self.settings.default_error_behavior) {
            (true, _) => behavior,
            (false, Some(default)) => default,
            (false, None) => ErrorBehavior::Propagate,
        };
        ctx.options.error_behavior_explicit = explicit;

        let mut headers = request.headers().clone();
        for option in options {
            match option {
                ExecutionOption::AdditionalHeaders {
                    headers: extra,
                    exclude_keys,
                } => {
                    headers.extend_from(extra);
                    headers.exclude(exclude_keys);
                }
                ExecutionOption::RequestTrace(trace) => ctx.options.tracing = trace.clone(),
                ExecutionOption::ErrorBehavior(behavior) => {
                    ctx.options.error_behavior = *behavior;
                    ctx.options.error_behavior_explicit = true;
                }
            }
        }
        ctx.headers = headers;
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("plan_cache_len", &self.plan_cache.len())
            .field("settings", &self.settings)
            .finish()
    }
}
