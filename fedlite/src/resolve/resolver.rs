// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Resolver: executes plans against registered data sources

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as Json};
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;

use super::context::Context;
use super::datasource::{DataSource, SubscriptionDataSource};
use super::loader::{FetchTrace, Loader, LoaderEnv};
use super::resolvable::{RenderedResponse, Resolvable};
use super::subscription::{Command, EventLoop, SubscriptionIdentifier, SubscriptionStats};
use super::writer::ResponseWriter;
use crate::cache::{CachePolicy, CachingOptions, LoaderCache, SubgraphCachingConfig};
use crate::error::{EngineError, GraphQLError, ResolveError};
use crate::plan::{GraphQLResponse, SubscriptionResponsePlan};

pub const DEFAULT_MAX_CONCURRENCY: usize = 1024;
pub const DEFAULT_MAX_SUBSCRIPTION_WORKERS: usize = 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// Maximum subgraph requests in flight across all executions
    pub max_concurrency: usize,
    /// Maximum subscription updates resolved at the same time
    pub max_subscription_workers: usize,
    /// Attach upstream errors under `extensions.errors` of the fetch error
    pub propagate_subgraph_errors: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_subscription_workers: DEFAULT_MAX_SUBSCRIPTION_WORKERS,
            propagate_subgraph_errors: true,
        }
    }
}

impl ResolverOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".to_string());
        }
        if self.max_subscription_workers == 0 {
            return Err("max_subscription_workers must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// State shared by the resolver, its subscription event loop and workers
pub(crate) struct ResolverShared {
    pub loader: LoaderEnv,
    pub subscription_sources: HashMap<String, Arc<dyn SubscriptionDataSource>>,
    pub subscription_workers: Semaphore,
}

impl ResolverShared {
    /// Load all fetches on top of `initial` and render the client response
    pub async fn render(
        &self,
        ctx: &Context,
        response: &GraphQLResponse,
        initial: Json,
        upstream_errors: Vec<GraphQLError>,
    ) -> Result<String, ResolveError> {
        let mut loaded = Loader::new(&self.loader, ctx).load(&response.fetches, initial).await;
        if ctx.is_canceled() {
            return Err(ResolveError::Canceled);
        }
        let mut errors = upstream_errors;
        errors.append(&mut loaded.errors);
        let rendered: RenderedResponse = Resolvable::new(&ctx.variables, ctx.error_behavior(), &loaded.failed_paths)
            .resolve(&response.data, &loaded.data, errors);
        let extensions = trace_extension(ctx, &loaded.traces);
        rendered.to_json(extensions.as_ref())
    }
}

fn trace_extension(ctx: &Context, fetches: &[FetchTrace]) -> Option<Json> {
    let tracing = &ctx.options.tracing;
    if !tracing.enable {
        return None;
    }
    let mut trace = Map::new();
    if tracing.include_planner_stats {
        if let Some(stats) = &ctx.planner_stats {
            trace.insert(
                "planner".to_string(),
                json!({
                    "plan_cache_hit": stats.plan_cache_hit,
                    "planning_time_us": stats.planning_time.as_micros() as u64,
                }),
            );
        }
    }
    let fetches = serde_json::to_value(fetches).unwrap_or(Json::Null);
    trace.insert("fetches".to_string(), fetches);
    Some(json!({ "trace": trace }))
}

/// Registers data sources and caches, then builds a [`Resolver`]
#[derive(Default)]
pub struct ResolverBuilder {
    options: ResolverOptions,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
    subscription_sources: HashMap<String, Arc<dyn SubscriptionDataSource>>,
    caches: HashMap<String, Arc<dyn LoaderCache>>,
    subgraph_caching: Vec<SubgraphCachingConfig>,
    caching_options: CachingOptions,
}

impl ResolverBuilder {
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    pub fn data_source(mut self, id: &str, source: Arc<dyn DataSource>) -> Self {
        self.data_sources.insert(id.to_string(), source);
        self
    }

    pub fn subscription_data_source(mut self, id: &str, source: Arc<dyn SubscriptionDataSource>) -> Self {
        self.subscription_sources.insert(id.to_string(), source);
        self
    }

    pub fn cache(mut self, name: &str, cache: Arc<dyn LoaderCache>) -> Self {
        self.caches.insert(name.to_string(), cache);
        self
    }

    pub fn subgraph_caching(mut self, configs: Vec<SubgraphCachingConfig>) -> Self {
        self.subgraph_caching = configs;
        self
    }

    pub fn caching_options(mut self, options: CachingOptions) -> Self {
        self.caching_options = options;
        self
    }

    pub fn build(self) -> Result<Resolver, EngineError> {
        self.options.validate().map_err(EngineError::Configuration)?;
        let policy = CachePolicy::new(self.subgraph_caching, &self.caching_options);
        policy.validate().map_err(EngineError::Configuration)?;
        for name in policy.cache_names() {
            if !self.caches.contains_key(name) {
                warn!("cache '{}' is referenced by a caching config but not registered", name);
            }
        }
        let shared = ResolverShared {
            loader: LoaderEnv {
                data_sources: self.data_sources,
                caches: self.caches,
                policy,
                fetch_limit: Semaphore::new(self.options.max_concurrency),
                propagate_subgraph_errors: self.options.propagate_subgraph_errors,
            },
            subscription_sources: self.subscription_sources,
            subscription_workers: Semaphore::new(self.options.max_subscription_workers),
        };
        Ok(Resolver {
            shared: Arc::new(shared),
            options: self.options,
            events: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }
}

/// Executes synchronous and subscription plans
///
/// Async subscriptions are handled by an event loop task started on first
/// use; it runs until [`Resolver::shutdown`] or until the resolver is dropped.
pub struct Resolver {
    shared: Arc<ResolverShared>,
    options: ResolverOptions,
    events: Mutex<Option<mpsc::UnboundedSender<Command>>>,
    shutdown: CancellationToken,
}

impl Resolver {
    pub fn builder(options: ResolverOptions) -> ResolverBuilder {
        ResolverBuilder::new(options)
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> Arc<ResolverShared> {
        self.shared.clone()
    }

    /// Resolve a synchronous plan into exactly one response
    ///
    /// The response is rendered completely before anything is written, so a
    /// canceled or failed resolution leaves the writer untouched.
    pub async fn resolve_graphql_response(
        &self,
        ctx: &Context,
        response: &GraphQLResponse,
        writer: &mut dyn ResponseWriter,
    ) -> Result<(), ResolveError> {
        let body = self
            .shared
            .render(ctx, response, Json::Object(Map::new()), Vec::new())
            .await?;
        writer.write(body.as_bytes())?;
        writer.flush()
    }

    /// Stream a subscription to `writer`, returning when the upstream ends or `ctx` is canceled
    pub async fn resolve_graphql_subscription(
        &self,
        ctx: &Context,
        plan: &SubscriptionResponsePlan,
        writer: &mut dyn ResponseWriter,
    ) -> Result<(), ResolveError> {
        super::subscription::resolve_blocking(&self.shared, ctx, plan, writer).await
    }

    /// Register a subscription on the shared event loop and return immediately
    ///
    /// Subscriptions whose triggers render to the same upstream request share
    /// one upstream stream; each update is resolved per subscriber.
    pub async fn async_resolve_graphql_subscription(
        &self,
        ctx: Context,
        plan: Arc<SubscriptionResponsePlan>,
        mut writer: Box<dyn ResponseWriter>,
        id: SubscriptionIdentifier,
    ) -> Result<(), ResolveError> {
        let commands = match self.commands() {
            Ok(commands) => commands,
            Err(e) => {
                writer.complete();
                return Err(e);
            }
        };
        let subscription =
            super::subscription::prepare(&self.shared, ctx, plan, writer, id)?;
        debug!(
            "registering subscription {:?} on trigger {}",
            id, subscription.trigger_id
        );
        commands
            .send(Command::Add(Box::new(subscription)))
            .map_err(|_| shut_down())
    }

    pub async fn async_unsubscribe_subscription(&self, id: SubscriptionIdentifier) -> Result<(), ResolveError> {
        self.commands()?
            .send(Command::Remove(id))
            .map_err(|_| shut_down())
    }

    /// Remove every subscription of one client connection
    pub async fn async_unsubscribe_client(&self, connection_id: u64) -> Result<(), ResolveError> {
        self.commands()?
            .send(Command::RemoveClient(connection_id))
            .map_err(|_| shut_down())
    }

    pub async fn subscription_stats(&self) -> Result<SubscriptionStats, ResolveError> {
        let (reply, response) = oneshot::channel();
        self.commands()?
            .send(Command::Stats(reply))
            .map_err(|_| shut_down())?;
        response.await.map_err(|_| shut_down())
    }

    /// Stop the event loop; every async subscription's writer is completed
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn commands(&self) -> Result<mpsc::UnboundedSender<Command>, ResolveError> {
        if self.shutdown.is_cancelled() {
            return Err(shut_down());
        }
        let mut events = self.events.lock();
        if let Some(commands) = events.as_ref() {
            return Ok(commands.clone());
        }
        let (commands, receiver) = mpsc::unbounded_channel();
        let event_loop = EventLoop::new(
            self.shared.clone(),
            commands.clone(),
            receiver,
            self.shutdown.clone(),
        );
        tokio::spawn(event_loop.run());
        *events = Some(commands.clone());
        Ok(commands)
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn shut_down() -> ResolveError {
    ResolveError::Subscription("resolver is shut down".to_string())
}
