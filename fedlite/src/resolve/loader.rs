// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fetch tree execution
//!
//! The loader turns a fetch tree into steps. Fetches inside one step have no
//! data dependency and are issued concurrently; each returns an owned
//! [`FetchOutcome`] that is merged into the shared data tree only after the
//! whole step finished, so merge order never depends on arrival order.
//!
//! Root and entity caches are consulted before a fetch is sent. A batch's
//! cache reads always complete before the fetch decision for that batch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use log::{debug, trace, warn};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use tokio::sync::Semaphore;

use super::caching::{
    entity_cache_key, load_cached, root_field_cache_key, store_cached, with_header_prefix,
};
use super::context::Context;
use super::datasource::DataSource;
use super::fetch::{
    EntityFetch, Fetch, FetchInfo, FetchItem, FetchPathElement, FetchTreeNode, PostProcessing,
    RepresentationTemplate, RootField, SingleFetch,
};
use super::ErrorBehavior;
use crate::cache::{CachePolicy, LoaderCache};
use crate::error::{GraphQLError, PathSegment, ResolveError};

/// Everything a loader needs from the resolver that owns it
pub(crate) struct LoaderEnv {
    pub data_sources: HashMap<String, Arc<dyn DataSource>>,
    pub caches: HashMap<String, Arc<dyn LoaderCache>>,
    pub policy: CachePolicy,
    /// Bounds in-flight subgraph requests across all executions
    pub fetch_limit: Semaphore,
    pub propagate_subgraph_errors: bool,
}

impl LoaderEnv {
    fn cache(&self, name: &str) -> Option<&Arc<dyn LoaderCache>> {
        let cache = self.caches.get(name);
        if cache.is_none() {
            warn!("cache '{}' is not registered, skipping caching", name);
        }
        cache
    }
}

/// Load statistics of one fetch, rendered under `extensions.trace`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FetchTrace {
    pub fetch_id: usize,
    pub data_source_name: String,
    pub path: String,
    pub duration_us: u64,
    pub load_skipped: bool,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub representations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Merged data plus everything that went wrong while loading it
#[derive(Debug, Default)]
pub(crate) struct LoadResult {
    pub data: Json,
    pub errors: Vec<GraphQLError>,
    /// Paths whose data is missing because a fetch failed
    pub failed_paths: Vec<Vec<PathSegment>>,
    pub traces: Vec<FetchTrace>,
}

impl LoadResult {
    fn apply(&mut self, outcome: FetchOutcome) {
        for (path, value) in outcome.merges {
            merge_at(&mut self.data, &path, value);
        }
        self.errors.extend(outcome.errors);
        self.failed_paths.extend(outcome.failed_paths);
        self.traces.push(outcome.trace);
    }
}

#[derive(Debug, Default)]
struct FetchOutcome {
    merges: Vec<(Vec<PathSegment>, Json)>,
    errors: Vec<GraphQLError>,
    failed_paths: Vec<Vec<PathSegment>>,
    trace: FetchTrace,
}

pub(crate) struct Loader<'a> {
    env: &'a LoaderEnv,
    ctx: &'a Context,
}

impl<'a> Loader<'a> {
    pub fn new(env: &'a LoaderEnv, ctx: &'a Context) -> Self {
        Self { env, ctx }
    }

    /// Run every fetch of `tree`, merging results into `data`
    pub async fn load(&self, tree: &FetchTreeNode, data: Json) -> LoadResult {
        let mut result = LoadResult {
            data,
            ..Default::default()
        };
        for step in schedule(tree) {
            if self.ctx.is_canceled() {
                debug!("execution canceled, skipping remaining fetches");
                break;
            }
            if self.ctx.error_behavior() == ErrorBehavior::Halt && !result.errors.is_empty() {
                debug!("halting after fetch error");
                break;
            }
            let outcomes = join_all(step.iter().map(|item| self.load_item(&result.data, item))).await;
            for outcome in outcomes {
                result.apply(outcome);
            }
        }
        result
    }

    async fn load_item(&self, data: &Json, item: &FetchItem) -> FetchOutcome {
        let started = Instant::now();
        let info = item.fetch.info();
        let mut outcome = FetchOutcome {
            trace: FetchTrace {
                fetch_id: item.fetch.dependencies().fetch_id,
                data_source_name: info.data_source_name.clone(),
                path: response_path(item).to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        match &item.fetch {
            Fetch::Single(fetch) => self.load_single(data, item, fetch, &mut outcome).await,
            Fetch::Entity(fetch) => self.load_entity(data, item, fetch, &mut outcome).await,
        }
        outcome.trace.duration_us = started.elapsed().as_micros() as u64;
        trace!(
            "fetch {} to '{}' done in {}us",
            outcome.trace.fetch_id,
            outcome.trace.data_source_name,
            outcome.trace.duration_us
        );
        outcome
    }

    async fn load_single(
        &self,
        data: &Json,
        item: &FetchItem,
        fetch: &SingleFetch,
        outcome: &mut FetchOutcome,
    ) {
        let item_paths: Vec<Vec<PathSegment>> = select_items(data, &item.fetch_path)
            .into_iter()
            .map(|(path, _)| path)
            .collect();
        if item_paths.is_empty() {
            outcome.trace.load_skipped = true;
            return;
        }

        let root_cache = if item.fetch_path.is_empty() {
            self.root_cache_lookup(fetch).await
        } else {
            None
        };
        if let Some(lookup) = &root_cache {
            outcome.trace.cache_hits = lookup.slots.iter().filter(|s| s.cached.is_some()).count();
            outcome.trace.cache_misses = lookup.slots.len() - outcome.trace.cache_hits;
            if outcome.trace.cache_misses == 0 {
                let mut cached = Map::new();
                for slot in &lookup.slots {
                    if let Some(value) = &slot.cached {
                        cached.insert(slot.field.response_key.clone(), value.clone());
                    }
                }
                debug!("root fields of fetch {} served from cache", outcome.trace.fetch_id);
                outcome.trace.load_skipped = true;
                outcome.merges.push((Vec::new(), Json::Object(cached)));
                return;
            }
        }

        let body = fetch.input.render(&self.ctx.variables, None);
        let response = match self.send(&fetch.info, body, outcome).await {
            Ok(response) => response,
            Err(e) => {
                self.record_failure(item, &fetch.info, &item_paths, e, outcome);
                return;
            }
        };
        let (response_data, had_errors) =
            self.extract(response, &fetch.post_processing, item, &fetch.info, &item_paths, outcome);
        let Some(response_data) = response_data else {
            return;
        };

        if let Some(lookup) = root_cache {
            if !had_errors {
                self.store_root_fields(lookup, &response_data).await;
            }
        }
        for path in &item_paths {
            outcome
                .merges
                .push((with_merge_path(path, &fetch.post_processing), response_data.clone()));
        }
    }

    async fn load_entity(
        &self,
        data: &Json,
        item: &FetchItem,
        fetch: &EntityFetch,
        outcome: &mut FetchOutcome,
    ) {
        let mut representations: Vec<Json> = Vec::new();
        let mut targets: Vec<Vec<Vec<PathSegment>>> = Vec::new();
        let mut item_paths = Vec::new();
        for (path, value) in select_items(data, &item.fetch_path) {
            let Some(representation) = fetch.representation.render(value) else {
                continue;
            };
            item_paths.push(path.clone());
            match representations.iter().position(|r| *r == representation) {
                Some(i) => targets[i].push(path),
                None => {
                    representations.push(representation);
                    targets.push(vec![path]);
                }
            }
        }
        if representations.is_empty() {
            outcome.trace.load_skipped = true;
            return;
        }

        let lookup = self.entity_cache_lookup(fetch, &representations).await;
        let mut resolved: Vec<Option<Json>> = vec![None; representations.len()];
        let send: Vec<usize> = match &lookup {
            Some(lookup) => {
                let hits = lookup.cached.iter().filter(|c| c.is_some()).count();
                outcome.trace.cache_hits = hits;
                outcome.trace.cache_misses = representations.len() - hits;
                if hits == representations.len() || lookup.partial {
                    for (slot, cached) in resolved.iter_mut().zip(&lookup.cached) {
                        slot.clone_from(cached);
                    }
                    (0..representations.len())
                        .filter(|&i| lookup.cached[i].is_none())
                        .collect()
                } else {
                    (0..representations.len()).collect()
                }
            }
            None => (0..representations.len()).collect(),
        };

        if send.is_empty() {
            debug!("entities of fetch {} served from cache", outcome.trace.fetch_id);
            outcome.trace.load_skipped = true;
        } else {
            let sent: Vec<Json> = send.iter().map(|&i| representations[i].clone()).collect();
            outcome.trace.representations = sent.len();
            let body = fetch.input.render(&self.ctx.variables, Some(sent));
            match self.send(&fetch.info, body, outcome).await {
                Err(e) => self.record_failure(item, &fetch.info, &item_paths, e, outcome),
                Ok(response) => {
                    let (entities, had_errors) = self.extract(
                        response,
                        &fetch.post_processing,
                        item,
                        &fetch.info,
                        &item_paths,
                        outcome,
                    );
                    if let Some(Json::Array(entities)) = entities {
                        for (i, entity) in
                            match_entities(&fetch.representation, &representations, &send, entities)
                        {
                            resolved[i] = Some(entity);
                        }
                        if let (Some(lookup), false) = (&lookup, had_errors) {
                            let fresh: Vec<(String, &Json)> = send
                                .iter()
                                .filter_map(|&i| {
                                    let entity = resolved[i].as_ref().filter(|e| e.is_object())?;
                                    Some((lookup.keys[i].clone(), entity))
                                })
                                .collect();
                            store_cached(lookup.cache, lookup.cache_name, fresh, lookup.ttl).await;
                        }
                    }
                }
            }
        }

        for (i, entity) in resolved.into_iter().enumerate() {
            let Some(entity) = entity.filter(Json::is_object) else {
                continue;
            };
            for path in &targets[i] {
                outcome
                    .merges
                    .push((with_merge_path(path, &fetch.post_processing), entity.clone()));
            }
        }
    }

    /// Send one rendered body, honoring the concurrency bound and cancellation
    async fn send(
        &self,
        info: &FetchInfo,
        body: Json,
        outcome: &mut FetchOutcome,
    ) -> Result<Json, ResolveError> {
        let source = self
            .env
            .data_sources
            .get(&info.data_source_id)
            .ok_or_else(|| ResolveError::UnknownDataSource(info.data_source_id.clone()))?;
        let input = serde_json::to_vec(&body).map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        if self.ctx.options.tracing.enable && self.ctx.options.tracing.include_input {
            outcome.trace.input = Some(body);
        }
        let _permit = self
            .env
            .fetch_limit
            .acquire()
            .await
            .map_err(|_| ResolveError::Canceled)?;
        debug!("fetching from '{}'", info.data_source_name);
        let cancel = self.ctx.cancel_token();
        let loaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ResolveError::Canceled),
            loaded = source.load(&self.ctx.headers, &input) => loaded,
        };
        let bytes = loaded?;
        serde_json::from_slice(&bytes).map_err(|e| ResolveError::InvalidResponse(e.to_string()))
    }

    /// Split a subgraph response into its data and recorded errors
    fn extract(
        &self,
        mut response: Json,
        post_processing: &PostProcessing,
        item: &FetchItem,
        info: &FetchInfo,
        item_paths: &[Vec<PathSegment>],
        outcome: &mut FetchOutcome,
    ) -> (Option<Json>, bool) {
        let upstream = take_path(&mut response, &post_processing.select_response_errors_path)
            .and_then(|errors| match errors {
                Json::Array(errors) if !errors.is_empty() => Some(errors),
                _ => None,
            });
        let had_errors = upstream.is_some();
        if let Some(upstream) = upstream {
            let mut error = GraphQLError::new(failure_message(item, info))
                .with_path(error_path(item, info, item_paths));
            if self.env.propagate_subgraph_errors {
                let mut extensions = Map::new();
                extensions.insert("errors".to_string(), Json::Array(upstream));
                error = error.with_extensions(Json::Object(extensions));
            }
            outcome.trace.error = Some("subgraph returned errors".to_string());
            outcome.errors.push(error);
            outcome.failed_paths.extend(failed_paths(item, info, item_paths));
        }
        let data = take_path(&mut response, &post_processing.select_response_data_path)
            .filter(|d| !d.is_null());
        (data, had_errors)
    }

    fn record_failure(
        &self,
        item: &FetchItem,
        info: &FetchInfo,
        item_paths: &[Vec<PathSegment>],
        reason: ResolveError,
        outcome: &mut FetchOutcome,
    ) {
        let message = failure_message(item, info);
        match &reason {
            ResolveError::Canceled => debug!("fetch to '{}' canceled", info.data_source_name),
            e => warn!("{} {}", message, e),
        }
        outcome.trace.error = Some(reason.to_string());
        outcome
            .errors
            .push(GraphQLError::new(message).with_path(error_path(item, info, item_paths)));
        outcome.failed_paths.extend(failed_paths(item, info, item_paths));
    }

    async fn root_cache_lookup<'f>(&'f self, fetch: &'f SingleFetch) -> Option<RootCacheLookup<'f>> {
        if fetch.info.root_fields.is_empty() || !self.env.policy.is_enabled() {
            return None;
        }
        let mut cache_name: Option<&str> = None;
        let mut slots = Vec::with_capacity(fetch.info.root_fields.len());
        for field in &fetch.info.root_fields {
            let config = self.env.policy.root_field(
                &fetch.info.data_source_name,
                &field.type_name,
                &field.field_name,
            )?;
            match cache_name {
                None => cache_name = Some(config.cache_name.as_str()),
                Some(name) if name != config.cache_name => {
                    debug!(
                        "root fields of '{}' use different caches, not caching",
                        fetch.info.data_source_name
                    );
                    return None;
                }
                Some(_) => {}
            }
            let arguments: Vec<(String, Json)> = field
                .arguments
                .iter()
                .map(|a| (a.name.clone(), a.source.render(&self.ctx.variables)))
                .collect();
            let mut key = root_field_cache_key(&field.type_name, &field.field_name, &arguments);
            if config.include_subgraph_header_prefix {
                key = with_header_prefix(key, self.ctx.headers.hash());
            }
            slots.push(RootCacheSlot {
                field,
                key,
                ttl: config.ttl,
                cached: None,
            });
        }
        let cache_name = cache_name?;
        let cache = self.env.cache(cache_name)?;
        let keys: Vec<String> = slots.iter().map(|s| s.key.clone()).collect();
        for (slot, cached) in slots.iter_mut().zip(load_cached(cache, cache_name, &keys).await) {
            slot.cached = cached;
        }
        Some(RootCacheLookup {
            cache,
            cache_name,
            slots,
        })
    }

    async fn store_root_fields(&self, lookup: RootCacheLookup<'_>, data: &Json) {
        let mut by_ttl: Vec<(Duration, Vec<(String, &Json)>)> = Vec::new();
        for slot in &lookup.slots {
            if slot.cached.is_some() {
                continue;
            }
            let Some(value) = data.get(&slot.field.response_key) else {
                continue;
            };
            match by_ttl.iter_mut().find(|(ttl, _)| *ttl == slot.ttl) {
                Some((_, values)) => values.push((slot.key.clone(), value)),
                None => by_ttl.push((slot.ttl, vec![(slot.key.clone(), value)])),
            }
        }
        for (ttl, values) in by_ttl {
            store_cached(lookup.cache, lookup.cache_name, values, ttl).await;
        }
    }

    async fn entity_cache_lookup<'f>(
        &'f self,
        fetch: &'f EntityFetch,
        representations: &[Json],
    ) -> Option<EntityCacheLookup<'f>> {
        let config = self
            .env
            .policy
            .entity(&fetch.info.data_source_name, &fetch.representation.type_name)?;
        let cache = self.env.cache(&config.cache_name)?;
        let template = &fetch.representation;
        let mut keys = Vec::with_capacity(representations.len());
        for representation in representations {
            let type_name = representation
                .get("__typename")
                .and_then(Json::as_str)
                .unwrap_or(&template.type_name);
            let mut key = entity_cache_key(type_name, &template.key_fields, representation)?;
            if config.include_subgraph_header_prefix {
                key = with_header_prefix(key, self.ctx.headers.hash());
            }
            keys.push(key);
        }
        let cached = load_cached(cache, &config.cache_name, &keys).await;
        Some(EntityCacheLookup {
            cache,
            cache_name: &config.cache_name,
            ttl: config.ttl,
            partial: config.enable_partial_cache_load,
            keys,
            cached,
        })
    }
}

struct RootCacheSlot<'a> {
    field: &'a RootField,
    key: String,
    ttl: Duration,
    cached: Option<Json>,
}

struct RootCacheLookup<'a> {
    cache: &'a Arc<dyn LoaderCache>,
    cache_name: &'a str,
    slots: Vec<RootCacheSlot<'a>>,
}

struct EntityCacheLookup<'a> {
    cache: &'a Arc<dyn LoaderCache>,
    cache_name: &'a str,
    ttl: Duration,
    partial: bool,
    keys: Vec<String>,
    cached: Vec<Option<Json>>,
}

/// Group fetches into steps; items of one step run concurrently
///
/// Branches of a parallel group advance together: their first steps form
/// one step, their second steps the next, and so on.
fn schedule(tree: &FetchTreeNode) -> Vec<Vec<&FetchItem>> {
    match tree {
        FetchTreeNode::Single(item) => vec![vec![item]],
        FetchTreeNode::Sequence(children) => children.iter().flat_map(schedule).collect(),
        FetchTreeNode::Parallel(children) => {
            let mut steps: Vec<Vec<&FetchItem>> = Vec::new();
            for child in children {
                for (level, step) in schedule(child).into_iter().enumerate() {
                    match steps.get_mut(level) {
                        Some(existing) => existing.extend(step),
                        None => steps.push(step),
                    }
                }
            }
            steps
        }
    }
}

/// Objects reachable through `path`, lists flattened, nulls skipped
fn select_items<'d>(data: &'d Json, path: &[FetchPathElement]) -> Vec<(Vec<PathSegment>, &'d Json)> {
    let mut current: Vec<(Vec<PathSegment>, &Json)> = vec![(Vec::new(), data)];
    for element in path {
        let mut next = Vec::new();
        for (item_path, value) in current {
            let Some(child) = value.get(element.name()) else {
                continue;
            };
            let mut child_path = item_path.clone();
            child_path.push(PathSegment::from(element.name()));
            match child {
                Json::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if item.is_object() {
                            let mut path = child_path.clone();
                            path.push(PathSegment::Index(i));
                            next.push((path, item));
                        }
                    }
                }
                Json::Object(_) => next.push((child_path, child)),
                _ => {}
            }
        }
        current = next;
    }
    current
}

/// Assign returned entities to the representations they answer
///
/// Entities carrying their key fields are matched by `__typename` and key
/// values; others fall back to their position in the request.
fn match_entities(
    template: &RepresentationTemplate,
    representations: &[Json],
    sent: &[usize],
    entities: Vec<Json>,
) -> Vec<(usize, Json)> {
    let mut matched = Vec::with_capacity(entities.len());
    for (position, entity) in entities.into_iter().enumerate() {
        if entity.is_null() {
            continue;
        }
        let by_key = template.key_values(&entity).and_then(|values| {
            let type_name = entity.get("__typename").and_then(Json::as_str);
            sent.iter().copied().find(|&i| {
                let representation = &representations[i];
                let same_type = type_name.map_or(true, |t| {
                    representation.get("__typename").and_then(Json::as_str) == Some(t)
                });
                same_type
                    && template
                        .key_fields
                        .iter()
                        .zip(&values)
                        .all(|(key, value)| representation.get(key) == Some(value))
            })
        });
        if let Some(i) = by_key.or_else(|| sent.get(position).copied()) {
            matched.push((i, entity));
        }
    }
    matched
}

fn response_path(item: &FetchItem) -> &str {
    if item.response_path.is_empty() {
        "query"
    } else {
        &item.response_path
    }
}

fn failure_message(item: &FetchItem, info: &FetchInfo) -> String {
    format!(
        "Failed to fetch from Subgraph '{}' at path '{}'.",
        info.data_source_name,
        response_path(item)
    )
}

fn error_path(item: &FetchItem, info: &FetchInfo, item_paths: &[Vec<PathSegment>]) -> Vec<PathSegment> {
    if item.fetch_path.is_empty() {
        info.root_fields
            .first()
            .map(|f| vec![PathSegment::from(f.response_key.as_str())])
            .unwrap_or_default()
    } else {
        item_paths.first().cloned().unwrap_or_default()
    }
}

fn failed_paths(item: &FetchItem, info: &FetchInfo, item_paths: &[Vec<PathSegment>]) -> Vec<Vec<PathSegment>> {
    if item.fetch_path.is_empty() {
        info.root_fields
            .iter()
            .map(|f| vec![PathSegment::from(f.response_key.as_str())])
            .collect()
    } else {
        item_paths.to_vec()
    }
}

fn with_merge_path(path: &[PathSegment], post_processing: &PostProcessing) -> Vec<PathSegment> {
    path.iter()
        .cloned()
        .chain(post_processing.merge_path.iter().map(|k| PathSegment::from(k.as_str())))
        .collect()
}

pub(crate) fn take_path(value: &mut Json, path: &[String]) -> Option<Json> {
    let (last, parents) = path.split_last()?;
    let mut current = value;
    for key in parents {
        current = current.get_mut(key)?;
    }
    current.as_object_mut()?.remove(last)
}

fn merge_at(data: &mut Json, path: &[PathSegment], value: Json) {
    let mut current = data;
    for segment in path {
        current = match segment {
            PathSegment::Key(key) => {
                if !current.is_object() {
                    *current = Json::Object(Map::new());
                }
                match current {
                    Json::Object(map) => map.entry(key.clone()).or_insert(Json::Null),
                    _ => return,
                }
            }
            PathSegment::Index(i) => match current {
                Json::Array(items) => match items.get_mut(*i) {
                    Some(item) => item,
                    None => return,
                },
                _ => return,
            },
        };
    }
    merge_values(current, value);
}

/// Deep merge `source` into `target`; objects merge by key, everything else replaces
fn merge_values(target: &mut Json, source: Json) {
    match source {
        Json::Object(source) => match target {
            Json::Object(map) => {
                for (key, value) in source {
                    match map.get_mut(&key) {
                        Some(existing) => merge_values(existing, value),
                        None => {
                            map.insert(key, value);
                        }
                    }
                }
            }
            other => *other = Json::Object(source),
        },
        Json::Array(source) => match target {
            Json::Array(items) if items.len() == source.len() => {
                for (item, value) in items.iter_mut().zip(source) {
                    merge_values(item, value);
                }
            }
            other => *other = Json::Array(source),
        },
        Json::Null if !target.is_null() => {}
        other => *target = other,
    }
}
