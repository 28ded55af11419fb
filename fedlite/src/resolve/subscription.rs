// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Subscription triggers and the multiplexing event loop
//!
//! One task owns all trigger state and processes [`Command`]s in order.
//! Every trigger has a reader task pulling its upstream stream, and every
//! subscription has a worker task owning its writer. Updates flow from the
//! reader through the event loop to all workers of that trigger.
//!
//! A trigger id can be reused as soon as its previous trigger is gone, so
//! every trigger also carries a generation. Reader commands name the
//! generation they were started for, and commands from an earlier trigger
//! with the same id are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use futures::StreamExt;
use log::{debug, warn};
use serde_json::{json, Map, Value as Json};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use xxhash_rust::xxh64::Xxh64;

use super::context::Context;
use super::datasource::SubscriptionDataSource;
use super::loader::take_path;
use super::resolver::ResolverShared;
use super::writer::ResponseWriter;
use crate::error::{GraphQLError, ResolveError};
use crate::plan::{SubscriptionResponsePlan, SubscriptionTrigger};
use crate::request::Headers;

const INVALID_INPUT: &str = "invalid input";
const UNABLE_TO_RESOLVE: &str = "unable to resolve";

/// Identifies one subscription of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionIdentifier {
    pub connection_id: u64,
    pub subscription_id: u64,
}

impl SubscriptionIdentifier {
    pub fn new(connection_id: u64, subscription_id: u64) -> Self {
        Self {
            connection_id,
            subscription_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionStats {
    /// Upstream streams currently open
    pub triggers: usize,
    pub subscriptions: usize,
}

pub(crate) struct NewSubscription {
    pub id: SubscriptionIdentifier,
    pub trigger_id: u64,
    ctx: Context,
    plan: Arc<SubscriptionResponsePlan>,
    writer: Box<dyn ResponseWriter>,
    source: Arc<dyn SubscriptionDataSource>,
    input: Vec<u8>,
}

pub(crate) enum Command {
    Add(Box<NewSubscription>),
    Remove(SubscriptionIdentifier),
    RemoveClient(u64),
    TriggerEvent {
        trigger_id: u64,
        generation: u64,
        payload: Vec<u8>,
    },
    TriggerFailed { trigger_id: u64, generation: u64 },
    TriggerDone { trigger_id: u64, generation: u64 },
    Stats(oneshot::Sender<SubscriptionStats>),
}

enum Update {
    Data(Vec<u8>),
    Error(&'static str),
}

struct Trigger {
    generation: u64,
    cancel: CancellationToken,
    subscribers: HashMap<SubscriptionIdentifier, mpsc::UnboundedSender<Update>>,
}

/// Render the trigger input and resolve the source of a subscription
///
/// On failure the writer receives an error response and is completed.
pub(crate) fn prepare(
    shared: &ResolverShared,
    ctx: Context,
    plan: Arc<SubscriptionResponsePlan>,
    mut writer: Box<dyn ResponseWriter>,
    id: SubscriptionIdentifier,
) -> Result<NewSubscription, ResolveError> {
    let (source, input) = match trigger_input(shared, &ctx, &plan.trigger) {
        Ok(prepared) => prepared,
        Err((message, e)) => {
            fail_writer(writer.as_mut(), message);
            return Err(e);
        }
    };
    let trigger_id = trigger_id(&plan.trigger, source.as_ref(), &ctx.headers, &input);
    Ok(NewSubscription {
        id,
        trigger_id,
        ctx,
        plan,
        writer,
        source,
        input,
    })
}

fn trigger_input(
    shared: &ResolverShared,
    ctx: &Context,
    trigger: &SubscriptionTrigger,
) -> Result<(Arc<dyn SubscriptionDataSource>, Vec<u8>), (&'static str, ResolveError)> {
    let source = shared
        .subscription_sources
        .get(&trigger.data_source_id)
        .cloned()
        .ok_or_else(|| {
            (
                UNABLE_TO_RESOLVE,
                ResolveError::UnknownDataSource(trigger.data_source_id.clone()),
            )
        })?;
    let input = serde_json::to_vec(&trigger.input.render(&ctx.variables, None))
        .map_err(|e| (INVALID_INPUT, ResolveError::Subscription(e.to_string())))?;
    Ok((source, input))
}

/// Subscriptions with equal ids share one upstream stream
fn trigger_id(
    trigger: &SubscriptionTrigger,
    source: &dyn SubscriptionDataSource,
    headers: &Headers,
    input: &[u8],
) -> u64 {
    let mut hasher = Xxh64::new(0);
    hasher.update(trigger.data_source_id.as_bytes());
    hasher.update(&headers.hash().to_le_bytes());
    source.unique_request_id(input, &mut hasher);
    hasher.digest()
}

fn fail_writer(writer: &mut dyn ResponseWriter, message: &str) {
    let body = json!({ "errors": [{ "message": message }] }).to_string();
    if let Err(e) = writer.write(body.as_bytes()).and_then(|_| writer.flush()) {
        warn!("failed to write subscription error: {}", e);
    }
    writer.complete();
}

/// Resolve one upstream event and write the response
async fn write_event(
    shared: &ResolverShared,
    ctx: &Context,
    plan: &SubscriptionResponsePlan,
    payload: &[u8],
    writer: &mut dyn ResponseWriter,
) -> Result<(), ResolveError> {
    let mut event: Json =
        serde_json::from_slice(payload).map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
    let post_processing = &plan.trigger.post_processing;
    let upstream_errors: Vec<GraphQLError> =
        match take_path(&mut event, &post_processing.select_response_errors_path) {
            Some(Json::Array(errors)) => errors
                .into_iter()
                .map(|e| {
                    serde_json::from_value(e.clone()).unwrap_or_else(|_| GraphQLError::new(e.to_string()))
                })
                .collect(),
            _ => Vec::new(),
        };
    let data = take_path(&mut event, &post_processing.select_response_data_path).filter(Json::is_object);
    let body = match data {
        Some(data) => {
            shared
                .render(ctx, &plan.response, data, upstream_errors)
                .await?
        }
        None if !upstream_errors.is_empty() => {
            let errors = serde_json::to_string(&upstream_errors)
                .map_err(|e| ResolveError::Write(e.to_string()))?;
            format!("{{\"errors\":{},\"data\":null}}", errors)
        }
        None => shared.render(ctx, &plan.response, Json::Object(Map::new()), Vec::new()).await?,
    };
    writer.write(body.as_bytes())?;
    writer.flush()
}

/// Synchronous subscription: the caller is blocked for the stream's lifetime
pub(crate) async fn resolve_blocking(
    shared: &ResolverShared,
    ctx: &Context,
    plan: &SubscriptionResponsePlan,
    writer: &mut dyn ResponseWriter,
) -> Result<(), ResolveError> {
    let (source, input) = match trigger_input(shared, ctx, &plan.trigger) {
        Ok(prepared) => prepared,
        Err((message, e)) => {
            fail_writer(writer, message);
            return Err(e);
        }
    };
    let cancel = ctx.cancel_token();
    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            writer.complete();
            return Ok(());
        }
        started = source.start(&ctx.headers, &input) => started,
    };
    let mut stream = match started {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to start subscription on '{}': {}", plan.trigger.data_source_name, e);
            fail_writer(writer, UNABLE_TO_RESOLVE);
            return Err(e);
        }
    };
    let result = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break Ok(()),
            next = stream.next() => next,
        };
        match next {
            Some(Ok(payload)) => {
                if let Err(e) = write_event(shared, ctx, plan, &payload, writer).await {
                    break Err(e);
                }
            }
            Some(Err(e)) => {
                warn!("subscription upstream '{}' failed: {}", plan.trigger.data_source_name, e);
                break Ok(());
            }
            None => break Ok(()),
        }
    };
    writer.complete();
    match result {
        Err(ResolveError::Canceled) => Ok(()),
        other => other,
    }
}

pub(crate) struct EventLoop {
    shared: Arc<ResolverShared>,
    commands: mpsc::UnboundedSender<Command>,
    receiver: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    triggers: HashMap<u64, Trigger>,
    next_generation: u64,
}

impl EventLoop {
    pub fn new(
        shared: Arc<ResolverShared>,
        commands: mpsc::UnboundedSender<Command>,
        receiver: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared,
            commands,
            receiver,
            shutdown,
            triggers: HashMap::new(),
            next_generation: 0,
        }
    }

    pub async fn run(mut self) {
        debug!("subscription event loop started");
        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = self.receiver.recv() => command,
            };
            match command {
                Some(command) => self.handle(command),
                None => break,
            }
        }
        for (_, trigger) in self.triggers.drain() {
            trigger.cancel.cancel();
        }
        debug!("subscription event loop stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Add(subscription) => self.add(*subscription),
            Command::Remove(id) => self.remove(|candidate| *candidate == id),
            Command::RemoveClient(connection_id) => {
                self.remove(|candidate| candidate.connection_id == connection_id)
            }
            Command::TriggerEvent {
                trigger_id,
                generation,
                payload,
            } => {
                let live = self
                    .triggers
                    .get(&trigger_id)
                    .filter(|trigger| trigger.generation == generation);
                if let Some(trigger) = live {
                    for subscriber in trigger.subscribers.values() {
                        let _ = subscriber.send(Update::Data(payload.clone()));
                    }
                }
            }
            Command::TriggerFailed {
                trigger_id,
                generation,
            } => {
                if let Some(trigger) = self.take_trigger(trigger_id, generation) {
                    for subscriber in trigger.subscribers.values() {
                        let _ = subscriber.send(Update::Error(UNABLE_TO_RESOLVE));
                    }
                }
            }
            Command::TriggerDone {
                trigger_id,
                generation,
            } => {
                if self.take_trigger(trigger_id, generation).is_some() {
                    debug!("trigger {} completed", trigger_id);
                }
            }
            Command::Stats(reply) => {
                let _ = reply.send(SubscriptionStats {
                    triggers: self.triggers.len(),
                    subscriptions: self.triggers.values().map(|t| t.subscribers.len()).sum(),
                });
            }
        }
    }

    fn add(&mut self, subscription: NewSubscription) {
        let NewSubscription {
            id,
            trigger_id,
            ctx,
            plan,
            writer,
            source,
            input,
        } = subscription;
        let (updates, receiver) = mpsc::unbounded_channel();
        let headers = ctx.headers.clone();
        tokio::spawn(run_worker(
            self.shared.clone(),
            ctx,
            plan,
            writer,
            receiver,
            id,
            self.commands.clone(),
        ));
        let next_generation = &mut self.next_generation;
        let trigger = self.triggers.entry(trigger_id).or_insert_with(|| {
            let generation = *next_generation;
            *next_generation += 1;
            debug!("starting trigger {} generation {}", trigger_id, generation);
            let cancel = self.shutdown.child_token();
            tokio::spawn(read_trigger(
                source,
                headers,
                input,
                TriggerHandle {
                    trigger_id,
                    generation,
                },
                cancel.clone(),
                self.commands.clone(),
            ));
            Trigger {
                generation,
                cancel,
                subscribers: HashMap::new(),
            }
        });
        trigger.subscribers.insert(id, updates);
    }

    /// Remove and stop the trigger if `generation` is still the live one
    fn take_trigger(&mut self, trigger_id: u64, generation: u64) -> Option<Trigger> {
        match self.triggers.get(&trigger_id) {
            Some(trigger) if trigger.generation == generation => {}
            Some(_) => {
                debug!(
                    "ignoring stale command for trigger {} generation {}",
                    trigger_id, generation
                );
                return None;
            }
            None => return None,
        }
        let trigger = self.triggers.remove(&trigger_id)?;
        trigger.cancel.cancel();
        Some(trigger)
    }

    /// Drop matching subscribers; triggers left without subscribers are stopped
    fn remove(&mut self, matches: impl Fn(&SubscriptionIdentifier) -> bool) {
        self.triggers.retain(|trigger_id, trigger| {
            trigger.subscribers.retain(|id, _| !matches(id));
            if trigger.subscribers.is_empty() {
                debug!("stopping trigger {} without subscribers", trigger_id);
                trigger.cancel.cancel();
                false
            } else {
                true
            }
        });
    }
}

/// Which trigger a reader feeds
#[derive(Debug, Clone, Copy)]
struct TriggerHandle {
    trigger_id: u64,
    generation: u64,
}

async fn read_trigger(
    source: Arc<dyn SubscriptionDataSource>,
    headers: Headers,
    input: Vec<u8>,
    handle: TriggerHandle,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<Command>,
) {
    let TriggerHandle {
        trigger_id,
        generation,
    } = handle;
    let started = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        started = source.start(&headers, &input) => started,
    };
    let mut stream = match started {
        Ok(stream) => stream,
        Err(e) => {
            warn!("failed to start trigger {}: {}", trigger_id, e);
            let _ = commands.send(Command::TriggerFailed {
                trigger_id,
                generation,
            });
            return;
        }
    };
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        match next {
            Some(Ok(payload)) => {
                let event = Command::TriggerEvent {
                    trigger_id,
                    generation,
                    payload,
                };
                if commands.send(event).is_err() {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!("trigger {} upstream failed: {}", trigger_id, e);
                break;
            }
            None => break,
        }
    }
    let _ = commands.send(Command::TriggerDone {
        trigger_id,
        generation,
    });
}

async fn run_worker(
    shared: Arc<ResolverShared>,
    ctx: Context,
    plan: Arc<SubscriptionResponsePlan>,
    mut writer: Box<dyn ResponseWriter>,
    mut updates: mpsc::UnboundedReceiver<Update>,
    id: SubscriptionIdentifier,
    commands: mpsc::UnboundedSender<Command>,
) {
    loop {
        let update = tokio::select! {
            biased;
            _ = ctx.cancel_token().cancelled() => break,
            update = updates.recv() => update,
        };
        match update {
            Some(Update::Data(payload)) => {
                let _permit = shared.subscription_workers.acquire().await;
                if let Err(e) = write_event(&shared, &ctx, &plan, &payload, writer.as_mut()).await {
                    warn!("subscription {:?} update failed: {}", id, e);
                    break;
                }
            }
            Some(Update::Error(message)) => {
                fail_writer(writer.as_mut(), message);
                return;
            }
            None => break,
        }
    }
    writer.complete();
    let _ = commands.send(Command::Remove(id));
}
