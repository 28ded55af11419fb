// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Data source seams
//!
//! Transports (HTTP, gRPC, pub/sub) live outside this crate. The resolver
//! only sees these traits and addresses implementations by data source id.

use async_trait::async_trait;
use futures::stream::BoxStream;
use xxhash_rust::xxh64::Xxh64;

use crate::error::ResolveError;
use crate::request::Headers;

/// A subgraph that answers one request body with one response body
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Send `input` (a rendered `{"query", "variables"}` body) and return the raw response
    async fn load(&self, headers: &Headers, input: &[u8]) -> Result<Vec<u8>, ResolveError>;
}

/// Raw upstream events of one subscription
pub type SubscriptionStream = BoxStream<'static, Result<Vec<u8>, ResolveError>>;

/// A subgraph that pushes a stream of responses for one request body
#[async_trait]
pub trait SubscriptionDataSource: Send + Sync {
    /// Feed whatever identifies the upstream subscription into `hasher`
    ///
    /// Subscriptions whose inputs hash identically share one upstream stream.
    fn unique_request_id(&self, input: &[u8], hasher: &mut Xxh64) {
        hasher.update(input);
    }

    async fn start(&self, headers: &Headers, input: &[u8]) -> Result<SubscriptionStream, ResolveError>;
}
