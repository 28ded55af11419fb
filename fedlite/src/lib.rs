// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! FedLite - A lightweight federated GraphQL execution engine
//!
//! FedLite executes client operations against a composite schema by fetching
//! from independent subgraphs and merging their results into one response.
//!
//! # Features
//!
//! - **Plan Cache**: normalized operations are planned once and reused
//! - **Concurrent Fetching**: independent subgraph fetches run in parallel
//!   under a global concurrency bound
//! - **Entity Merge**: batched entity fetches are merged back by key
//! - **Loader Caches**: root-field and entity caching with partial loads
//! - **Error Behavior**: `PROPAGATE`, `NULL` and `HALT` null-propagation
//! - **Subscriptions**: blocking or multiplexed over shared upstream streams
//!
//! # Usage
//!
//! ```ignore
//! let resolver = settings
//!     .resolver_builder()
//!     .data_source("accounts", Arc::new(AccountsClient::new()))
//!     .build()?;
//! let engine = ExecutionEngine::new(schema, Box::new(planner), resolver, settings)?;
//!
//! let mut request = unmarshal_request(body)?;
//! let mut response = Vec::new();
//! engine
//!     .execute(CancellationToken::new(), &mut request, &mut response, &[])
//!     .await?;
//! ```

pub mod ast;
pub mod cache;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod plan;
pub mod request;
pub mod resolve;
pub mod schema;
pub mod service;
pub mod timeout;
pub mod validation;

pub use cache::{
    CacheEntry, EntityCacheConfiguration, InMemoryLoaderCache, LoaderCache,
    RootFieldCacheConfiguration, SubgraphCachingConfig,
};
pub use engine::{EngineSettings, ExecutionEngine, ExecutionOption};
pub use error::{
    CacheError, EngineError, GraphQLError, OperationReport, RequestError, ResolveError,
};
pub use plan::{Plan, Planner};
pub use request::{unmarshal_request, Headers, Request};
pub use resolve::{
    BufferedResponseWriter, Context, DataSource, ErrorBehavior, Resolver, ResolverBuilder,
    ResolverOptions, ResponseWriter, SubscriptionDataSource, SubscriptionIdentifier,
};
pub use schema::Schema;

/// FedLite version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// FedLite crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
