// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan resolution
//!
//! The resolver runs the fetch tree of a plan against registered data
//! sources, consults loader caches, merges entity responses into one data
//! tree and renders the client response under the selected error behavior.

pub mod caching;
pub mod context;
pub mod datasource;
pub mod error_behavior;
pub mod fetch;
pub mod loader;
pub mod node;
pub mod resolvable;
pub mod resolver;
pub mod subscription;
pub mod writer;

pub use context::{Context, ExecutionOptions, PlannerStats, TraceOptions};
pub use datasource::{DataSource, SubscriptionDataSource, SubscriptionStream};
pub use error_behavior::ErrorBehavior;
pub use loader::FetchTrace;
pub use resolvable::ResponseValue;
pub use resolver::{Resolver, ResolverBuilder, ResolverOptions};
pub use subscription::{SubscriptionIdentifier, SubscriptionStats};
pub use writer::{BufferedResponseWriter, ResponseWriter};
