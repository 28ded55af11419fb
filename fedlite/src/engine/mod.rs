// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Execution engine and its configuration

pub mod config;
pub mod context_pool;
pub mod execution_engine;

pub use config::EngineSettings;
pub use context_pool::{ContextPool, PooledContext};
pub use execution_engine::{
    with_additional_headers, with_error_behavior, with_request_trace_options, ExecutionEngine,
    ExecutionOption,
};
