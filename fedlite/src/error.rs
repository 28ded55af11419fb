// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types shared across the engine
//!
//! Errors are grouped by the stage that produces them:
//! - [`RequestError`]: the inbound request could not be read at all
//! - [`OperationReport`]: normalization, validation or planning rejected the operation
//! - [`ResolveError`]: a data source, cache or writer failed during resolution
//! - [`EngineError`]: the top-level error returned by `ExecutionEngine::execute`
//!
//! Field-level failures never surface as a Rust error. They are collected as
//! [`GraphQLError`] values into the response's `errors` array.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One element of a response path
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{}", key),
            PathSegment::Index(index) => write!(f, "{}", index),
        }
    }
}

/// A GraphQL error as it appears in a response's `errors` array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<PathSegment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphQLError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: Vec::new(),
            extensions: None,
        }
    }

    pub fn with_path(mut self, path: Vec<PathSegment>) -> Self {
        self.path = path;
        self
    }

    pub fn with_extensions(mut self, extensions: serde_json::Value) -> Self {
        self.extensions = Some(extensions);
        self
    }
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            let path: Vec<String> = self.path.iter().map(|s| s.to_string()).collect();
            write!(f, "{} (path: {})", self.message, path.join("."))
        }
    }
}

/// A list of operation-level errors produced by normalization, validation or planning
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationReport {
    pub errors: Vec<GraphQLError>,
}

impl OperationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_message(message: impl Into<String>) -> Self {
        Self {
            errors: vec![GraphQLError::new(message)],
        }
    }

    pub fn add(&mut self, message: impl Into<String>) {
        self.errors.push(GraphQLError::new(message));
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Serialize the report as a GraphQL response envelope without data
    pub fn to_response_json(&self) -> String {
        serde_json::json!({ "errors": self.errors }).to_string()
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.errors.iter().map(|e| e.to_string()).collect();
        write!(f, "{}", messages.join(", "))
    }
}

impl std::error::Error for OperationReport {}

/// Request-shape errors, raised before any engine work
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("the provided request is empty")]
    EmptyRequest,

    #[error("invalid request body: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("failed to read request body: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error: {0}")]
    Syntax(String),
}

/// Errors raised while resolving a plan against data sources
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResolveError {
    #[error("Failed to fetch from Subgraph '{subgraph}': {reason}")]
    DataSource { subgraph: String, reason: String },

    #[error("data source '{0}' is not registered")]
    UnknownDataSource(String),

    #[error("invalid subgraph response: {0}")]
    InvalidResponse(String),

    #[error("operation canceled")]
    Canceled,

    #[error("Write error: {0}")]
    Write(String),

    #[error("subscription error: {0}")]
    Subscription(String),
}

/// Loader cache backend errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache '{0}' is not configured")]
    UnknownCache(String),
}

/// Top-level error of one `execute` call
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("normalization failed: {0}")]
    Normalization(OperationReport),

    #[error("validation failed: {0}")]
    Validation(OperationReport),

    #[error("planning failed: {0}")]
    Planning(OperationReport),

    #[error("execution of operation is not possible")]
    ExecutionNotPossible,

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// The operation-level errors carried by this error, if any
    pub fn report(&self) -> Option<&OperationReport> {
        match self {
            EngineError::Normalization(report)
            | EngineError::Validation(report)
            | EngineError::Planning(report) => Some(report),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_segment_serializes_untagged() {
        let path = vec![PathSegment::from("users"), PathSegment::from(1), "name".into()];
        assert_eq!(
            serde_json::to_string(&path).unwrap(),
            r#"["users",1,"name"]"#
        );
    }

    #[test]
    fn test_graphql_error_omits_empty_path() {
        let error = GraphQLError::new("boom");
        assert_eq!(serde_json::to_string(&error).unwrap(), r#"{"message":"boom"}"#);
    }

    #[test]
    fn test_empty_request_message() {
        assert_eq!(
            RequestError::EmptyRequest.to_string(),
            "the provided request is empty"
        );
    }

    #[test]
    fn test_execution_not_possible_message() {
        assert_eq!(
            EngineError::ExecutionNotPossible.to_string(),
            "execution of operation is not possible"
        );
    }

    #[test]
    fn test_report_to_response_json() {
        let report = OperationReport::from_message("field 'foo' does not exist");
        assert_eq!(
            report.to_response_json(),
            r#"{"errors":[{"message":"field 'foo' does not exist"}]}"#
        );
    }
}
