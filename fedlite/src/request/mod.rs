// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Inbound GraphQL requests
//!
//! A [`Request`] is deserialized from the client body and then parsed,
//! normalized and validated lazily. Each step memoizes its result on the
//! request so repeated engine calls do not redo work.

pub mod headers;

pub use headers::Headers;

use std::collections::HashMap;
use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::ast::{parse_document, Document, OperationType, Selection};
use crate::error::{EngineError, OperationReport, RequestError};
use crate::normalize;
use crate::resolve::ErrorBehavior;
use crate::schema::Schema;
use crate::validation::{validate_operation, validate_variables, ValidationResult};

/// One client GraphQL operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Request {
    #[serde(
        rename = "operationName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub variables: Json,
    #[serde(default)]
    pub query: String,
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub extensions: Json,

    #[serde(skip)]
    document: Option<Document>,
    #[serde(skip)]
    is_normalized: bool,
    #[serde(skip)]
    validation: HashMap<u64, ValidationResult>,
    #[serde(skip)]
    headers: Headers,
}

/// Read a request from a JSON body
pub fn unmarshal_request<R: Read>(mut reader: R) -> Result<Request, RequestError> {
    let mut body = Vec::new();
    reader.read_to_end(&mut body)?;
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(RequestError::EmptyRequest);
    }
    Ok(serde_json::from_slice(&body)?)
}

impl Request {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn with_variables(mut self, variables: Json) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_extensions(mut self, extensions: Json) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn is_normalized(&self) -> bool {
        self.is_normalized
    }

    pub fn document(&self) -> Option<&Document> {
        self.document.as_ref()
    }

    /// Parse the query text once
    pub fn parse(&mut self) -> Result<(), RequestError> {
        if self.document.is_some() {
            return Ok(());
        }
        if self.query.trim().is_empty() {
            return Err(RequestError::EmptyRequest);
        }
        let document = parse_document(&self.query).map_err(|e| RequestError::Syntax(e.to_string()))?;
        self.document = Some(document);
        Ok(())
    }

    /// Normalize the selected operation and lift literal arguments into variables
    pub fn normalize(&mut self, schema: &Schema) -> Result<(), EngineError> {
        if self.is_normalized {
            return Ok(());
        }
        self.parse()?;
        let mut variables = match &self.variables {
            Json::Null => Map::new(),
            Json::Object(map) => map.clone(),
            _ => {
                return Err(EngineError::Normalization(OperationReport::from_message(
                    "Variables must be a JSON object.",
                )))
            }
        };
        let Some(document) = self.document.as_mut() else {
            return Err(EngineError::Request(RequestError::EmptyRequest));
        };

        normalize::normalize_operation(document, schema, self.operation_name.as_deref())
            .map_err(EngineError::Normalization)?;
        normalize::apply_variable_defaults(document, &mut variables);
        normalize::extract_variables(document, schema, &mut variables)
            .map_err(EngineError::Normalization)?;

        self.variables = Json::Object(variables);
        self.is_normalized = true;
        self.validation.clear();
        Ok(())
    }

    /// Validate the normalized operation, memoized per schema
    pub fn validate(&mut self, schema: &Schema) -> ValidationResult {
        if let Some(result) = self.validation.get(&schema.hash()) {
            return result.clone();
        }
        let result = match &self.document {
            Some(document) => validate_operation(document, schema),
            None => ValidationResult {
                valid: false,
                errors: vec![crate::error::GraphQLError::new("the provided request is empty")],
            },
        };
        self.validation.insert(schema.hash(), result.clone());
        result
    }

    /// Check that provided variable values fit the operation's definitions
    pub fn validate_variables(&self) -> Result<(), OperationReport> {
        match (&self.document, &self.variables) {
            (Some(document), Json::Object(variables)) => validate_variables(document, variables),
            (Some(document), _) => validate_variables(document, &Map::new()),
            (None, _) => Ok(()),
        }
    }

    pub fn variables_object(&self) -> Json {
        match &self.variables {
            Json::Object(_) => self.variables.clone(),
            _ => Json::Object(Map::new()),
        }
    }

    /// Operation type of the selected operation, parsing the query if needed
    pub fn operation_type(&mut self) -> Result<OperationType, RequestError> {
        self.parse()?;
        let document = self.document.as_ref().ok_or(RequestError::EmptyRequest)?;
        let op_ref = document
            .operation_by_name(self.operation_name.as_deref())
            .ok_or_else(|| RequestError::Syntax("operation not found".to_string()))?;
        Ok(document.operations[op_ref].operation_type)
    }

    /// Whether every root field of the selected operation is an introspection field
    pub fn is_introspection_query(&mut self) -> bool {
        if self.parse().is_err() {
            return false;
        }
        let Some(document) = self.document.as_ref() else {
            return false;
        };
        let Some(op_ref) = document.operation_by_name(self.operation_name.as_deref()) else {
            return false;
        };
        let operation = &document.operations[op_ref];
        if operation.operation_type != OperationType::Query {
            return false;
        }
        document.selection_sets[operation.selection_set]
            .selections
            .iter()
            .all(|selection| match *selection {
                Selection::Field(f) => matches!(
                    document.fields[f].name.as_str(),
                    "__schema" | "__type" | "__typename"
                ),
                _ => false,
            })
    }

    /// The `onError` request extension
    ///
    /// The boolean is `false` when the extension is absent or unrecognized,
    /// in which case the behavior falls back to `PROPAGATE`.
    pub fn on_error_behavior(&self) -> (ErrorBehavior, bool) {
        match self.extensions.get("onError") {
            Some(Json::String(value)) if !value.is_empty() => ErrorBehavior::parse(value),
            _ => (ErrorBehavior::Propagate, false),
        }
    }
}
