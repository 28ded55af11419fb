// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Response rendering and null propagation
//!
//! Walks the plan's response shape over the merged subgraph data. Each node
//! is checked against its declared type; nulls in non-nullable positions
//! and type mismatches become errors at the current path and are then
//! handled according to the execution's [`ErrorBehavior`].

use serde_json::Value as Json;

use super::node::{Field, Node, Object};
use super::ErrorBehavior;
use crate::error::{GraphQLError, PathSegment, ResolveError};

/// Rendered response tree; object members keep the order of the plan
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseValue {
    Null,
    Leaf(Json),
    Object(Vec<(String, ResponseValue)>),
    List(Vec<ResponseValue>),
}

impl ResponseValue {
    pub fn write_to(&self, out: &mut String) {
        match self {
            ResponseValue::Null => out.push_str("null"),
            ResponseValue::Leaf(value) => out.push_str(&value.to_string()),
            ResponseValue::Object(fields) => {
                out.push('{');
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Json::String(name.clone()).to_string());
                    out.push(':');
                    value.write_to(out);
                }
                out.push('}');
            }
            ResponseValue::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    item.write_to(out);
                }
                out.push(']');
            }
        }
    }
}

/// A null that must replace an ancestor
struct Bubble;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RenderedResponse {
    pub errors: Vec<GraphQLError>,
    /// `None` renders as `"data":null`
    pub data: Option<ResponseValue>,
}

impl RenderedResponse {
    /// Serialize as `{"errors":[...],"data":...,"extensions":...}`
    pub fn to_json(&self, extensions: Option<&Json>) -> Result<String, ResolveError> {
        let mut out = String::from("{");
        if !self.errors.is_empty() {
            let errors =
                serde_json::to_string(&self.errors).map_err(|e| ResolveError::Write(e.to_string()))?;
            out.push_str("\"errors\":");
            out.push_str(&errors);
            out.push(',');
        }
        out.push_str("\"data\":");
        match &self.data {
            Some(data) => data.write_to(&mut out),
            None => out.push_str("null"),
        }
        if let Some(extensions) = extensions {
            out.push_str(",\"extensions\":");
            out.push_str(&extensions.to_string());
        }
        out.push('}');
        Ok(out)
    }
}

pub(crate) struct Resolvable<'a> {
    variables: &'a Json,
    behavior: ErrorBehavior,
    failed_paths: &'a [Vec<PathSegment>],
    errors: Vec<GraphQLError>,
    path: Vec<PathSegment>,
    halted: bool,
}

impl<'a> Resolvable<'a> {
    pub fn new(variables: &'a Json, behavior: ErrorBehavior, failed_paths: &'a [Vec<PathSegment>]) -> Self {
        Self {
            variables,
            behavior,
            failed_paths,
            errors: Vec::new(),
            path: Vec::new(),
            halted: false,
        }
    }

    /// Render `root` over `data`; `fetch_errors` precede errors found while walking
    pub fn resolve(mut self, root: &Object, data: &Json, fetch_errors: Vec<GraphQLError>) -> RenderedResponse {
        if self.behavior == ErrorBehavior::Halt && !fetch_errors.is_empty() {
            return RenderedResponse {
                errors: fetch_errors.into_iter().take(1).collect(),
                data: None,
            };
        }
        self.errors = fetch_errors;
        let data = self.walk_object(root, data).ok().filter(|_| !self.halted);
        RenderedResponse {
            errors: self.errors,
            data,
        }
    }

    fn walk_object(&mut self, object: &Object, data: &Json) -> Result<ResponseValue, Bubble> {
        let type_name = data
            .get("__typename")
            .and_then(Json::as_str)
            .unwrap_or(&object.type_name);
        let mut fields = Vec::with_capacity(object.fields.len());
        for field in &object.fields {
            if self.skipped(field, type_name) {
                continue;
            }
            self.path.push(PathSegment::from(field.name.as_str()));
            let value = select(data, field.value.path());
            let result = self.walk_node(&field.value, value, field, type_name);
            self.path.pop();
            fields.push((field.name.clone(), result?));
        }
        Ok(ResponseValue::Object(fields))
    }

    fn walk_node(
        &mut self,
        node: &Node,
        value: Option<&Json>,
        field: &Field,
        parent_type: &str,
    ) -> Result<ResponseValue, Bubble> {
        if self.halted {
            return Err(Bubble);
        }
        if let Node::Typename(_) = node {
            let type_name = value
                .filter(|v| v.is_string())
                .cloned()
                .unwrap_or_else(|| Json::String(parent_type.to_string()));
            return Ok(ResponseValue::Leaf(type_name));
        }
        let value = match value {
            None | Some(Json::Null) => return self.null_value(node.is_nullable(), field),
            Some(value) => value,
        };
        match node {
            Node::Object(object) => {
                if !value.is_object() {
                    return self.type_error("Object cannot represent non-object value.".to_string(), object.nullable);
                }
                match self.walk_object(object, value) {
                    Ok(rendered) => Ok(rendered),
                    Err(Bubble) => self.absorb(object.nullable),
                }
            }
            Node::Array(array) => {
                let Json::Array(items) = value else {
                    return self.type_error("Array cannot represent non-array value.".to_string(), array.nullable);
                };
                let mut rendered = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    self.path.push(PathSegment::Index(i));
                    let result = self.walk_node(&array.item, select(item, array.item.path()), field, parent_type);
                    self.path.pop();
                    match result {
                        Ok(value) => rendered.push(value),
                        Err(Bubble) => return self.absorb(array.nullable),
                    }
                }
                Ok(ResponseValue::List(rendered))
            }
            Node::String(leaf) => {
                if value.is_string() {
                    Ok(ResponseValue::Leaf(value.clone()))
                } else {
                    self.type_error(format!("String cannot represent non-string value: {}", value), leaf.nullable)
                }
            }
            Node::Boolean(leaf) => {
                if value.is_boolean() {
                    Ok(ResponseValue::Leaf(value.clone()))
                } else {
                    self.type_error(format!("Bool cannot represent non-boolean value: {}", value), leaf.nullable)
                }
            }
            Node::Integer(leaf) => {
                if value.is_i64() || value.is_u64() {
                    Ok(ResponseValue::Leaf(value.clone()))
                } else {
                    self.type_error(format!("Int cannot represent non-integer value: {}", value), leaf.nullable)
                }
            }
            Node::Float(leaf) => {
                if value.is_number() {
                    Ok(ResponseValue::Leaf(value.clone()))
                } else {
                    self.type_error(format!("Float cannot represent non-float value: {}", value), leaf.nullable)
                }
            }
            Node::Scalar(_) | Node::Typename(_) => Ok(ResponseValue::Leaf(value.clone())),
        }
    }

    fn skipped(&self, field: &Field, type_name: &str) -> bool {
        let is_true = |name: &String| self.variables.get(name) == Some(&Json::Bool(true));
        if field.skip_variable.as_ref().map_or(false, is_true) {
            return true;
        }
        if field.include_variable.as_ref().map_or(false, |name| !is_true(name)) {
            return true;
        }
        !field.on_type_names.is_empty() && !field.on_type_names.iter().any(|t| t == type_name)
    }

    fn null_value(&mut self, nullable: bool, field: &Field) -> Result<ResponseValue, Bubble> {
        if nullable {
            return Ok(ResponseValue::Null);
        }
        if !self.under_failed_path() {
            self.add_error(format!(
                "Cannot return null for non-nullable field '{}'.",
                field.coordinate()
            ));
        }
        self.on_error()
    }

    fn type_error(&mut self, message: String, nullable: bool) -> Result<ResponseValue, Bubble> {
        self.add_error(message);
        if nullable && !self.halted {
            Ok(ResponseValue::Null)
        } else {
            self.on_error()
        }
    }

    /// Resolve a null in a non-nullable position according to the behavior
    fn on_error(&self) -> Result<ResponseValue, Bubble> {
        match self.behavior {
            ErrorBehavior::Null if !self.halted => Ok(ResponseValue::Null),
            _ => Err(Bubble),
        }
    }

    /// A child bubbled; a nullable node stops it here
    fn absorb(&self, nullable: bool) -> Result<ResponseValue, Bubble> {
        if nullable && !self.halted {
            Ok(ResponseValue::Null)
        } else {
            Err(Bubble)
        }
    }

    fn add_error(&mut self, message: String) {
        if self.behavior == ErrorBehavior::Halt {
            if self.halted {
                return;
            }
            self.halted = true;
        }
        self.errors
            .push(GraphQLError::new(message).with_path(self.path.clone()));
    }

    fn under_failed_path(&self) -> bool {
        self.failed_paths
            .iter()
            .any(|failed| self.path.starts_with(failed))
    }
}

fn select<'d>(data: &'d Json, path: &[String]) -> Option<&'d Json> {
    path.iter().try_fold(data, |current, key| current.get(key))
}
