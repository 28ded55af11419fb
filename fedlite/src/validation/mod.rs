// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Operation validation against the composite schema
//!
//! Runs on normalized documents, so fragment spreads are already inlined.

use std::collections::HashSet;

use serde_json::{Map, Value as Json};

use crate::ast::{Directive, Document, Selection, TypeRef};
use crate::error::{GraphQLError, OperationReport};
use crate::schema::{Schema, TypeKind};

/// Outcome of validating one operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<GraphQLError>,
}

impl ValidationResult {
    pub fn into_report(self) -> OperationReport {
        OperationReport { errors: self.errors }
    }
}

struct Validator<'a> {
    doc: &'a Document,
    schema: &'a Schema,
    defined_variables: HashSet<&'a str>,
    errors: Vec<GraphQLError>,
}

/// Validate the single operation of a normalized document
pub fn validate_operation(doc: &Document, schema: &Schema) -> ValidationResult {
    let mut errors = Vec::new();
    if doc.operations.len() != 1 {
        errors.push(GraphQLError::new(
            "Document must contain exactly one operation to execute.",
        ));
        return ValidationResult { valid: false, errors };
    }

    let operation = &doc.operations[0];
    let Some(root_type) = schema.root_type_name(operation.operation_type) else {
        errors.push(GraphQLError::new(format!(
            "Schema is not configured for {} operations.",
            operation.operation_type
        )));
        return ValidationResult { valid: false, errors };
    };

    let mut validator = Validator {
        doc,
        schema,
        defined_variables: operation
            .variable_definitions
            .iter()
            .map(|d| d.name.as_str())
            .collect(),
        errors,
    };

    let mut seen = HashSet::new();
    for definition in &operation.variable_definitions {
        if !seen.insert(definition.name.as_str()) {
            validator.error(format!(
                "There can be only one variable named \"${}\".",
                definition.name
            ));
        }
        let base = definition.type_ref.base_name();
        match schema.type_definition(base) {
            Some(t) if matches!(t.kind, TypeKind::Scalar | TypeKind::Enum | TypeKind::InputObject) => {}
            _ => validator.error(format!(
                "Variable \"${}\" cannot be non-input type \"{}\".",
                definition.name, definition.type_ref
            )),
        }
    }

    validator.check_directives(&operation.directives);
    validator.check_selection_set(operation.selection_set, root_type, &mut vec![]);

    let errors = validator.errors;
    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

impl<'a> Validator<'a> {
    fn error(&mut self, message: String) {
        self.errors.push(GraphQLError::new(message));
    }

    fn check_selection_set(&mut self, set: usize, parent_type: &str, path: &mut Vec<String>) {
        let doc = self.doc;
        let schema = self.schema;
        for selection in &doc.selection_sets[set].selections {
            match *selection {
                Selection::Field(field_ref) => {
                    let field = &doc.fields[field_ref];
                    self.check_directives(&field.directives);
                    if field.name == "__typename" {
                        if field.selection_set.is_some() {
                            self.error("Field \"__typename\" must not have a selection since type \"String!\" has no subfields.".to_string());
                        }
                        continue;
                    }
                    let Some(definition) = schema.field(parent_type, &field.name) else {
                        self.error(format!(
                            "Cannot query field \"{}\" on type \"{}\".",
                            field.name, parent_type
                        ));
                        continue;
                    };

                    for argument in &field.arguments {
                        if definition.argument(&argument.name).is_none() {
                            self.error(format!(
                                "Unknown argument \"{}\" on field \"{}.{}\".",
                                argument.name, parent_type, field.name
                            ));
                        }
                        self.check_variables_defined(&argument.value);
                    }
                    for argument_definition in &definition.arguments {
                        let provided = field.arguments.iter().any(|a| a.name == argument_definition.name);
                        if argument_definition.type_ref.is_non_null()
                            && !argument_definition.has_default
                            && !provided
                        {
                            self.error(format!(
                                "Field \"{}\" argument \"{}\" of type \"{}\" is required, but it was not provided.",
                                field.name, argument_definition.name, argument_definition.type_ref
                            ));
                        }
                    }

                    let field_type = definition.type_ref.base_name().to_string();
                    let is_leaf = schema
                        .type_definition(&field_type)
                        .map_or(false, |t| t.kind.is_leaf());
                    match (is_leaf, field.selection_set) {
                        (true, Some(_)) => self.error(format!(
                            "Field \"{}\" must not have a selection since type \"{}\" has no subfields.",
                            field.name, definition.type_ref
                        )),
                        (false, None) => self.error(format!(
                            "Field \"{}\" of type \"{}\" must have a selection of subfields.",
                            field.name, definition.type_ref
                        )),
                        (false, Some(child)) => {
                            path.push(field.response_key().to_string());
                            self.check_selection_set(child, &field_type, path);
                            path.pop();
                        }
                        (true, None) => {}
                    }
                }
                Selection::InlineFragment(fragment_ref) => {
                    let fragment = &doc.inline_fragments[fragment_ref];
                    self.check_directives(&fragment.directives);
                    let narrowed = fragment
                        .type_condition
                        .as_deref()
                        .unwrap_or(parent_type)
                        .to_string();
                    match schema.type_definition(&narrowed) {
                        Some(t) if t.kind.is_composite() => {
                            if !schema.types_overlap(parent_type, &narrowed) {
                                self.error(format!(
                                    "Fragment cannot be spread here as objects of type \"{}\" can never be of type \"{}\".",
                                    parent_type, narrowed
                                ));
                            }
                            self.check_selection_set(fragment.selection_set, &narrowed, path);
                        }
                        Some(_) => self.error(format!(
                            "Fragment cannot condition on non composite type \"{}\".",
                            narrowed
                        )),
                        None => self.error(format!("Unknown type \"{}\".", narrowed)),
                    }
                }
                Selection::FragmentSpread(spread_ref) => {
                    let name = doc.fragment_spreads[spread_ref].name.clone();
                    self.error(format!("Unknown fragment \"{}\".", name));
                }
            }
        }
    }

    fn check_directives(&mut self, directives: &[Directive]) {
        for directive in directives {
            if directive.name == "skip" || directive.name == "include" {
                match directive.argument("if") {
                    Some(value) => self.check_variables_defined(value),
                    None => self.error(format!(
                        "Directive \"@{}\" argument \"if\" of type \"Boolean!\" is required, but it was not provided.",
                        directive.name
                    )),
                }
            } else {
                for argument in &directive.arguments {
                    self.check_variables_defined(&argument.value);
                }
            }
        }
    }

    fn check_variables_defined(&mut self, value: &crate::ast::Value) {
        let mut used = Vec::new();
        value.collect_variables(&mut used);
        for name in used {
            if !self.defined_variables.contains(name.as_str()) {
                self.error(format!("Variable \"${}\" is not defined.", name));
            }
        }
    }
}

/// Check provided variable values against the operation's definitions
pub fn validate_variables(doc: &Document, variables: &Map<String, Json>) -> Result<(), OperationReport> {
    let mut report = OperationReport::new();
    let Some(operation) = doc.operations.first() else {
        return Ok(());
    };
    for definition in &operation.variable_definitions {
        let value = variables.get(&definition.name);
        match (value, &definition.type_ref) {
            (None, TypeRef::NonNull(_)) if definition.default_value.is_none() => {
                report.add(format!(
                    "Variable \"${}\" of required type \"{}\" was not provided.",
                    definition.name, definition.type_ref
                ));
            }
            (Some(Json::Null), TypeRef::NonNull(_)) => {
                report.add(format!(
                    "Variable \"${}\" of non-null type \"{}\" must not be null.",
                    definition.name, definition.type_ref
                ));
            }
            (Some(value), type_ref) => {
                if let Some(message) = check_variable_shape(value, type_ref) {
                    report.add(format!(
                        "Variable \"${}\" got invalid value {}; {}",
                        definition.name, value, message
                    ));
                }
            }
            _ => {}
        }
    }
    if report.has_errors() {
        Err(report)
    } else {
        Ok(())
    }
}

fn check_variable_shape(value: &Json, type_ref: &TypeRef) -> Option<String> {
    match (type_ref, value) {
        (TypeRef::NonNull(_), Json::Null) => Some(format!("Expected non-nullable type \"{}\" not to be null.", type_ref)),
        (TypeRef::NonNull(inner), _) => check_variable_shape(value, inner),
        (_, Json::Null) => None,
        (TypeRef::List(inner), Json::Array(items)) => items.iter().find_map(|v| check_variable_shape(v, inner)),
        (TypeRef::List(inner), _) => check_variable_shape(value, inner),
        (TypeRef::Named(name), _) => match (name.as_str(), value) {
            ("Int", Json::Number(n)) if n.is_i64() => None,
            ("Float", Json::Number(_)) => None,
            ("String", Json::String(_)) => None,
            ("Boolean", Json::Bool(_)) => None,
            ("ID", Json::String(_)) => None,
            ("ID", Json::Number(n)) if n.is_i64() => None,
            ("Int" | "Float" | "String" | "Boolean" | "ID", _) => {
                Some(format!("{} cannot represent value: {}", name, value))
            }
            _ => None,
        },
    }
}
