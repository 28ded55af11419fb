// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Operation normalization
//!
//! Normalization rewrites a parsed document in place so that operations
//! which differ only in presentation print identically:
//! 1. select the requested operation and drop the others
//! 2. inline fragment spreads as inline fragments
//! 3. remove fragment definitions
//! 4. flatten inline fragments that do not narrow the enclosing type
//! 5. merge duplicate fields
//! 6. remove unused variable definitions
//!
//! A second pass, [`extract_variables`], lifts literal field arguments into
//! generated variables so operations that differ only by literals share a plan.

use std::collections::HashSet;

use log::debug;
use serde_json::{Map, Value as Json};

use crate::ast::{
    Document, InlineFragment, Selection, SelectionSet, TypeRef, Value, VariableDefinition,
};
use crate::error::OperationReport;
use crate::schema::Schema;

/// Normalize the document down to the selected operation
///
/// On success the document holds exactly one operation at index 0.
pub fn normalize_operation(
    doc: &mut Document,
    schema: &Schema,
    operation_name: Option<&str>,
) -> Result<(), OperationReport> {
    let op_ref = select_operation(doc, operation_name)?;
    let operation = doc.operations.swap_remove(op_ref);
    doc.operations = vec![operation];

    let root_type = schema
        .root_type_name(doc.operations[0].operation_type)
        .map(str::to_string)
        .ok_or_else(|| {
            OperationReport::from_message(format!(
                "Schema is not configured for {} operations.",
                doc.operations[0].operation_type
            ))
        })?;

    let root_set = doc.operations[0].selection_set;
    let mut stack = Vec::new();
    inline_fragment_spreads(doc, root_set, &mut stack)?;
    doc.fragments.clear();

    flatten_inline_fragments(doc, schema, root_set, &root_type);
    merge_fields(doc, root_set);
    remove_unused_variables(doc);

    debug!(
        "normalized operation {:?}",
        doc.operations[0].name.as_deref().unwrap_or("<anonymous>")
    );
    Ok(())
}

fn select_operation(doc: &Document, operation_name: Option<&str>) -> Result<usize, OperationReport> {
    if let Some(op) = doc.operation_by_name(operation_name) {
        return Ok(op);
    }
    let message = match operation_name {
        Some(name) if !name.is_empty() => format!("Unknown operation named \"{}\".", name),
        _ => "Operation name is required when the document contains multiple operations."
            .to_string(),
    };
    Err(OperationReport::from_message(message))
}

fn inline_fragment_spreads(
    doc: &mut Document,
    set: usize,
    stack: &mut Vec<String>,
) -> Result<(), OperationReport> {
    let selections = doc.selection_sets[set].selections.clone();
    let mut rewritten = Vec::with_capacity(selections.len());
    for selection in selections {
        match selection {
            Selection::Field(field_ref) => {
                if let Some(child) = doc.fields[field_ref].selection_set {
                    inline_fragment_spreads(doc, child, stack)?;
                }
                rewritten.push(selection);
            }
            Selection::InlineFragment(fragment_ref) => {
                let child = doc.inline_fragments[fragment_ref].selection_set;
                inline_fragment_spreads(doc, child, stack)?;
                rewritten.push(selection);
            }
            Selection::FragmentSpread(spread_ref) => {
                let spread = doc.fragment_spreads[spread_ref].clone();
                if stack.contains(&spread.name) {
                    return Err(OperationReport::from_message(format!(
                        "Cannot spread fragment \"{}\" within itself.",
                        spread.name
                    )));
                }
                let fragment_ref = doc.fragment_by_name(&spread.name).ok_or_else(|| {
                    OperationReport::from_message(format!("Unknown fragment \"{}\".", spread.name))
                })?;
                let type_condition = doc.fragments[fragment_ref].type_condition.clone();
                let copied = doc.copy_selection_set(doc.fragments[fragment_ref].selection_set);

                stack.push(spread.name.clone());
                inline_fragment_spreads(doc, copied, stack)?;
                stack.pop();

                let inline = doc.add_inline_fragment(InlineFragment {
                    type_condition: Some(type_condition),
                    directives: spread.directives,
                    selection_set: copied,
                });
                rewritten.push(Selection::InlineFragment(inline));
            }
        }
    }
    doc.selection_sets[set].selections = rewritten;
    Ok(())
}

fn flatten_inline_fragments(doc: &mut Document, schema: &Schema, set: usize, parent_type: &str) {
    let selections = doc.selection_sets[set].selections.clone();
    let mut flattened = Vec::with_capacity(selections.len());
    for selection in selections {
        match selection {
            Selection::Field(field_ref) => {
                if let Some(child) = doc.fields[field_ref].selection_set {
                    let field_type = schema
                        .field(parent_type, &doc.fields[field_ref].name)
                        .map(|f| f.type_ref.base_name().to_string());
                    if let Some(field_type) = field_type {
                        flatten_inline_fragments(doc, schema, child, &field_type);
                    }
                }
                flattened.push(selection);
            }
            Selection::InlineFragment(fragment_ref) => {
                let fragment = doc.inline_fragments[fragment_ref].clone();
                let narrowed_type = fragment
                    .type_condition
                    .clone()
                    .unwrap_or_else(|| parent_type.to_string());
                flatten_inline_fragments(doc, schema, fragment.selection_set, &narrowed_type);
                if fragment.directives.is_empty() && narrowed_type == parent_type {
                    let inner = doc.selection_sets[fragment.selection_set].selections.clone();
                    flattened.extend(inner);
                } else {
                    flattened.push(selection);
                }
            }
            Selection::FragmentSpread(_) => flattened.push(selection),
        }
    }
    doc.selection_sets[set].selections = flattened;
}

/// Merge fields that share a response key, name, arguments and directives
fn merge_fields(doc: &mut Document, set: usize) {
    let selections = doc.selection_sets[set].selections.clone();
    let mut kept: Vec<Selection> = Vec::with_capacity(selections.len());
    for selection in selections {
        if let Selection::Field(field_ref) = selection {
            let duplicate_of = kept.iter().find_map(|existing| match *existing {
                Selection::Field(existing_ref) if same_field(doc, existing_ref, field_ref) => {
                    Some(existing_ref)
                }
                _ => None,
            });
            if let Some(existing_ref) = duplicate_of {
                let incoming = doc.fields[field_ref].selection_set;
                if let (Some(target), Some(source)) = (doc.fields[existing_ref].selection_set, incoming) {
                    let extra = doc.selection_sets[source].selections.clone();
                    doc.selection_sets[target].selections.extend(extra);
                }
                continue;
            }
        }
        kept.push(selection);
    }
    doc.selection_sets[set].selections = kept.clone();

    for selection in kept {
        match selection {
            Selection::Field(field_ref) => {
                if let Some(child) = doc.fields[field_ref].selection_set {
                    merge_fields(doc, child);
                }
            }
            Selection::InlineFragment(fragment_ref) => {
                let child = doc.inline_fragments[fragment_ref].selection_set;
                merge_fields(doc, child);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

fn same_field(doc: &Document, a: usize, b: usize) -> bool {
    let (a, b) = (&doc.fields[a], &doc.fields[b]);
    a.response_key() == b.response_key()
        && a.name == b.name
        && a.arguments == b.arguments
        && a.directives == b.directives
        && a.selection_set.is_some() == b.selection_set.is_some()
}

fn remove_unused_variables(doc: &mut Document) {
    let mut used = Vec::new();
    doc.variables_used_in(doc.operations[0].selection_set, &mut used);
    for directive in &doc.operations[0].directives {
        for argument in &directive.arguments {
            argument.value.collect_variables(&mut used);
        }
    }
    let used: HashSet<String> = used.into_iter().collect();
    doc.operations[0]
        .variable_definitions
        .retain(|definition| used.contains(&definition.name));
}

/// Fill in default values for variables the client did not send
pub fn apply_variable_defaults(doc: &Document, variables: &mut Map<String, Json>) {
    let Some(operation) = doc.operations.first() else {
        return;
    };
    for definition in &operation.variable_definitions {
        if variables.contains_key(&definition.name) {
            continue;
        }
        if let Some(default) = &definition.default_value {
            variables.insert(definition.name.clone(), default.to_json(&Json::Null));
        }
    }
}

/// Lift literal field arguments into generated variables
///
/// Each extracted literal becomes `$a`, `$b`, ... (skipping names the
/// operation already defines) and its JSON value is added to `variables`.
/// Client variables the operation does not define are dropped first, so they
/// can neither shift the generated names nor shadow an extracted value.
/// Directive arguments stay literal because they select the response shape.
pub fn extract_variables(
    doc: &mut Document,
    schema: &Schema,
    variables: &mut Map<String, Json>,
) -> Result<(), OperationReport> {
    let Some(operation) = doc.operations.first() else {
        return Err(OperationReport::from_message("Document does not contain any operation."));
    };
    let root_type = schema
        .root_type_name(operation.operation_type)
        .map(str::to_string)
        .ok_or_else(|| OperationReport::from_message("Schema does not define the operation root type."))?;
    let root_set = operation.selection_set;

    let defined: HashSet<String> = operation
        .variable_definitions
        .iter()
        .map(|d| d.name.clone())
        .collect();
    let undefined: Vec<String> = variables
        .keys()
        .filter(|name| !defined.contains(*name))
        .cloned()
        .collect();
    for name in undefined {
        debug!("dropping variable '{}' not defined by the operation", name);
        variables.remove(&name);
    }

    let mut names = VariableNames {
        taken: defined,
        next: 0,
    };
    let mut extracted = Vec::new();
    extract_in_set(doc, schema, root_set, &root_type, &mut names, &mut extracted);

    for (definition, value) in extracted {
        variables.insert(definition.name.clone(), value);
        doc.operations[0].variable_definitions.push(definition);
    }
    Ok(())
}

struct VariableNames {
    taken: HashSet<String>,
    next: usize,
}

impl VariableNames {
    fn generate(&mut self) -> String {
        loop {
            let name = alphabetic_name(self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// 0 -> "a", 25 -> "z", 26 -> "aa"
fn alphabetic_name(mut index: usize) -> String {
    let mut chars = Vec::new();
    loop {
        chars.push((b'a' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    chars.iter().rev().collect()
}

fn extract_in_set(
    doc: &mut Document,
    schema: &Schema,
    set: usize,
    parent_type: &str,
    names: &mut VariableNames,
    extracted: &mut Vec<(VariableDefinition, Json)>,
) {
    let selections = doc.selection_sets[set].selections.clone();
    for selection in selections {
        match selection {
            Selection::Field(field_ref) => {
                let field_name = doc.fields[field_ref].name.clone();
                let definition = schema.field(parent_type, &field_name).cloned();
                if let Some(definition) = &definition {
                    let arguments = doc.fields[field_ref].arguments.clone();
                    for (i, argument) in arguments.iter().enumerate() {
                        if argument.value.contains_variable() {
                            continue;
                        }
                        let Some(argument_definition) = definition.argument(&argument.name) else {
                            continue;
                        };
                        let name = names.generate();
                        let json = argument.value.to_json(&Json::Null);
                        extracted.push((
                            VariableDefinition {
                                name: name.clone(),
                                type_ref: literal_type(&argument_definition.type_ref, &argument.value),
                                default_value: None,
                            },
                            json,
                        ));
                        doc.fields[field_ref].arguments[i].value = Value::Variable(name);
                    }
                }
                if let (Some(child), Some(definition)) = (doc.fields[field_ref].selection_set, definition) {
                    let field_type = definition.type_ref.base_name().to_string();
                    extract_in_set(doc, schema, child, &field_type, names, extracted);
                }
            }
            Selection::InlineFragment(fragment_ref) => {
                let fragment = &doc.inline_fragments[fragment_ref];
                let narrowed = fragment
                    .type_condition
                    .clone()
                    .unwrap_or_else(|| parent_type.to_string());
                let child = fragment.selection_set;
                extract_in_set(doc, schema, child, &narrowed, names, extracted);
            }
            Selection::FragmentSpread(_) => {}
        }
    }
}

/// A literal `null` can only be passed through a nullable variable
fn literal_type(declared: &TypeRef, value: &Value) -> TypeRef {
    match (declared, value) {
        (TypeRef::NonNull(inner), Value::Null) => (**inner).clone(),
        _ => declared.clone(),
    }
}

/// Response keys of the fields directly under `set`
pub fn field_names(doc: &Document, set: usize) -> Vec<String> {
    let SelectionSet { selections } = &doc.selection_sets[set];
    selections
        .iter()
        .filter_map(|s| match *s {
            Selection::Field(f) => Some(doc.fields[f].response_key().to_string()),
            _ => None,
        })
        .collect()
}
