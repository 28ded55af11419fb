// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Executable GraphQL documents
//!
//! A [`Document`] is an arena: every structural node lives in a flat `Vec`
//! and refers to its children by index. Copying a subtree means pushing new
//! entries, never aliasing. Argument values are small owned trees.

pub mod lexer;
pub mod parser;
pub mod printer;

pub use parser::{parse_document, ParserError};
pub use printer::{print_document, print_operation};

use std::fmt;

/// Kind of operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A type reference such as `[User!]!`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named(name.into())
    }

    pub fn non_null(inner: TypeRef) -> Self {
        TypeRef::NonNull(Box::new(inner))
    }

    pub fn list(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    /// Parse a type reference from its SDL notation
    pub fn parse(input: &str) -> Option<TypeRef> {
        let input = input.trim();
        if let Some(inner) = input.strip_suffix('!') {
            let inner = TypeRef::parse(inner)?;
            if matches!(inner, TypeRef::NonNull(_)) {
                return None;
            }
            return Some(TypeRef::non_null(inner));
        }
        if let Some(inner) = input.strip_prefix('[') {
            let inner = inner.strip_suffix(']')?;
            return Some(TypeRef::list(TypeRef::parse(inner)?));
        }
        if input.is_empty()
            || !input
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return None;
        }
        Some(TypeRef::named(input))
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, TypeRef::NonNull(_))
    }

    pub fn is_list(&self) -> bool {
        match self {
            TypeRef::List(_) => true,
            TypeRef::NonNull(inner) => inner.is_list(),
            TypeRef::Named(_) => false,
        }
    }

    /// The innermost named type
    pub fn base_name(&self) -> &str {
        match self {
            TypeRef::Named(name) => name,
            TypeRef::List(inner) | TypeRef::NonNull(inner) => inner.base_name(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Named(name) => write!(f, "{}", name),
            TypeRef::List(inner) => write!(f, "[{}]", inner),
            TypeRef::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

/// Input value literal
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    Enum(String),
    List(Vec<Value>),
    Object(Vec<(String, Value)>),
}

impl Value {
    pub fn contains_variable(&self) -> bool {
        match self {
            Value::Variable(_) => true,
            Value::List(items) => items.iter().any(Value::contains_variable),
            Value::Object(fields) => fields.iter().any(|(_, v)| v.contains_variable()),
            _ => false,
        }
    }

    pub fn collect_variables(&self, out: &mut Vec<String>) {
        match self {
            Value::Variable(name) => out.push(name.clone()),
            Value::List(items) => items.iter().for_each(|v| v.collect_variables(out)),
            Value::Object(fields) => fields.iter().for_each(|(_, v)| v.collect_variables(out)),
            _ => {}
        }
    }

    /// Convert to JSON, substituting variables from `variables`
    pub fn to_json(&self, variables: &serde_json::Value) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            Value::Variable(name) => variables.get(name).cloned().unwrap_or(Json::Null),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::String(s) | Value::Enum(s) => Json::String(s.clone()),
            Value::Boolean(b) => Json::Bool(*b),
            Value::Null => Json::Null,
            Value::List(items) => Json::Array(items.iter().map(|v| v.to_json(variables)).collect()),
            Value::Object(fields) => Json::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json(variables)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl Directive {
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments
            .iter()
            .find(|a| a.name == name)
            .map(|a| &a.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub type_ref: TypeRef,
    pub default_value: Option<Value>,
}

/// Reference to one selection inside a selection set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selection {
    Field(usize),
    InlineFragment(usize),
    FragmentSpread(usize),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionSet {
    pub selections: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    pub directives: Vec<Directive>,
    pub selection_set: Option<usize>,
}

impl Field {
    /// Key under which this field appears in the response
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub directives: Vec<Directive>,
    pub selection_set: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub operation_type: OperationType,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: usize,
}

/// Arena-backed executable document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
    pub fragments: Vec<FragmentDefinition>,
    pub selection_sets: Vec<SelectionSet>,
    pub fields: Vec<Field>,
    pub inline_fragments: Vec<InlineFragment>,
    pub fragment_spreads: Vec<FragmentSpread>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_selection_set(&mut self, set: SelectionSet) -> usize {
        self.selection_sets.push(set);
        self.selection_sets.len() - 1
    }

    pub fn add_field(&mut self, field: Field) -> usize {
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub fn add_inline_fragment(&mut self, fragment: InlineFragment) -> usize {
        self.inline_fragments.push(fragment);
        self.inline_fragments.len() - 1
    }

    pub fn add_fragment_spread(&mut self, spread: FragmentSpread) -> usize {
        self.fragment_spreads.push(spread);
        self.fragment_spreads.len() - 1
    }

    pub fn operation_by_name(&self, name: Option<&str>) -> Option<usize> {
        match name {
            Some(name) if !name.is_empty() => self
                .operations
                .iter()
                .position(|op| op.name.as_deref() == Some(name)),
            _ if self.operations.len() == 1 => Some(0),
            _ => None,
        }
    }

    pub fn fragment_by_name(&self, name: &str) -> Option<usize> {
        self.fragments.iter().position(|f| f.name == name)
    }

    /// Deep-copy a selection set so the copy shares no arena entries with the source
    pub fn copy_selection_set(&mut self, set: usize) -> usize {
        let selections = self.selection_sets[set].selections.clone();
        let mut copied = Vec::with_capacity(selections.len());
        for selection in selections {
            let copy = match selection {
                Selection::Field(field_ref) => {
                    let mut field = self.fields[field_ref].clone();
                    if let Some(child) = field.selection_set {
                        field.selection_set = Some(self.copy_selection_set(child));
                    }
                    Selection::Field(self.add_field(field))
                }
                Selection::InlineFragment(fragment_ref) => {
                    let mut fragment = self.inline_fragments[fragment_ref].clone();
                    fragment.selection_set = self.copy_selection_set(fragment.selection_set);
                    Selection::InlineFragment(self.add_inline_fragment(fragment))
                }
                Selection::FragmentSpread(spread_ref) => {
                    let spread = self.fragment_spreads[spread_ref].clone();
                    Selection::FragmentSpread(self.add_fragment_spread(spread))
                }
            };
            copied.push(copy);
        }
        self.add_selection_set(SelectionSet { selections: copied })
    }

    /// Variable names referenced by arguments and directives under `set`
    pub fn variables_used_in(&self, set: usize, out: &mut Vec<String>) {
        for selection in &self.selection_sets[set].selections {
            match *selection {
                Selection::Field(field_ref) => {
                    let field = &self.fields[field_ref];
                    for argument in &field.arguments {
                        argument.value.collect_variables(out);
                    }
                    collect_directive_variables(&field.directives, out);
                    if let Some(child) = field.selection_set {
                        self.variables_used_in(child, out);
                    }
                }
                Selection::InlineFragment(fragment_ref) => {
                    let fragment = &self.inline_fragments[fragment_ref];
                    collect_directive_variables(&fragment.directives, out);
                    self.variables_used_in(fragment.selection_set, out);
                }
                Selection::FragmentSpread(spread_ref) => {
                    let spread = &self.fragment_spreads[spread_ref];
                    collect_directive_variables(&spread.directives, out);
                    if let Some(fragment) = self.fragment_by_name(&spread.name) {
                        self.variables_used_in(self.fragments[fragment].selection_set, out);
                    }
                }
            }
        }
    }
}

fn collect_directive_variables(directives: &[Directive], out: &mut Vec<String>) {
    for directive in directives {
        for argument in &directive.arguments {
            argument.value.collect_variables(out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_ref_parse() {
        let parsed = TypeRef::parse("[User!]!").unwrap();
        assert!(parsed.is_non_null());
        assert!(parsed.is_list());
        assert_eq!(parsed.base_name(), "User");
        assert_eq!(parsed.to_string(), "[User!]!");
        assert!(TypeRef::parse("User!!").is_none());
        assert!(TypeRef::parse("[User").is_none());
    }

    #[test]
    fn test_value_to_json_substitutes_variables() {
        let value = Value::Object(vec![
            ("id".to_string(), Value::Variable("a".to_string())),
            ("kind".to_string(), Value::Enum("ADMIN".to_string())),
        ]);
        let variables = serde_json::json!({"a": 7});
        assert_eq!(
            value.to_json(&variables),
            serde_json::json!({"id": 7, "kind": "ADMIN"})
        );
    }

    #[test]
    fn test_copy_selection_set_is_deep() {
        let doc = parse_document("{ user { id name } }").unwrap();
        let mut doc = doc;
        let root = doc.operations[0].selection_set;
        let copy = doc.copy_selection_set(root);
        assert_ne!(copy, root);
        let Selection::Field(original) = doc.selection_sets[root].selections[0] else {
            panic!("expected field");
        };
        let Selection::Field(copied) = doc.selection_sets[copy].selections[0] else {
            panic!("expected field");
        };
        assert_ne!(original, copied);
        assert_ne!(doc.fields[original].selection_set, doc.fields[copied].selection_set);
    }
}
