// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Composite schema model
//!
//! The engine only needs enough of the federated schema to normalize and
//! validate operations: type kinds, fields with their types and arguments,
//! abstract type membership and the root operation types. Schemas are built
//! in code with [`SchemaBuilder`].

use std::collections::{BTreeMap, HashMap};

use thiserror::Error;
use xxhash_rust::xxh64::Xxh64;

use crate::ast::{OperationType, TypeRef};

pub const BUILT_IN_SCALARS: [&str; 5] = ["String", "Int", "Float", "Boolean", "ID"];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Invalid type reference '{type_ref}' on {coordinate}")]
    InvalidTypeRef { coordinate: String, type_ref: String },

    #[error("Unknown type '{type_name}' referenced by {coordinate}")]
    UnknownType { coordinate: String, type_name: String },

    #[error("Type '{0}' is defined more than once")]
    DuplicateType(String),

    #[error("Unknown field '{0}'")]
    UnknownField(String),

    #[error("Schema has no query type '{0}'")]
    MissingQueryType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Scalar,
    Enum,
    InputObject,
}

impl TypeKind {
    pub fn is_composite(&self) -> bool {
        matches!(self, TypeKind::Object | TypeKind::Interface | TypeKind::Union)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, TypeKind::Scalar | TypeKind::Enum)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InputValueDefinition {
    pub name: String,
    pub type_ref: TypeRef,
    pub has_default: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDefinition {
    pub name: String,
    pub type_ref: TypeRef,
    pub arguments: Vec<InputValueDefinition>,
}

impl FieldDefinition {
    pub fn argument(&self, name: &str) -> Option<&InputValueDefinition> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    pub kind: TypeKind,
    pub fields: Vec<FieldDefinition>,
    /// Object types that belong to this interface or union
    pub possible_types: Vec<String>,
    pub enum_values: Vec<String>,
}

impl TypeDefinition {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            fields: Vec::new(),
            possible_types: Vec::new(),
            enum_values: Vec::new(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Immutable schema shared by the engine
#[derive(Debug, Clone)]
pub struct Schema {
    types: HashMap<String, TypeDefinition>,
    query_type: String,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
    hash: u64,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn type_definition(&self, name: &str) -> Option<&TypeDefinition> {
        self.types.get(name)
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Option<&FieldDefinition> {
        self.types.get(type_name)?.field(field_name)
    }

    pub fn root_type_name(&self, operation_type: OperationType) -> Option<&str> {
        match operation_type {
            OperationType::Query => Some(&self.query_type),
            OperationType::Mutation => self.mutation_type.as_deref(),
            OperationType::Subscription => self.subscription_type.as_deref(),
        }
    }

    pub fn is_abstract(&self, type_name: &str) -> bool {
        self.types
            .get(type_name)
            .map_or(false, |t| matches!(t.kind, TypeKind::Interface | TypeKind::Union))
    }

    /// Concrete object types a value of `type_name` may have at runtime
    pub fn possible_types(&self, type_name: &str) -> Vec<String> {
        match self.types.get(type_name) {
            Some(t) if t.kind == TypeKind::Object => vec![t.name.clone()],
            Some(t) => t.possible_types.clone(),
            None => Vec::new(),
        }
    }

    /// Whether a fragment on `condition` can apply inside `parent`
    pub fn types_overlap(&self, parent: &str, condition: &str) -> bool {
        if parent == condition {
            return true;
        }
        let parent_types = self.possible_types(parent);
        self.possible_types(condition)
            .iter()
            .any(|t| parent_types.contains(t))
    }

    /// Stable digest of the schema definitions
    pub fn hash(&self) -> u64 {
        self.hash
    }

    fn compute_hash(&self) -> u64 {
        let mut hasher = Xxh64::new(0);
        let sorted: BTreeMap<&String, &TypeDefinition> = self.types.iter().collect();
        for (name, definition) in sorted {
            hasher.update(name.as_bytes());
            hasher.update(format!("{:?}", definition.kind).as_bytes());
            for field in &definition.fields {
                hasher.update(field.name.as_bytes());
                hasher.update(field.type_ref.to_string().as_bytes());
                for argument in &field.arguments {
                    hasher.update(argument.name.as_bytes());
                    hasher.update(argument.type_ref.to_string().as_bytes());
                }
            }
            for possible in &definition.possible_types {
                hasher.update(possible.as_bytes());
            }
        }
        hasher.update(self.query_type.as_bytes());
        if let Some(mutation) = &self.mutation_type {
            hasher.update(mutation.as_bytes());
        }
        if let Some(subscription) = &self.subscription_type {
            hasher.update(subscription.as_bytes());
        }
        hasher.digest()
    }
}

/// Builder for [`Schema`]
///
/// Field and argument types are written in SDL notation, e.g. `"[User!]!"`.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    types: Vec<TypeDefinition>,
    pending_fields: Vec<(String, String, String)>,
    pending_arguments: Vec<(String, String, String, String, bool)>,
    query_type: Option<String>,
    mutation_type: Option<String>,
    subscription_type: Option<String>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(mut self, name: &str, fields: &[(&str, &str)]) -> Self {
        self.types.push(TypeDefinition::new(name, TypeKind::Object));
        self.push_fields(name, fields);
        self
    }

    pub fn interface(mut self, name: &str, fields: &[(&str, &str)], implementors: &[&str]) -> Self {
        let mut definition = TypeDefinition::new(name, TypeKind::Interface);
        definition.possible_types = implementors.iter().map(|s| s.to_string()).collect();
        self.types.push(definition);
        self.push_fields(name, fields);
        self
    }

    pub fn union(mut self, name: &str, members: &[&str]) -> Self {
        let mut definition = TypeDefinition::new(name, TypeKind::Union);
        definition.possible_types = members.iter().map(|s| s.to_string()).collect();
        self.types.push(definition);
        self
    }

    pub fn scalar(mut self, name: &str) -> Self {
        self.types.push(TypeDefinition::new(name, TypeKind::Scalar));
        self
    }

    pub fn enumeration(mut self, name: &str, values: &[&str]) -> Self {
        let mut definition = TypeDefinition::new(name, TypeKind::Enum);
        definition.enum_values = values.iter().map(|s| s.to_string()).collect();
        self.types.push(definition);
        self
    }

    pub fn input_object(mut self, name: &str) -> Self {
        self.types.push(TypeDefinition::new(name, TypeKind::InputObject));
        self
    }

    /// Declare an argument on an already declared field
    pub fn argument(mut self, type_name: &str, field_name: &str, name: &str, type_ref: &str) -> Self {
        self.pending_arguments.push((
            type_name.to_string(),
            field_name.to_string(),
            name.to_string(),
            type_ref.to_string(),
            false,
        ));
        self
    }

    /// Declare an argument that has a default value
    pub fn optional_argument(
        mut self,
        type_name: &str,
        field_name: &str,
        name: &str,
        type_ref: &str,
    ) -> Self {
        self.pending_arguments.push((
            type_name.to_string(),
            field_name.to_string(),
            name.to_string(),
            type_ref.to_string(),
            true,
        ));
        self
    }

    pub fn query_type(mut self, name: &str) -> Self {
        self.query_type = Some(name.to_string());
        self
    }

    pub fn mutation_type(mut self, name: &str) -> Self {
        self.mutation_type = Some(name.to_string());
        self
    }

    pub fn subscription_type(mut self, name: &str) -> Self {
        self.subscription_type = Some(name.to_string());
        self
    }

    /// Add `Query.__service` and the capability types it returns
    pub fn with_service_capabilities(self) -> Self {
        let query = self.query_type.clone().unwrap_or_else(|| "Query".to_string());
        let mut builder = self
            .object("_Service", &[("capabilities", "[_Capability!]!")])
            .object(
                "_Capability",
                &[
                    ("identifier", "String!"),
                    ("value", "String"),
                    ("description", "String"),
                ],
            );
        builder
            .pending_fields
            .push((query, "__service".to_string(), "_Service!".to_string()));
        builder
    }

    fn push_fields(&mut self, type_name: &str, fields: &[(&str, &str)]) {
        for (name, type_ref) in fields {
            self.pending_fields
                .push((type_name.to_string(), name.to_string(), type_ref.to_string()));
        }
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut types: HashMap<String, TypeDefinition> = HashMap::new();
        for scalar in BUILT_IN_SCALARS {
            types.insert(scalar.to_string(), TypeDefinition::new(scalar, TypeKind::Scalar));
        }
        for definition in self.types {
            if types.contains_key(&definition.name) && !BUILT_IN_SCALARS.contains(&definition.name.as_str()) {
                return Err(SchemaError::DuplicateType(definition.name));
            }
            types.insert(definition.name.clone(), definition);
        }

        for (type_name, field_name, type_spec) in self.pending_fields {
            let coordinate = format!("{}.{}", type_name, field_name);
            let type_ref = parse_type_ref(&coordinate, &type_spec)?;
            ensure_known(&types, &coordinate, type_ref.base_name())?;
            let owner = types.get_mut(&type_name).ok_or_else(|| SchemaError::UnknownType {
                coordinate: coordinate.clone(),
                type_name: type_name.clone(),
            })?;
            owner.fields.push(FieldDefinition {
                name: field_name,
                type_ref,
                arguments: Vec::new(),
            });
        }

        for (type_name, field_name, name, type_spec, has_default) in self.pending_arguments {
            let coordinate = format!("{}.{}({}:)", type_name, field_name, name);
            let type_ref = parse_type_ref(&coordinate, &type_spec)?;
            ensure_known(&types, &coordinate, type_ref.base_name())?;
            let field = types
                .get_mut(&type_name)
                .and_then(|t| t.fields.iter_mut().find(|f| f.name == field_name))
                .ok_or_else(|| SchemaError::UnknownField(format!("{}.{}", type_name, field_name)))?;
            field.arguments.push(InputValueDefinition {
                name,
                type_ref,
                has_default,
            });
        }

        for definition in types.values() {
            for possible in &definition.possible_types {
                ensure_known(&types, &definition.name, possible)?;
            }
        }

        let query_type = self.query_type.unwrap_or_else(|| "Query".to_string());
        if !types.contains_key(&query_type) {
            return Err(SchemaError::MissingQueryType(query_type));
        }
        let mutation_type = self
            .mutation_type
            .or_else(|| types.contains_key("Mutation").then(|| "Mutation".to_string()));
        let subscription_type = self
            .subscription_type
            .or_else(|| types.contains_key("Subscription").then(|| "Subscription".to_string()));

        let mut schema = Schema {
            types,
            query_type,
            mutation_type,
            subscription_type,
            hash: 0,
        };
        schema.hash = schema.compute_hash();
        Ok(schema)
    }
}

fn parse_type_ref(coordinate: &str, written: &str) -> Result<TypeRef, SchemaError> {
    TypeRef::parse(written).ok_or_else(|| SchemaError::InvalidTypeRef {
        coordinate: coordinate.to_string(),
        type_ref: written.to_string(),
    })
}

fn ensure_known(
    types: &HashMap<String, TypeDefinition>,
    coordinate: &str,
    type_name: &str,
) -> Result<(), SchemaError> {
    if types.contains_key(type_name) {
        Ok(())
    } else {
        Err(SchemaError::UnknownType {
            coordinate: coordinate.to_string(),
            type_name: type_name.to_string(),
        })
    }
}
