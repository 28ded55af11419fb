// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Response shape nodes
//!
//! A plan describes the client response as a tree of nodes. Each node knows
//! where to read its value in the merged subgraph data (`path`), whether
//! its schema type is nullable, and how to render it.

/// A node of the response tree
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Object(Object),
    Array(Array),
    String(Leaf),
    Boolean(Leaf),
    Integer(Leaf),
    Float(Leaf),
    /// Custom scalars, IDs and enums are passed through unchecked
    Scalar(Leaf),
    /// `__typename`, falling back to the enclosing object's type name
    Typename(Leaf),
}

impl Node {
    pub fn is_nullable(&self) -> bool {
        match self {
            Node::Object(o) => o.nullable,
            Node::Array(a) => a.nullable,
            Node::String(l)
            | Node::Boolean(l)
            | Node::Integer(l)
            | Node::Float(l)
            | Node::Scalar(l)
            | Node::Typename(l) => l.nullable,
        }
    }

    pub fn path(&self) -> &[String] {
        match self {
            Node::Object(o) => &o.path,
            Node::Array(a) => &a.path,
            Node::String(l)
            | Node::Boolean(l)
            | Node::Integer(l)
            | Node::Float(l)
            | Node::Scalar(l)
            | Node::Typename(l) => &l.path,
        }
    }
}

/// A leaf value read from `path`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Leaf {
    pub path: Vec<String>,
    pub nullable: bool,
}

impl Leaf {
    pub fn new(path: &str, nullable: bool) -> Self {
        Self {
            path: vec![path.to_string()],
            nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Object {
    pub path: Vec<String>,
    pub nullable: bool,
    pub type_name: String,
    pub fields: Vec<Field>,
}

impl Object {
    pub fn new(path: &str, nullable: bool, type_name: &str) -> Self {
        Self {
            path: if path.is_empty() {
                Vec::new()
            } else {
                vec![path.to_string()]
            },
            nullable,
            type_name: type_name.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    pub path: Vec<String>,
    pub nullable: bool,
    pub item: Box<Node>,
}

impl Array {
    pub fn new(path: &str, nullable: bool, item: Node) -> Self {
        Self {
            path: vec![path.to_string()],
            nullable,
            item: Box::new(item),
        }
    }
}

/// Schema coordinate used in error messages, e.g. `User.name`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldInfo {
    pub name: String,
    pub parent_type_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Response key
    pub name: String,
    pub value: Node,
    pub info: FieldInfo,
    pub skip_variable: Option<String>,
    pub include_variable: Option<String>,
    /// Render only when the enclosing object's `__typename` is one of these
    pub on_type_names: Vec<String>,
}

impl Field {
    pub fn new(name: &str, parent_type_name: &str, value: Node) -> Self {
        Self {
            name: name.to_string(),
            value,
            info: FieldInfo {
                name: name.to_string(),
                parent_type_name: parent_type_name.to_string(),
            },
            skip_variable: None,
            include_variable: None,
            on_type_names: Vec::new(),
        }
    }

    /// Use a schema field name that differs from the response key
    pub fn with_schema_name(mut self, name: &str) -> Self {
        self.info.name = name.to_string();
        self
    }

    pub fn skip_if(mut self, variable: &str) -> Self {
        self.skip_variable = Some(variable.to_string());
        self
    }

    pub fn include_if(mut self, variable: &str) -> Self {
        self.include_variable = Some(variable.to_string());
        self
    }

    pub fn on_types(mut self, type_names: &[&str]) -> Self {
        self.on_type_names = type_names.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn coordinate(&self) -> String {
        format!("{}.{}", self.info.parent_type_name, self.info.name)
    }
}
