// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Fetch tree of a plan
//!
//! Fetches reference their data source by id. The resolver owns the data
//! source registry, so plans stay plain data that can be compared, cached
//! and shared between threads.

use serde_json::{Map, Value as Json};

use crate::ast::OperationType;

/// Execution order of fetches
#[derive(Debug, Clone, PartialEq)]
pub enum FetchTreeNode {
    Single(FetchItem),
    /// Children run one after another, each seeing the data merged by the previous
    Sequence(Vec<FetchTreeNode>),
    /// Children have no data dependency between them and run concurrently
    Parallel(Vec<FetchTreeNode>),
}

impl FetchTreeNode {
    pub fn single(item: FetchItem) -> Self {
        FetchTreeNode::Single(item)
    }

    pub fn sequence(children: Vec<FetchTreeNode>) -> Self {
        FetchTreeNode::Sequence(children)
    }

    pub fn parallel(children: Vec<FetchTreeNode>) -> Self {
        FetchTreeNode::Parallel(children)
    }

    pub fn empty() -> Self {
        FetchTreeNode::Sequence(Vec::new())
    }

    /// Every fetch in execution order
    pub fn items(&self) -> Vec<&FetchItem> {
        let mut out = Vec::new();
        self.collect_items(&mut out);
        out
    }

    fn collect_items<'a>(&'a self, out: &mut Vec<&'a FetchItem>) {
        match self {
            FetchTreeNode::Single(item) => out.push(item),
            FetchTreeNode::Sequence(children) | FetchTreeNode::Parallel(children) => {
                for child in children {
                    child.collect_items(out);
                }
            }
        }
    }
}

/// One fetch plus where in the response its items live
#[derive(Debug, Clone, PartialEq)]
pub struct FetchItem {
    pub fetch: Fetch,
    /// Path from the response root to the objects this fetch populates
    pub fetch_path: Vec<FetchPathElement>,
    /// Human-readable path used in error messages, e.g. `query.user.reviews`
    pub response_path: String,
}

impl FetchItem {
    pub fn root(fetch: Fetch) -> Self {
        Self {
            fetch,
            fetch_path: Vec::new(),
            response_path: String::new(),
        }
    }

    pub fn at(fetch: Fetch, fetch_path: Vec<FetchPathElement>) -> Self {
        let response_path = std::iter::once("query".to_string())
            .chain(fetch_path.iter().map(|e| e.name().to_string()))
            .collect::<Vec<_>>()
            .join(".");
        Self {
            fetch,
            fetch_path,
            response_path,
        }
    }

    /// Set the planner's id for this fetch and the ids it waits for
    pub fn with_dependencies(mut self, fetch_id: usize, depends_on: &[usize]) -> Self {
        let dependencies = self.fetch.dependencies_mut();
        dependencies.fetch_id = fetch_id;
        dependencies.depends_on = depends_on.to_vec();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchPathElement {
    /// Step into an object field
    Object(String),
    /// Step into a list field and continue with every item
    Array(String),
}

impl FetchPathElement {
    pub fn name(&self) -> &str {
        match self {
            FetchPathElement::Object(name) | FetchPathElement::Array(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fetch {
    Single(SingleFetch),
    Entity(EntityFetch),
}

impl Fetch {
    pub fn dependencies(&self) -> &FetchDependencies {
        match self {
            Fetch::Single(f) => &f.dependencies,
            Fetch::Entity(f) => &f.dependencies,
        }
    }

    pub fn dependencies_mut(&mut self) -> &mut FetchDependencies {
        match self {
            Fetch::Single(f) => &mut f.dependencies,
            Fetch::Entity(f) => &mut f.dependencies,
        }
    }

    pub fn info(&self) -> &FetchInfo {
        match self {
            Fetch::Single(f) => &f.info,
            Fetch::Entity(f) => &f.info,
        }
    }

    pub fn post_processing(&self) -> &PostProcessing {
        match self {
            Fetch::Single(f) => &f.post_processing,
            Fetch::Entity(f) => &f.post_processing,
        }
    }

    /// Whether both fetches send the same request, ignoring fetch ids
    pub fn same_request(&self, other: &Fetch) -> bool {
        match (self, other) {
            (Fetch::Single(a), Fetch::Single(b)) => {
                a.info == b.info && a.input == b.input && a.post_processing == b.post_processing
            }
            (Fetch::Entity(a), Fetch::Entity(b)) => {
                a.info == b.info
                    && a.input == b.input
                    && a.representation == b.representation
                    && a.post_processing == b.post_processing
            }
            _ => false,
        }
    }
}

/// Planner-assigned id of a fetch and the fetches whose data it reads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchDependencies {
    pub fetch_id: usize,
    pub depends_on: Vec<usize>,
}

/// Describes which subgraph a fetch targets and what it populates
#[derive(Debug, Clone, PartialEq)]
pub struct FetchInfo {
    pub data_source_id: String,
    pub data_source_name: String,
    pub operation_type: OperationType,
    pub root_fields: Vec<RootField>,
}

impl FetchInfo {
    pub fn new(data_source_id: &str, data_source_name: &str) -> Self {
        Self {
            data_source_id: data_source_id.to_string(),
            data_source_name: data_source_name.to_string(),
            operation_type: OperationType::Query,
            root_fields: Vec::new(),
        }
    }

    pub fn with_root_field(mut self, root_field: RootField) -> Self {
        self.root_fields.push(root_field);
        self
    }
}

/// A root field a fetch resolves, with the arguments that identify it
#[derive(Debug, Clone, PartialEq)]
pub struct RootField {
    pub type_name: String,
    pub field_name: String,
    /// Key of the field in the subgraph response
    pub response_key: String,
    pub arguments: Vec<TemplateVariable>,
}

impl RootField {
    pub fn new(type_name: &str, field_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            field_name: field_name.to_string(),
            response_key: field_name.to_string(),
            arguments: Vec::new(),
        }
    }

    pub fn with_argument(mut self, name: &str, source: VariableSource) -> Self {
        self.arguments.push(TemplateVariable {
            name: name.to_string(),
            source,
        });
        self
    }

    pub fn render_arguments(&self, variables: &Json) -> Map<String, Json> {
        self.arguments
            .iter()
            .map(|a| (a.name.clone(), a.source.render(variables)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SingleFetch {
    pub dependencies: FetchDependencies,
    pub info: FetchInfo,
    pub input: InputTemplate,
    pub post_processing: PostProcessing,
}

impl SingleFetch {
    pub fn new(info: FetchInfo, input: InputTemplate) -> Self {
        Self {
            dependencies: FetchDependencies::default(),
            info,
            input,
            post_processing: PostProcessing::root(),
        }
    }
}

/// Batched `_entities` fetch
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFetch {
    pub dependencies: FetchDependencies,
    pub info: FetchInfo,
    pub input: InputTemplate,
    pub representation: RepresentationTemplate,
    pub post_processing: PostProcessing,
}

impl EntityFetch {
    pub fn new(info: FetchInfo, input: InputTemplate, representation: RepresentationTemplate) -> Self {
        Self {
            dependencies: FetchDependencies::default(),
            info,
            input,
            representation,
            post_processing: PostProcessing::entities(),
        }
    }
}

/// Builds one representation from a parent object
#[derive(Debug, Clone, PartialEq)]
pub struct RepresentationTemplate {
    /// Entity type, used when the object carries no `__typename`
    pub type_name: String,
    /// Primary key fields, used for cache keys and for matching results
    pub key_fields: Vec<String>,
    /// Additional fields the owning subgraph needs
    pub required_fields: Vec<String>,
}

impl RepresentationTemplate {
    pub fn new(type_name: &str, key_fields: &[&str]) -> Self {
        Self {
            type_name: type_name.to_string(),
            key_fields: key_fields.iter().map(|k| k.to_string()).collect(),
            required_fields: Vec::new(),
        }
    }

    /// Render the representation for `item`, or `None` when a key is missing
    pub fn render(&self, item: &Json) -> Option<Json> {
        let object = item.as_object()?;
        let type_name = object
            .get("__typename")
            .and_then(Json::as_str)
            .unwrap_or(&self.type_name);
        let mut representation = Map::new();
        representation.insert("__typename".to_string(), Json::String(type_name.to_string()));
        for key in &self.key_fields {
            match object.get(key) {
                Some(value) if !value.is_null() => {
                    representation.insert(key.clone(), value.clone());
                }
                _ => return None,
            }
        }
        for field in &self.required_fields {
            if let Some(value) = object.get(field) {
                representation.insert(field.clone(), value.clone());
            }
        }
        Some(Json::Object(representation))
    }

    /// Key values of an object, in key field order
    pub fn key_values(&self, object: &Json) -> Option<Vec<Json>> {
        self.key_fields
            .iter()
            .map(|key| object.get(key).filter(|v| !v.is_null()).cloned())
            .collect()
    }
}

/// Request body sent to a subgraph
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InputTemplate {
    pub query: String,
    pub variables: Vec<TemplateVariable>,
}

impl InputTemplate {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, name: &str, source: VariableSource) -> Self {
        self.variables.push(TemplateVariable {
            name: name.to_string(),
            source,
        });
        self
    }

    /// Render the body; entity fetches pass their representations
    pub fn render(&self, variables: &Json, representations: Option<Vec<Json>>) -> Json {
        let mut rendered = Map::new();
        for variable in &self.variables {
            rendered.insert(variable.name.clone(), variable.source.render(variables));
        }
        if let Some(representations) = representations {
            rendered.insert("representations".to_string(), Json::Array(representations));
        }
        let mut body = Map::new();
        body.insert("query".to_string(), Json::String(self.query.clone()));
        if !rendered.is_empty() {
            body.insert("variables".to_string(), Json::Object(rendered));
        }
        Json::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateVariable {
    pub name: String,
    pub source: VariableSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VariableSource {
    /// Path into the request variables
    Context(Vec<String>),
    Static(Json),
}

impl VariableSource {
    pub fn context(name: &str) -> Self {
        VariableSource::Context(vec![name.to_string()])
    }

    pub fn render(&self, variables: &Json) -> Json {
        match self {
            VariableSource::Context(path) => path
                .iter()
                .try_fold(variables, |current, key| current.get(key))
                .cloned()
                .unwrap_or(Json::Null),
            VariableSource::Static(value) => value.clone(),
        }
    }
}

/// Where to find data and errors in a subgraph response and where to merge them
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PostProcessing {
    pub select_response_data_path: Vec<String>,
    pub select_response_errors_path: Vec<String>,
    /// Relative to each fetched item
    pub merge_path: Vec<String>,
}

impl PostProcessing {
    pub fn root() -> Self {
        Self {
            select_response_data_path: vec!["data".to_string()],
            select_response_errors_path: vec!["errors".to_string()],
            merge_path: Vec::new(),
        }
    }

    pub fn entities() -> Self {
        Self {
            select_response_data_path: vec!["data".to_string(), "_entities".to_string()],
            select_response_errors_path: vec!["errors".to_string()],
            merge_path: Vec::new(),
        }
    }
}
