//! Fixture engine for integration tests
//!
//! Builds a small federated graph:
//! - `accounts` resolves `Query.user`, `Query.me` and `Query.users`
//! - `profiles` resolves `User.name` and `User.email` through `_entities`
//!
//! The planner is a static map from the printed operation's root field to a
//! prebuilt plan, so tests control exactly which fetches run.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fedlite::ast::Document;
use fedlite::plan::{GraphQLResponse, SubscriptionTrigger};
use fedlite::resolve::fetch::{
    EntityFetch, Fetch, FetchInfo, FetchItem, FetchPathElement, FetchTreeNode, InputTemplate,
    PostProcessing, RepresentationTemplate, RootField, SingleFetch, VariableSource,
};
use fedlite::resolve::node::{Array, Field, Leaf, Node, Object};
use fedlite::{
    EngineError, EngineSettings, ExecutionEngine, ExecutionOption, OperationReport, Plan, Planner,
    Request, ResolverBuilder, ResponseWriter, Schema,
};
use tokio_util::sync::CancellationToken;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn user_schema() -> Schema {
    Schema::builder()
        .object(
            "Query",
            &[("user", "User"), ("me", "User"), ("users", "[User!]")],
        )
        .optional_argument("Query", "user", "id", "ID")
        .object(
            "User",
            &[
                ("id", "ID!"),
                ("name", "String!"),
                ("email", "String"),
            ],
        )
        .object("Subscription", &[("userUpdated", "User")])
        .with_service_capabilities()
        .build()
        .expect("fixture schema is valid")
}

fn user_object(path: &str, nullable: bool) -> Object {
    Object::new(path, nullable, "User")
        .with_field(Field::new("id", "User", Node::Scalar(Leaf::new("id", false))))
        .with_field(Field::new("name", "User", Node::String(Leaf::new("name", false))))
        .with_field(Field::new("email", "User", Node::String(Leaf::new("email", true))))
}

fn root_fetch(source: &str, field: &str, query: &str) -> FetchItem {
    FetchItem::root(Fetch::Single(SingleFetch::new(
        FetchInfo::new(source, source).with_root_field(RootField::new("Query", field)),
        InputTemplate::new(query),
    )))
}

/// `{ user { id name email } }` answered by `accounts` alone
pub fn user_plan() -> Plan {
    let fetches = FetchTreeNode::single(root_fetch(
        "accounts",
        "user",
        "{user{id name email}}",
    ));
    let data = Object::new("", false, "Query")
        .with_field(Field::new("user", "Query", Node::Object(user_object("user", true))));
    Plan::synchronous(GraphQLResponse::new(fetches, data))
}

/// `{ user(id: $a) { id name email } }` with the id forwarded to `accounts`
pub fn user_by_id_plan() -> Plan {
    let fetch = SingleFetch::new(
        FetchInfo::new("accounts", "accounts").with_root_field(
            RootField::new("Query", "user").with_argument("id", VariableSource::context("a")),
        ),
        InputTemplate::new("query($id: ID){user(id: $id){id name email}}")
            .with_variable("id", VariableSource::context("a")),
    );
    let data = Object::new("", false, "Query")
        .with_field(Field::new("user", "Query", Node::Object(user_object("user", true))));
    Plan::synchronous(GraphQLResponse::new(
        FetchTreeNode::single(FetchItem::root(Fetch::Single(fetch))),
        data,
    ))
}

/// `{ users { id name email } }`: ids from `accounts`, the rest from `profiles`
pub fn users_plan() -> Plan {
    let entities = EntityFetch::new(
        FetchInfo::new("profiles", "profiles"),
        InputTemplate::new(
            "query($representations: [_Any!]!){_entities(representations: $representations){... on User{__typename id name email}}}",
        ),
        RepresentationTemplate::new("User", &["id"]),
    );
    let fetches = FetchTreeNode::sequence(vec![
        FetchTreeNode::single(root_fetch("accounts", "users", "{users{__typename id}}")),
        FetchTreeNode::single(FetchItem::at(
            Fetch::Entity(entities),
            vec![FetchPathElement::Array("users".to_string())],
        )),
    ]);
    let data = Object::new("", false, "Query").with_field(Field::new(
        "users",
        "Query",
        Node::Array(Array::new("users", true, Node::Object(user_object("", false)))),
    ));
    Plan::synchronous(GraphQLResponse::new(fetches, data))
}

/// `{ users { id name email } me { id } }` with planner-declared dependencies
///
/// The planner lists the fetches in one sequence; only the `profiles` fetch
/// reads another fetch's data.
pub fn users_and_me_plan() -> Plan {
    let entities = EntityFetch::new(
        FetchInfo::new("profiles", "profiles"),
        InputTemplate::new(
            "query($representations: [_Any!]!){_entities(representations: $representations){... on User{__typename id name email}}}",
        ),
        RepresentationTemplate::new("User", &["id"]),
    );
    let fetches = FetchTreeNode::sequence(vec![
        FetchTreeNode::single(
            root_fetch("accounts", "users", "{users{__typename id}}").with_dependencies(0, &[]),
        ),
        FetchTreeNode::single(root_fetch("sessions", "me", "{me{id}}").with_dependencies(1, &[])),
        FetchTreeNode::single(
            FetchItem::at(
                Fetch::Entity(entities),
                vec![FetchPathElement::Array("users".to_string())],
            )
            .with_dependencies(2, &[0]),
        ),
    ]);
    let me = Object::new("me", true, "User")
        .with_field(Field::new("id", "User", Node::Scalar(Leaf::new("id", false))));
    let data = Object::new("", false, "Query")
        .with_field(Field::new(
            "users",
            "Query",
            Node::Array(Array::new("users", true, Node::Object(user_object("", false)))),
        ))
        .with_field(Field::new("me", "Query", Node::Object(me)));
    Plan::synchronous(GraphQLResponse::new(fetches, data))
}

/// `{ user { id } me { id } }` with both root fields fetched concurrently
pub fn parallel_plan() -> Plan {
    let fetches = FetchTreeNode::parallel(vec![
        FetchTreeNode::single(root_fetch("accounts", "user", "{user{id}}")),
        FetchTreeNode::single(root_fetch("sessions", "me", "{me{id}}")),
    ]);
    let id_only = |path: &str| {
        Object::new(path, true, "User")
            .with_field(Field::new("id", "User", Node::Scalar(Leaf::new("id", false))))
    };
    let data = Object::new("", false, "Query")
        .with_field(Field::new("user", "Query", Node::Object(id_only("user"))))
        .with_field(Field::new("me", "Query", Node::Object(id_only("me"))));
    Plan::synchronous(GraphQLResponse::new(fetches, data))
}

/// `{ __service { capabilities { identifier value description } } }`
pub fn service_plan() -> Plan {
    let capability = Object::new("", false, "_Capability")
        .with_field(Field::new("identifier", "_Capability", Node::String(Leaf::new("identifier", false))))
        .with_field(Field::new("value", "_Capability", Node::String(Leaf::new("value", true))))
        .with_field(Field::new("description", "_Capability", Node::String(Leaf::new("description", true))));
    let service = Object::new("__service", false, "_Service").with_field(Field::new(
        "capabilities",
        "_Service",
        Node::Array(Array::new("capabilities", false, Node::Object(capability))),
    ));
    let data = Object::new("", false, "Query")
        .with_field(Field::new("__service", "Query", Node::Object(service)));
    let fetches = FetchTreeNode::single(root_fetch(
        "service",
        "__service",
        "{__service{capabilities{identifier value description}}}",
    ));
    Plan::synchronous(GraphQLResponse::new(fetches, data))
}

/// `subscription { userUpdated { id name email } }` driven by `updates`
pub fn user_updated_plan() -> Plan {
    let trigger = SubscriptionTrigger {
        data_source_id: "updates".to_string(),
        data_source_name: "updates".to_string(),
        input: InputTemplate::new("subscription{userUpdated{id name email}}"),
        post_processing: PostProcessing::root(),
    };
    let data = Object::new("", false, "Subscription").with_field(Field::new(
        "userUpdated",
        "Subscription",
        Node::Object(user_object("userUpdated", true)),
    ));
    Plan::subscription(
        trigger,
        GraphQLResponse::new(FetchTreeNode::empty(), data),
    )
}

/// Planner returning one fixed plan and counting how often it ran
#[derive(Clone)]
pub struct StaticPlanner {
    plan: Result<Plan, String>,
    calls: Arc<AtomicUsize>,
}

impl StaticPlanner {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan: Ok(plan),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            plan: Err(message.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Planner for StaticPlanner {
    fn plan(
        &mut self,
        _operation: &Document,
        _schema: &Schema,
        _operation_name: Option<&str>,
    ) -> Result<Plan, OperationReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.plan.clone().map_err(OperationReport::from_message)
    }
}

/// Engine plus the planner handle used to observe planning
pub struct TestFixture {
    pub engine: ExecutionEngine,
    pub planner: StaticPlanner,
}

impl TestFixture {
    pub fn new(plan: Plan, resolver: ResolverBuilder) -> Self {
        Self::with_settings(plan, resolver, EngineSettings::default())
    }

    pub fn with_settings(plan: Plan, resolver: ResolverBuilder, settings: EngineSettings) -> Self {
        init_logging();
        Self::with_planner(StaticPlanner::new(plan), resolver, settings)
    }

    pub fn with_planner(planner: StaticPlanner, resolver: ResolverBuilder, settings: EngineSettings) -> Self {
        init_logging();
        let resolver = resolver.build().expect("fixture resolver is valid");
        let engine = ExecutionEngine::new(user_schema(), Box::new(planner.clone()), resolver, settings)
            .expect("fixture engine is valid");
        Self { engine, planner }
    }

    /// Execute `request` and return the written response
    pub async fn execute_request(
        &self,
        mut request: Request,
        options: &[ExecutionOption],
    ) -> Result<String, EngineError> {
        let mut out: Vec<u8> = Vec::new();
        self.engine
            .execute(CancellationToken::new(), &mut request, &mut out, options)
            .await?;
        Ok(String::from_utf8(out).expect("responses are utf-8"))
    }

    pub async fn execute(&self, query: &str) -> Result<String, EngineError> {
        self.execute_request(Request::new(query), &[]).await
    }

    /// Like [`TestFixture::execute`] but panics with the engine error
    pub async fn assert_response(&self, query: &str, expected: &str) {
        match self.execute(query).await {
            Ok(response) => assert_eq!(response, expected, "query: {}", query),
            Err(e) => panic!("query {} failed: {}", query, e),
        }
    }

    pub async fn execute_into(
        &self,
        request: &mut Request,
        writer: &mut dyn ResponseWriter,
    ) -> Result<(), EngineError> {
        self.engine
            .execute(CancellationToken::new(), request, writer, &[])
            .await
    }
}

/// Poll `condition` until it holds or a second passes
pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
