//! Loader cache tests
//!
//! Root-field and entity caching through the full engine, including
//! partial entity loads and header-scoped keys.

#[path = "testutils/mod.rs"]
mod testutils;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedlite::cache::CacheOperationKind;
use fedlite::{
    CacheEntry, CacheError, EntityCacheConfiguration, Headers, InMemoryLoaderCache, LoaderCache, Request,
    Resolver, ResolverBuilder, ResolverOptions, RootFieldCacheConfiguration,
    SubgraphCachingConfig,
};
use serde_json::json;
use testutils::mock_datasource::{representations, MockDataSource};
use testutils::test_fixture::{user_plan, users_plan, TestFixture};

const USERS_QUERY: &str = "{ users { id name email } }";
const USER_1: &str = r#"{"__typename":"User","id":"1","name":"Alice","email":"alice@example.com"}"#;
const USER_1_KEY: &str = r#"{"__typename":"User","keys":{"id":"1"}}"#;

fn accounts() -> Arc<MockDataSource> {
    MockDataSource::fixed(
        "accounts",
        r#"{"data":{"users":[{"__typename":"User","id":"1"},{"__typename":"User","id":"2"}]}}"#,
    )
}

fn profiles() -> Arc<MockDataSource> {
    MockDataSource::entities(
        "profiles",
        vec![
            json!({"__typename": "User", "id": "1", "name": "Alice", "email": "alice@example.com"}),
            json!({"__typename": "User", "id": "2", "name": "Bob", "email": null}),
        ],
    )
}

fn users_resolver(
    accounts: &Arc<MockDataSource>,
    profiles: &Arc<MockDataSource>,
    cache: &Arc<InMemoryLoaderCache>,
    caching: Vec<SubgraphCachingConfig>,
) -> ResolverBuilder {
    Resolver::builder(ResolverOptions::default())
        .data_source("accounts", accounts.clone())
        .data_source("profiles", profiles.clone())
        .cache("default", cache.clone())
        .subgraph_caching(caching)
}

fn entity_caching(config: EntityCacheConfiguration) -> Vec<SubgraphCachingConfig> {
    vec![SubgraphCachingConfig::new("profiles").with_entity(config)]
}

async fn seed_user_1(cache: &InMemoryLoaderCache) {
    cache
        .set(vec![CacheEntry::new(USER_1_KEY, USER_1)], Duration::ZERO)
        .await
        .unwrap();
    cache.clear_operations();
}

async fn uncached_response() -> String {
    let fixture = TestFixture::new(
        users_plan(),
        Resolver::builder(ResolverOptions::default())
            .data_source("accounts", accounts())
            .data_source("profiles", profiles()),
    );
    fixture.execute(USERS_QUERY).await.unwrap()
}

#[tokio::test]
async fn test_second_execution_is_served_from_cache() {
    let (accounts, profiles) = (accounts(), profiles());
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    let caching = vec![
        SubgraphCachingConfig::new("accounts").with_root_field(RootFieldCacheConfiguration::new(
            "Query",
            "users",
            "default",
            Duration::from_secs(30),
        )),
        SubgraphCachingConfig::new("profiles").with_entity(EntityCacheConfiguration::new(
            "User",
            "default",
            Duration::from_secs(30),
        )),
    ];
    let fixture = TestFixture::new(users_plan(), users_resolver(&accounts, &profiles, &cache, caching));

    let first = fixture.execute(USERS_QUERY).await.unwrap();
    assert_eq!(
        first,
        r#"{"data":{"users":[{"id":"1","name":"Alice","email":"alice@example.com"},{"id":"2","name":"Bob","email":null}]}}"#
    );
    assert_eq!((accounts.calls(), profiles.calls()), (1, 1));
    // One root field plus two entities
    assert_eq!(cache.len(), 3);

    let second = fixture.execute(USERS_QUERY).await.unwrap();
    assert_eq!(first, second);
    assert_eq!((accounts.calls(), profiles.calls()), (1, 1));
}

#[tokio::test]
async fn test_partial_load_fetches_only_misses() {
    let (accounts, profiles) = (accounts(), profiles());
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    seed_user_1(&cache).await;
    let caching = entity_caching(
        EntityCacheConfiguration::new("User", "default", Duration::from_secs(30)).with_partial_cache_load(),
    );
    let fixture = TestFixture::new(users_plan(), users_resolver(&accounts, &profiles, &cache, caching));

    let response = fixture.execute(USERS_QUERY).await.unwrap();
    let sent = representations(&profiles.last_body().unwrap());
    assert_eq!(sent, vec![json!({"__typename": "User", "id": "2"})]);
    assert_eq!(response, uncached_response().await);

    let sets: Vec<_> = cache
        .operations()
        .into_iter()
        .filter(|op| op.kind == CacheOperationKind::Set)
        .collect();
    assert_eq!(sets.len(), 1);
    assert_eq!(sets[0].keys, vec![r#"{"__typename":"User","keys":{"id":"2"}}"#.to_string()]);
}

#[tokio::test]
async fn test_without_partial_load_any_miss_fetches_everything() {
    let (accounts, profiles) = (accounts(), profiles());
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    seed_user_1(&cache).await;
    let caching = entity_caching(EntityCacheConfiguration::new("User", "default", Duration::from_secs(30)));
    let fixture = TestFixture::new(users_plan(), users_resolver(&accounts, &profiles, &cache, caching));

    let response = fixture.execute(USERS_QUERY).await.unwrap();
    assert_eq!(representations(&profiles.last_body().unwrap()).len(), 2);
    assert_eq!(response, uncached_response().await);

    let operations = cache.operations();
    assert_eq!(operations[0].kind, CacheOperationKind::Get);
    assert_eq!(operations[0].hits, vec![true, false]);
    let set = operations
        .iter()
        .find(|op| op.kind == CacheOperationKind::Set)
        .unwrap();
    assert_eq!(set.keys.len(), 2);
    assert_eq!(set.ttl, Some(Duration::from_secs(30)));
}

#[tokio::test]
async fn test_full_hit_skips_subgraph() {
    let (accounts, profiles) = (accounts(), profiles());
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    cache
        .set(
            vec![
                CacheEntry::new(USER_1_KEY, USER_1),
                CacheEntry::new(
                    r#"{"__typename":"User","keys":{"id":"2"}}"#,
                    r#"{"__typename":"User","id":"2","name":"Bob","email":null}"#,
                ),
            ],
            Duration::ZERO,
        )
        .await
        .unwrap();
    let caching = entity_caching(EntityCacheConfiguration::new("User", "default", Duration::from_secs(30)));
    let fixture = TestFixture::new(users_plan(), users_resolver(&accounts, &profiles, &cache, caching));

    let response = fixture.execute(USERS_QUERY).await.unwrap();
    assert_eq!(profiles.calls(), 0);
    assert_eq!(accounts.calls(), 1);
    assert_eq!(response, uncached_response().await);
}

#[tokio::test]
async fn test_get_returns_one_slot_per_key() {
    let cache = InMemoryLoaderCache::unbounded();
    seed_user_1(&cache).await;
    let keys = vec![
        USER_1_KEY.to_string(),
        "missing".to_string(),
        USER_1_KEY.to_string(),
    ];
    let entries = cache.get(&keys).await.unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[0].is_some());
    assert!(entries[1].is_none());
    assert_eq!(entries[2].as_ref().unwrap().value, USER_1.as_bytes());

    assert!(cache.get(&[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_header_prefix_scopes_root_field_cache() {
    let accounts = MockDataSource::fixed(
        "accounts",
        r#"{"data":{"user":{"id":"1","name":"Alice","email":null}}}"#,
    );
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    let fixture = TestFixture::new(
        user_plan(),
        Resolver::builder(ResolverOptions::default())
            .data_source("accounts", accounts.clone())
            .cache("default", cache.clone())
            .subgraph_caching(vec![SubgraphCachingConfig::new("accounts").with_root_field(
                RootFieldCacheConfiguration::new("Query", "user", "default", Duration::from_secs(30))
                    .with_header_prefix(),
            )]),
    );
    let query = "{ user { id name email } }";
    let as_user = |token: &str| {
        Request::new(query).with_headers(Headers::new().with("Authorization", format!("Bearer {}", token)))
    };

    fixture.execute_request(as_user("alice"), &[]).await.unwrap();
    fixture.execute_request(as_user("bob"), &[]).await.unwrap();
    assert_eq!(accounts.calls(), 2);

    fixture.execute_request(as_user("alice"), &[]).await.unwrap();
    assert_eq!(accounts.calls(), 2);
    assert_eq!(cache.len(), 2);
    assert!(cache
        .operations()
        .iter()
        .flat_map(|op| op.keys.iter())
        .all(|key| key.contains(":{\"__typename\":\"Query\"")));
}

#[tokio::test]
async fn test_root_field_arguments_are_part_of_the_key() {
    let accounts = MockDataSource::new("accounts", |body| {
        let id = body["variables"]["id"].as_str().unwrap_or("?").to_string();
        Ok(json!({"data": {"user": {"id": id, "name": "User", "email": null}}}).to_string())
    });
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    let fixture = TestFixture::new(
        testutils::test_fixture::user_by_id_plan(),
        Resolver::builder(ResolverOptions::default())
            .data_source("accounts", accounts.clone())
            .cache("default", cache.clone())
            .subgraph_caching(vec![SubgraphCachingConfig::new("accounts").with_root_field(
                RootFieldCacheConfiguration::new("Query", "user", "default", Duration::ZERO),
            )]),
    );

    let first = fixture.execute(r#"{ user(id: "1") { id name email } }"#).await.unwrap();
    let second = fixture.execute(r#"{ user(id: "2") { id name email } }"#).await.unwrap();
    assert!(first.contains(r#""id":"1""#));
    assert!(second.contains(r#""id":"2""#));
    assert_eq!(accounts.calls(), 2);

    fixture.execute(r#"{ user(id: "1") { id name email } }"#).await.unwrap();
    assert_eq!(accounts.calls(), 2);
    assert!(cache
        .peek(r#"{"__typename":"Query","field":"user","args":{"id":"1"}}"#)
        .is_some());
}

#[tokio::test]
async fn test_responses_with_errors_are_not_cached() {
    let accounts = MockDataSource::fixed(
        "accounts",
        r#"{"errors":[{"message":"partial outage"}],"data":{"user":{"id":"1","name":"Alice","email":null}}}"#,
    );
    let cache = Arc::new(InMemoryLoaderCache::unbounded().with_operation_log());
    let fixture = TestFixture::new(
        user_plan(),
        Resolver::builder(ResolverOptions::default())
            .data_source("accounts", accounts.clone())
            .cache("default", cache.clone())
            .subgraph_caching(vec![SubgraphCachingConfig::new("accounts").with_root_field(
                RootFieldCacheConfiguration::new("Query", "user", "default", Duration::from_secs(30)),
            )]),
    );

    fixture.execute("{ user { id name email } }").await.unwrap();
    fixture.execute("{ user { id name email } }").await.unwrap();
    assert_eq!(accounts.calls(), 2);
    assert!(cache.is_empty());
}

/// Backend that is down for every call
struct UnavailableCache;

#[async_trait]
impl LoaderCache for UnavailableCache {
    async fn get(&self, _keys: &[String]) -> Result<Vec<Option<CacheEntry>>, CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn set(&self, _entries: Vec<CacheEntry>, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".to_string()))
    }

    async fn delete(&self, _keys: &[String]) -> Result<(), CacheError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_unavailable_cache_falls_back_to_subgraphs() {
    let (accounts, profiles) = (accounts(), profiles());
    let fixture = TestFixture::new(
        users_plan(),
        Resolver::builder(ResolverOptions::default())
            .data_source("accounts", accounts.clone())
            .data_source("profiles", profiles.clone())
            .cache("default", Arc::new(UnavailableCache))
            .subgraph_caching(entity_caching(
                EntityCacheConfiguration::new("User", "default", Duration::from_secs(30))
                    .with_partial_cache_load(),
            )),
    );

    for expected_calls in 1..=2 {
        let response = fixture.execute(USERS_QUERY).await.unwrap();
        assert_eq!(response, uncached_response().await);
        assert_eq!(profiles.calls(), expected_calls);
    }
    assert_eq!(representations(&profiles.last_body().unwrap()).len(), 2);
}
