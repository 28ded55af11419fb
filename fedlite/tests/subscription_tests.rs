//! Subscription tests
//!
//! Blocking subscriptions driven through `execute` and multiplexed
//! subscriptions registered on the resolver's event loop.
//!
//! These tests poll background tasks with short deadlines, so they run
//! serially to keep timing stable.

#[path = "testutils/mod.rs"]
mod testutils;

use std::sync::Arc;

use fedlite::resolve::SubscriptionStats;
use fedlite::{
    BufferedResponseWriter, EngineError, Headers, Request, Resolver, ResolverOptions,
    SubscriptionIdentifier,
};
use serial_test::serial;
use testutils::mock_datasource::MockSubscriptionSource;
use testutils::test_fixture::{user_updated_plan, wait_until, TestFixture};
use tokio_util::sync::CancellationToken;

const SUBSCRIPTION: &str = "subscription { userUpdated { id name email } }";
const ALICE: &str = r#"{"data":{"userUpdated":{"id":"1","name":"Alice","email":null}}}"#;
const BOB: &str = r#"{"data":{"userUpdated":{"id":"2","name":"Bob","email":"bob@example.com"}}}"#;

fn fixture(source: &Arc<MockSubscriptionSource>) -> TestFixture {
    TestFixture::new(
        user_updated_plan(),
        Resolver::builder(ResolverOptions::default())
            .subscription_data_source("updates", source.clone()),
    )
}

async fn subscribe(
    fixture: &TestFixture,
    id: SubscriptionIdentifier,
    request: Request,
) -> Result<BufferedResponseWriter, EngineError> {
    let writer = BufferedResponseWriter::new();
    let mut request = request;
    fixture
        .engine
        .execute_async_subscription(
            CancellationToken::new(),
            &mut request,
            Box::new(writer.clone()),
            id,
            &[],
        )
        .await?;
    Ok(writer)
}

async fn stats(fixture: &TestFixture) -> SubscriptionStats {
    fixture.engine.resolver().subscription_stats().await.unwrap()
}

#[tokio::test]
#[serial]
async fn test_blocking_subscription_writes_each_event() {
    let source = MockSubscriptionSource::scripted(&[ALICE, BOB]);
    let fixture = fixture(&source);
    let writer = BufferedResponseWriter::new();
    let mut request = Request::new(SUBSCRIPTION);

    fixture
        .execute_into(&mut request, &mut writer.clone())
        .await
        .unwrap();

    assert_eq!(writer.messages(), vec![ALICE.to_string(), BOB.to_string()]);
    assert!(writer.is_completed());
    assert_eq!(source.starts(), 1);
}

#[tokio::test]
#[serial]
async fn test_blocking_subscription_stops_on_cancel() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let writer = BufferedResponseWriter::new();
    let cancel = CancellationToken::new();

    let run = async {
        let mut request = Request::new(SUBSCRIPTION);
        let mut sink = writer.clone();
        fixture
            .engine
            .execute(cancel.clone(), &mut request, &mut sink, &[])
            .await
    };
    let drive = async {
        assert!(wait_until(|| source.open_streams() == 1).await);
        source.emit(ALICE);
        assert!(wait_until(|| writer.messages().len() == 1).await);
        cancel.cancel();
    };
    let (result, _) = tokio::join!(run, drive);

    result.unwrap();
    assert_eq!(writer.messages(), vec![ALICE.to_string()]);
    assert!(writer.is_completed());
}

#[tokio::test]
#[serial]
async fn test_blocking_subscription_start_failure() {
    let source = MockSubscriptionSource::failing();
    let fixture = fixture(&source);
    let writer = BufferedResponseWriter::new();
    let mut request = Request::new(SUBSCRIPTION);

    let result = fixture.execute_into(&mut request, &mut writer.clone()).await;
    assert!(result.is_err());
    assert_eq!(
        writer.messages(),
        vec![r#"{"errors":[{"message":"unable to resolve"}]}"#.to_string()]
    );
    assert!(writer.is_completed());
}

#[tokio::test]
#[serial]
async fn test_subscriptions_share_one_trigger() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let first = subscribe(&fixture, SubscriptionIdentifier::new(1, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    let second = subscribe(&fixture, SubscriptionIdentifier::new(2, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();

    assert!(wait_until(|| source.open_streams() == 1).await);
    let current = stats(&fixture).await;
    assert_eq!((current.triggers, current.subscriptions), (1, 2));

    source.emit(BOB);
    assert!(wait_until(|| first.messages().len() == 1 && second.messages().len() == 1).await);
    assert_eq!(first.messages(), vec![BOB.to_string()]);
    assert_eq!(second.messages(), vec![BOB.to_string()]);
    assert_eq!(source.starts(), 1);
}

#[tokio::test]
#[serial]
async fn test_different_headers_use_separate_triggers() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    for (connection, token) in [(1, "alice"), (2, "bob")] {
        let request = Request::new(SUBSCRIPTION)
            .with_headers(Headers::new().with("Authorization", format!("Bearer {}", token)));
        subscribe(&fixture, SubscriptionIdentifier::new(connection, 1), request)
            .await
            .unwrap();
    }

    assert!(wait_until(|| source.starts() == 2).await);
    let current = stats(&fixture).await;
    assert_eq!((current.triggers, current.subscriptions), (2, 2));
}

#[tokio::test]
#[serial]
async fn test_unsubscribe_keeps_trigger_for_remaining_subscribers() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let first = subscribe(&fixture, SubscriptionIdentifier::new(1, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    let second = subscribe(&fixture, SubscriptionIdentifier::new(1, 2), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    assert!(wait_until(|| source.open_streams() == 1).await);

    let resolver = fixture.engine.resolver();
    resolver
        .async_unsubscribe_subscription(SubscriptionIdentifier::new(1, 1))
        .await
        .unwrap();
    assert!(wait_until(|| first.is_completed()).await);
    assert!(!second.is_completed());
    assert_eq!(source.open_streams(), 1);

    source.emit(ALICE);
    assert!(wait_until(|| second.messages().len() == 1).await);
    assert!(first.messages().is_empty());

    resolver
        .async_unsubscribe_subscription(SubscriptionIdentifier::new(1, 2))
        .await
        .unwrap();
    assert!(wait_until(|| second.is_completed()).await);
    // The last subscriber leaving stops the upstream stream
    assert!(wait_until(|| source.open_streams() == 0).await);
    let current = stats(&fixture).await;
    assert_eq!((current.triggers, current.subscriptions), (0, 0));
}

#[tokio::test]
#[serial]
async fn test_unsubscribe_client_removes_all_of_its_subscriptions() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let mut writers = Vec::new();
    for (connection, subscription) in [(7, 1), (7, 2), (8, 1)] {
        let writer = subscribe(
            &fixture,
            SubscriptionIdentifier::new(connection, subscription),
            Request::new(SUBSCRIPTION),
        )
        .await
        .unwrap();
        writers.push(writer);
    }
    assert!(wait_until(|| source.open_streams() == 1).await);

    fixture.engine.resolver().async_unsubscribe_client(7).await.unwrap();
    assert!(wait_until(|| writers[0].is_completed() && writers[1].is_completed()).await);
    assert!(!writers[2].is_completed());
    let current = stats(&fixture).await;
    assert_eq!(current.subscriptions, 1);
}

#[tokio::test]
#[serial]
async fn test_upstream_end_completes_subscribers() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let writer = subscribe(&fixture, SubscriptionIdentifier::new(1, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    assert!(wait_until(|| source.open_streams() == 1).await);

    source.emit(ALICE);
    assert!(wait_until(|| writer.messages().len() == 1).await);
    source.finish();
    assert!(wait_until(|| writer.is_completed()).await);
    let current = stats(&fixture).await;
    assert_eq!(current.triggers, 0);
}

#[tokio::test]
#[serial]
async fn test_failed_trigger_reports_error_to_subscribers() {
    let source = MockSubscriptionSource::failing();
    let fixture = fixture(&source);
    let writer = subscribe(&fixture, SubscriptionIdentifier::new(1, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();

    assert!(wait_until(|| writer.is_completed()).await);
    assert_eq!(
        writer.messages(),
        vec![r#"{"errors":[{"message":"unable to resolve"}]}"#.to_string()]
    );
}

#[tokio::test]
#[serial]
async fn test_shutdown_completes_every_writer() {
    let source = MockSubscriptionSource::new();
    let fixture = fixture(&source);
    let first = subscribe(&fixture, SubscriptionIdentifier::new(1, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    let second = subscribe(&fixture, SubscriptionIdentifier::new(2, 1), Request::new(SUBSCRIPTION))
        .await
        .unwrap();
    assert!(wait_until(|| source.open_streams() == 1).await);

    fixture.engine.resolver().shutdown();
    assert!(wait_until(|| first.is_completed() && second.is_completed()).await);
    assert!(wait_until(|| source.open_streams() == 0).await);

    // Nothing can be registered once the loop is gone
    let result = subscribe(&fixture, SubscriptionIdentifier::new(3, 1), Request::new(SUBSCRIPTION)).await;
    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn test_query_cannot_be_subscribed() {
    let source = MockSubscriptionSource::new();
    let fixture = TestFixture::new(
        testutils::test_fixture::user_plan(),
        Resolver::builder(ResolverOptions::default())
            .subscription_data_source("updates", source.clone()),
    );
    let result = subscribe(
        &fixture,
        SubscriptionIdentifier::new(1, 1),
        Request::new("{ user { id } }"),
    )
    .await;
    assert!(matches!(result, Err(EngineError::ExecutionNotPossible)));
    assert_eq!(source.starts(), 0);
}
