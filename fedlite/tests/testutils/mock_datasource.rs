//! Scripted data sources for integration tests
//!
//! Every mock records the request bodies it received so tests can assert
//! on exactly what was sent upstream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fedlite::resolve::{DataSource, SubscriptionDataSource, SubscriptionStream};
use fedlite::{Headers, ResolveError};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

type Handler = Box<dyn Fn(&Value) -> Result<String, ResolveError> + Send + Sync>;

/// A subgraph answering each request through a handler
pub struct MockDataSource {
    name: String,
    handler: Handler,
    delay: Option<Duration>,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
    headers: Mutex<Vec<Headers>>,
}

impl MockDataSource {
    pub fn new(
        name: &str,
        handler: impl Fn(&Value) -> Result<String, ResolveError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            handler: Box::new(handler),
            delay: None,
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            headers: Mutex::new(Vec::new()),
        })
    }

    /// Always answer with `response`
    pub fn fixed(name: &str, response: &str) -> Arc<Self> {
        let response = response.to_string();
        Self::new(name, move |_| Ok(response.clone()))
    }

    /// Always fail as if the subgraph were unreachable
    pub fn failing(name: &str) -> Arc<Self> {
        let subgraph = name.to_string();
        Self::new(name, move |_| {
            Err(ResolveError::DataSource {
                subgraph: subgraph.clone(),
                reason: "connection refused".to_string(),
            })
        })
    }

    /// Answer `_entities` requests from `records`, keyed by the `id` of each representation
    pub fn entities(name: &str, records: Vec<Value>) -> Arc<Self> {
        let by_id: HashMap<String, Value> = records
            .into_iter()
            .filter_map(|r| Some((r.get("id")?.as_str()?.to_string(), r)))
            .collect();
        Self::new(name, move |body| {
            let entities: Vec<Value> = representations(body)
                .iter()
                .map(|r| {
                    r.get("id")
                        .and_then(Value::as_str)
                        .and_then(|id| by_id.get(id))
                        .cloned()
                        .unwrap_or(Value::Null)
                })
                .collect();
            Ok(json!({ "data": { "_entities": entities } }).to_string())
        })
    }

    pub fn with_delay(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        let mut source = Arc::try_unwrap(self).unwrap_or_else(|_| panic!("mock already shared"));
        source.delay = Some(delay);
        Arc::new(source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn bodies(&self) -> Vec<Value> {
        self.bodies.lock().clone()
    }

    pub fn last_body(&self) -> Option<Value> {
        self.bodies.lock().last().cloned()
    }

    pub fn received_headers(&self) -> Vec<Headers> {
        self.headers.lock().clone()
    }
}

/// Representations sent in an `_entities` request body
pub fn representations(body: &Value) -> Vec<Value> {
    body["variables"]["representations"]
        .as_array()
        .cloned()
        .unwrap_or_default()
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn load(&self, headers: &Headers, input: &[u8]) -> Result<Vec<u8>, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let body: Value = serde_json::from_slice(input)
            .map_err(|e| ResolveError::InvalidResponse(e.to_string()))?;
        self.bodies.lock().push(body.clone());
        self.headers.lock().push(headers.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.handler)(&body).map(String::into_bytes)
    }
}

type EventSender = mpsc::UnboundedSender<Result<Vec<u8>, ResolveError>>;

/// A subscription upstream driven by the test
///
/// Events pushed with [`MockSubscriptionSource::emit`] reach every stream
/// started so far.
#[derive(Default)]
pub struct MockSubscriptionSource {
    starts: AtomicUsize,
    streams: Mutex<Vec<EventSender>>,
    scripted: Mutex<Option<Vec<String>>>,
    fail_start: bool,
}

impl MockSubscriptionSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every stream yields `events` and then ends
    pub fn scripted(events: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            scripted: Mutex::new(Some(events.iter().map(|e| e.to_string()).collect())),
            ..Default::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_start: true,
            ..Default::default()
        })
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Streams whose consumer is still attached
    pub fn open_streams(&self) -> usize {
        self.streams.lock().iter().filter(|s| !s.is_closed()).count()
    }

    pub fn emit(&self, event: &str) {
        for stream in self.streams.lock().iter() {
            let _ = stream.send(Ok(event.as_bytes().to_vec()));
        }
    }

    /// End every open stream
    pub fn finish(&self) {
        self.streams.lock().clear();
    }
}

#[async_trait]
impl SubscriptionDataSource for MockSubscriptionSource {
    async fn start(&self, _headers: &Headers, _input: &[u8]) -> Result<SubscriptionStream, ResolveError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start {
            return Err(ResolveError::Subscription("upstream refused".to_string()));
        }
        if let Some(events) = self.scripted.lock().clone() {
            let events: Vec<Result<Vec<u8>, ResolveError>> =
                events.into_iter().map(|e| Ok(e.into_bytes())).collect();
            return Ok(futures::stream::iter(events).boxed());
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        self.streams.lock().push(sender);
        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|event| (event, receiver))
        });
        Ok(stream.boxed())
    }
}
