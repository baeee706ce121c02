//! End-to-end distribution tests
//!
//! Events go through the real pipeline: Publisher → MemoryLog → Distributor →
//! WebhookEmitter → an axum sink that answers with scripted status codes.

use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
};
use netbox_distributor::{
    Backoff, ConsumerOptions, Destination, Distributor, MemoryLog, Publisher, PublisherConfig,
    RunningDistributor, SubjectScheme, WebhookEmitter, WebhookEvent,
    log::{DurableLog, StreamConfig},
};
use parking_lot::Mutex;
use prometheus::Registry;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Test Sink
// ============================================================================

/// HTTP destination that records bodies and answers from a per-path script
#[derive(Clone, Default)]
struct Sink {
    received: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
    script: Arc<Mutex<HashMap<String, VecDeque<u16>>>>,
    fallback: Arc<Mutex<HashMap<String, u16>>>,
}

impl Sink {
    async fn start(&self) -> SocketAddr {
        let app = Router::new()
            .route("/{dest}", post(sink_handler))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    /// Answer the next requests on `dest` with `statuses`, in order
    fn script(&self, dest: &str, statuses: impl IntoIterator<Item = u16>) {
        self.script
            .lock()
            .entry(dest.to_string())
            .or_default()
            .extend(statuses);
    }

    /// Answer on `dest` once the script is used up
    fn always(&self, dest: &str, status: u16) {
        self.fallback.lock().insert(dest.to_string(), status);
    }

    fn calls(&self, dest: &str) -> usize {
        self.calls.lock().get(dest).copied().unwrap_or(0)
    }

    fn received(&self, dest: &str) -> Vec<Value> {
        self.received.lock().get(dest).cloned().unwrap_or_default()
    }
}

async fn sink_handler(
    State(sink): State<Sink>,
    Path(dest): Path<String>,
    body: Bytes,
) -> StatusCode {
    *sink.calls.lock().entry(dest.clone()).or_default() += 1;

    let scripted = sink
        .script
        .lock()
        .get_mut(&dest)
        .and_then(VecDeque::pop_front);
    let status = scripted
        .or_else(|| sink.fallback.lock().get(&dest).copied())
        .unwrap_or(200);

    if status == 200 {
        let value: Value = serde_json::from_slice(&body).unwrap();
        sink.received.lock().entry(dest).or_default().push(value);
    }
    StatusCode::from_u16(status).unwrap()
}

// ============================================================================
// Harness
// ============================================================================

struct Pipeline {
    log: MemoryLog,
    publisher: Publisher,
    running: RunningDistributor,
    shutdown: CancellationToken,
}

fn fast_backoff(steps: u32) -> Backoff {
    Backoff {
        steps,
        duration: Duration::from_millis(1),
        factor: 1.05,
        jitter: 0.1,
        cap: None,
    }
}

async fn pipeline(destinations: Vec<Destination>, backoff: Backoff) -> Pipeline {
    pipeline_with_scheme(SubjectScheme::Object, destinations, backoff).await
}

async fn pipeline_with_scheme(
    scheme: SubjectScheme,
    destinations: Vec<Destination>,
    backoff: Backoff,
) -> Pipeline {
    let log = MemoryLog::new();
    let publisher = Publisher::new(
        Arc::new(log.clone()),
        PublisherConfig {
            scheme,
            ..PublisherConfig::default()
        },
    );
    publisher.ensure_provisioned().await.unwrap();

    let options = ConsumerOptions {
        scheme,
        fetch_timeout: Duration::from_millis(100),
        ack_wait: Duration::from_millis(500),
        backoff,
        ..ConsumerOptions::default()
    };

    let shutdown = CancellationToken::new();
    let running = Distributor::new(
        Arc::new(log.clone()),
        Arc::new(WebhookEmitter::with_timeout(Duration::from_secs(2)).unwrap()),
        Registry::new(),
    )
    .options(options)
    .destinations(destinations)
    .start(shutdown.clone())
    .unwrap();

    Pipeline {
        log,
        publisher,
        running,
        shutdown,
    }
}

impl Pipeline {
    async fn publish(&self, event: &str, model: &str, data: Value) {
        self.publisher
            .publish(&WebhookEvent::new(event, model, data))
            .await
            .unwrap();
    }

    fn counters(&self, dest: &str) -> (u64, u64) {
        let metrics = self.running.consumer(dest).unwrap().metrics();
        (metrics.success_total(), metrics.errors_total())
    }

    /// Wait until the cursor has nothing pending or unacknowledged
    async fn settled(&self, durable: &str, acked: u64) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let info = self.log.cursor_info("NETBOX", durable);
            if info.is_some_and(|info| info.acked >= acked && info.pending == 0) {
                return;
            }
            assert!(Instant::now() < deadline, "cursor {durable} never settled");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        assert_eq!(self.running.join().await, 0);
    }
}

fn url(addr: SocketAddr, dest: &str) -> String {
    format!("http://{addr}/{dest}")
}

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test]
async fn test_watched_event_is_delivered_once() {
    let sink = Sink::default();
    let addr = sink.start().await;
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["updated"])],
        fast_backoff(50),
    )
    .await;

    p.publish("updated", "device", json!({"status": {"value": "active"}}))
        .await;
    p.settled("x-device", 1).await;

    assert_eq!(p.counters("x"), (1, 0));
    let received = sink.received("x");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["event"], "updated");
    assert_eq!(received[0]["data"]["status"]["value"], "active");
    p.stop().await;
}

#[tokio::test]
async fn test_unavailable_destination_is_retried_until_it_recovers() {
    let sink = Sink::default();
    let addr = sink.start().await;
    sink.script("x", [503, 503, 503]);
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["updated"])],
        fast_backoff(50),
    )
    .await;

    p.publish("updated", "device", json!({"status": {"value": "active"}}))
        .await;
    p.settled("x-device", 1).await;

    assert_eq!(sink.calls("x"), 4);
    assert_eq!(sink.received("x").len(), 1);
    assert_eq!(p.counters("x"), (1, 0));
    p.stop().await;
}

#[tokio::test]
async fn test_exhausted_event_is_acked_and_not_redelivered() {
    let sink = Sink::default();
    let addr = sink.start().await;
    sink.always("x", 503);
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["updated"])],
        fast_backoff(50),
    )
    .await;

    p.publish("updated", "device", json!({})).await;
    p.settled("x-device", 1).await;
    assert_eq!(sink.calls("x"), 50);
    assert_eq!(p.counters("x"), (0, 1));

    // Well past the ack deadline
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(sink.calls("x"), 50);
    let info = p.log.cursor_info("NETBOX", "x-device").unwrap();
    assert_eq!(info.redelivered, 0);
    p.stop().await;
}

#[tokio::test]
async fn test_unwatched_event_kind_makes_no_call() {
    let sink = Sink::default();
    let addr = sink.start().await;
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["updated"])],
        fast_backoff(50),
    )
    .await;

    p.publish("deleted", "device", json!({})).await;
    p.settled("x-device", 1).await;

    assert_eq!(sink.calls("x"), 0);
    assert_eq!(p.counters("x"), (0, 0));
    p.stop().await;
}

// ============================================================================
// Failure Handling
// ============================================================================

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let sink = Sink::default();
    let addr = sink.start().await;
    sink.always("x", 400);
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["created"])],
        fast_backoff(50),
    )
    .await;

    p.publish("created", "device", json!({})).await;
    p.settled("x-device", 1).await;

    assert_eq!(sink.calls("x"), 1);
    assert_eq!(p.counters("x"), (0, 1));
    p.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_is_dropped_and_later_events_flow() {
    let sink = Sink::default();
    let addr = sink.start().await;
    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["created"])],
        fast_backoff(50),
    )
    .await;

    p.log
        .publish("NETBOX.device", Bytes::from_static(b"not json"))
        .await
        .unwrap();
    p.publish("created", "device", json!({"name": "srv-1"})).await;
    p.settled("x-device", 2).await;

    let received = sink.received("x");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["data"]["name"], "srv-1");
    p.stop().await;
}

#[tokio::test]
async fn test_unreachable_destination_is_terminal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let p = pipeline(
        vec![Destination::new("x", url(addr, "x")).watch("device", ["created"])],
        fast_backoff(50),
    )
    .await;

    p.publish("created", "device", json!({})).await;
    p.settled("x-device", 1).await;

    assert_eq!(p.counters("x"), (0, 1));
    p.stop().await;
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_each_destination_gets_its_own_copy() {
    let sink = Sink::default();
    let addr = sink.start().await;
    sink.always("b", 400);
    let p = pipeline(
        vec![
            Destination::new("a", url(addr, "a"))
                .watch("device", ["created"])
                .watch("interface", ["deleted"]),
            Destination::new("b", url(addr, "b")).watch("device", ["created"]),
        ],
        fast_backoff(50),
    )
    .await;

    p.publish("created", "device", json!({"name": "srv-1"})).await;
    p.publish("deleted", "interface", json!({"name": "eth0"})).await;
    p.settled("a-device", 1).await;
    p.settled("a-interface", 1).await;
    p.settled("b-device", 1).await;

    // A rejection at one destination leaves the other untouched
    assert_eq!(p.counters("a"), (2, 0));
    assert_eq!(p.counters("b"), (0, 1));
    assert_eq!(sink.received("a").len(), 2);
    assert!(p.log.cursor_info("NETBOX", "b-interface").is_none());
    p.stop().await;
}

#[tokio::test]
async fn test_region_scheme_scopes_destinations() {
    let sink = Sink::default();
    let addr = sink.start().await;
    let p = pipeline_with_scheme(
        SubjectScheme::Region,
        vec![
            Destination::new("eu", url(addr, "eu"))
                .region("eu")
                .watch("device", ["created"]),
            Destination::new("global", url(addr, "global")).watch("device", ["created"]),
        ],
        fast_backoff(50),
    )
    .await;

    p.publish("created", "device", json!({"name": "fra-1", "site": {"slug": "eu1"}}))
        .await;
    p.publish("created", "device", json!({"name": "nyc-1", "site": {"slug": "us1"}}))
        .await;
    p.publish("created", "device", json!({"name": "lab-1"})).await;
    p.settled("global-device", 3).await;
    p.settled("eu-device", 1).await;

    let eu: Vec<_> = sink
        .received("eu")
        .iter()
        .map(|v| v["data"]["name"].clone())
        .collect();
    assert_eq!(eu, vec![json!("fra-1")]);
    assert_eq!(sink.received("global").len(), 3);

    let info = p.log.cursor_info("NETBOX", "eu-device").unwrap();
    assert_eq!(info.filter_subject, "NETBOX.eu.device");
    assert_eq!(info.acked, 1);
    assert_eq!(p.log.stream_info("NETBOX").unwrap().messages, 3);
    p.stop().await;
}

#[tokio::test]
async fn test_cursor_resumes_after_restart() {
    let sink = Sink::default();
    let addr = sink.start().await;
    let destination = Destination::new("x", url(addr, "x")).watch("device", ["created"]);
    let p = pipeline(vec![destination.clone()], fast_backoff(50)).await;

    p.publish("created", "device", json!({"name": "first"})).await;
    p.settled("x-device", 1).await;
    let Pipeline {
        log,
        publisher,
        running,
        shutdown,
    } = p;
    shutdown.cancel();
    assert_eq!(running.join().await, 0);

    // Published while nobody is consuming
    publisher
        .publish(&WebhookEvent::new("created", "device", json!({"name": "second"})))
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let running = Distributor::new(
        Arc::new(log.clone()),
        Arc::new(WebhookEmitter::new().unwrap()),
        Registry::new(),
    )
    .options(ConsumerOptions {
        fetch_timeout: Duration::from_millis(100),
        ..ConsumerOptions::default()
    })
    .destination(destination)
    .start(shutdown.clone())
    .unwrap();

    let p = Pipeline {
        log,
        publisher,
        running,
        shutdown,
    };
    p.settled("x-device", 2).await;

    let names: Vec<_> = sink
        .received("x")
        .iter()
        .map(|v| v["data"]["name"].clone())
        .collect();
    assert_eq!(names, vec![json!("first"), json!("second")]);
    p.stop().await;
}

#[tokio::test]
async fn test_stream_definition_is_kept_on_reprovision() {
    let log = MemoryLog::new();
    let publisher = Publisher::new(Arc::new(log.clone()), PublisherConfig::default());
    publisher.ensure_provisioned().await.unwrap();

    let stream = StreamConfig::new("NETBOX", vec!["NETBOX.*".to_string()])
        .max_age(Duration::from_secs(3600));
    let again = log.ensure_stream(&stream).await.unwrap();
    assert_eq!(again.to_string(), "unchanged");
}
