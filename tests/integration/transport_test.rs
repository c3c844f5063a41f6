//! Integration tests for the reqwest transport
//!
//! A local axum server plays both the upstream API and the relay proxy, so
//! these tests exercise real HTTP without leaving the machine.
//! Run with: `cargo test --test transport_test`

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use market_breadth_gateway::domain::{JsonTransport, TransportError};
use market_breadth_gateway::infrastructure::{HttpTransport, ManualClock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const NOW_MS: i64 = 1_704_931_200_000;

#[derive(Clone, Default)]
struct Hits(Arc<Mutex<Vec<String>>>);

impl Hits {
    fn record(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

async fn echo(State(hits): State<Hits>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    hits.record("echo".to_string());
    Json(json!({ "bust": params.get("_"), "t": params.get("t") }))
}

async fn broken(State(hits): State<Hits>) -> StatusCode {
    hits.record("broken".to_string());
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn not_json(State(hits): State<Hits>) -> &'static str {
    hits.record("not_json".to_string());
    "<html>rate limited</html>"
}

async fn relay(State(hits): State<Hits>, Query(params): Query<HashMap<String, String>>) -> Json<Value> {
    let target = params.get("url").cloned().unwrap_or_default();
    hits.record(format!("relay {}", target));
    Json(json!({ "via": "relay", "target": target }))
}

async fn relay_down(State(hits): State<Hits>) -> StatusCode {
    hits.record("relay_down".to_string());
    StatusCode::SERVICE_UNAVAILABLE
}

/// Serve the fake upstream on an ephemeral port and return its base URL.
async fn spawn_upstream(hits: Hits) -> String {
    let app = Router::new()
        .route("/echo", get(echo))
        .route("/broken", get(broken))
        .route("/not-json", get(not_json))
        .route("/relay", get(relay))
        .route("/relay-down", get(relay_down))
        .with_state(hits);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn transport(proxy_url: &str) -> HttpTransport {
    HttpTransport::new(proxy_url, None, Arc::new(ManualClock::new(NOW_MS))).unwrap()
}

#[tokio::test]
async fn test_direct_request_carries_cache_bust() {
    let hits = Hits::default();
    let base = spawn_upstream(hits.clone()).await;
    let transport = transport(&format!("{}/relay", base));

    let body = transport
        .fetch_json(&format!("{}/echo?t=30", base))
        .await
        .unwrap();

    assert_eq!(body["bust"], NOW_MS.to_string());
    assert_eq!(body["t"], "30");
    assert_eq!(hits.all(), vec!["echo"]);
}

#[tokio::test]
async fn test_server_error_falls_back_to_relay_once() {
    let hits = Hits::default();
    let base = spawn_upstream(hits.clone()).await;
    let transport = transport(&format!("{}/relay", base));

    let body = transport.fetch_json(&format!("{}/broken", base)).await.unwrap();

    assert_eq!(body["via"], "relay");
    assert_eq!(body["target"], format!("{}/broken?_={}", base, NOW_MS));
    let hits = hits.all();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0], "broken");
    assert!(hits[1].starts_with("relay "));
}

#[tokio::test]
async fn test_undecodable_body_falls_back_to_relay() {
    let hits = Hits::default();
    let base = spawn_upstream(hits.clone()).await;
    let transport = transport(&format!("{}/relay", base));

    let body = transport.fetch_json(&format!("{}/not-json", base)).await.unwrap();
    assert_eq!(body["via"], "relay");
}

#[tokio::test]
async fn test_relay_error_is_surfaced_when_both_fail() {
    let hits = Hits::default();
    let base = spawn_upstream(hits.clone()).await;
    let transport = transport(&format!("{}/relay-down", base));

    let err = transport
        .fetch_json(&format!("{}/broken", base))
        .await
        .unwrap_err();

    match err {
        TransportError::Status { url, status } => {
            assert_eq!(status, 503);
            assert!(url.starts_with(&format!("{}/relay-down?url=", base)));
        }
        other => panic!("expected relay status error, got {:?}", other),
    }
    // Exactly one direct attempt and one relay attempt
    assert_eq!(hits.all(), vec!["broken", "relay_down"]);
}

#[tokio::test]
async fn test_invalid_url_never_hits_the_network() {
    let hits = Hits::default();
    let base = spawn_upstream(hits.clone()).await;
    let transport = transport(&format!("{}/relay", base));

    let err = transport.fetch_json("::not a url::").await.unwrap_err();
    assert!(matches!(err, TransportError::InvalidUrl { .. }));
    assert!(hits.all().is_empty());
}
