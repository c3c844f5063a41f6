//! Integration tests for REST API endpoints
//!
//! The gateway router is served in-process against a local axum upstream
//! that answers breadth and index requests, so every endpoint is exercised
//! end-to-end over real HTTP.
//! Run with: `cargo test --test rest_api_test`

use axum::{extract::Path, routing::get, Json, Router};
use market_breadth_gateway::api::routes::create_router;
use market_breadth_gateway::api::state::AppState;
use market_breadth_gateway::application::{CacheStore, DashboardService, SeriesService};
use market_breadth_gateway::config::AppConfig;
use market_breadth_gateway::domain::Clock;
use market_breadth_gateway::infrastructure::{HttpTransport, ManualClock, MemoryStore};
use serde_json::{json, Value};
use std::sync::Arc;

/// 2024-01-11T00:00:00Z
const NOW_MS: i64 = 1_704_931_200_000;

async fn breadth() -> Json<Value> {
    // Complex layout, values are counts out of 200
    Json(json!({"data": {
        "ma20": [
            {"date": "2024-01-08", "value": 80, "total": 200},
            {"date": "2024-01-09", "value": 90, "total": 200},
            {"date": "2024-01-10", "value": 120, "total": 200}
        ],
        "ma50": [
            {"date": "2024-01-08", "value": 100, "total": 200},
            {"date": "2024-01-09", "value": 100, "total": 200},
            {"date": "2024-01-10", "value": 100, "total": 200}
        ],
        "ma200": [
            {"date": "2024-01-08", "value": 90, "total": 200},
            {"date": "2024-01-09", "value": 90, "total": 200},
            {"date": "2024-01-10", "value": 90, "total": 200}
        ]
    }}))
}

async fn index(Path(symbol): Path<String>) -> Json<Value> {
    let closes = match symbol.as_str() {
        "xlk" => [100.0, 105.0, 110.0],
        "xle" => [50.0, 49.0, 45.0],
        _ => [4700.0, 4750.0, 4800.0],
    };
    Json(json!({
        "t": [1704672000, 1704758400, 1704844800],
        "c": closes
    }))
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start the upstream and the gateway; returns the gateway base URL.
async fn spawn_gateway() -> String {
    let upstream = spawn(
        Router::new()
            .route("/breadth", get(breadth))
            .route("/index/{symbol}", get(index)),
    )
    .await;

    let yaml = format!(
        r#"
cache:
  backend: memory
upstream:
  proxy_url: "{up}/relay"
dashboard:
  lookback_days: 30
  exchanges: [NYSE]
  breadth_endpoint: "{up}/breadth"
  selected_series: Technology
  range: 1M
series:
  reference:
    name: "S&P 500"
    url: "{up}/index/spx"
  secondary:
    name: "Russell 2000"
    url: "{up}/index/rut"
  choices:
    - name: Technology
      url: "{up}/index/xlk"
sectors:
  - name: Technology
    url: "{up}/index/xlk"
  - name: Energy
    url: "{up}/index/xle"
"#,
        up = upstream
    );
    let config = AppConfig::from_yaml(&yaml).unwrap();

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(NOW_MS));
    let transport = Arc::new(HttpTransport::new(
        &config.upstream.proxy_url,
        config.upstream.timeout(),
        clock.clone(),
    )
    .unwrap());
    let cache = Arc::new(CacheStore::new(Arc::new(MemoryStore::new()), clock));
    let series = Arc::new(SeriesService::new(transport, cache.clone()));
    let dashboard = Arc::new(DashboardService::new(series, config.catalog()));

    let state = AppState {
        dashboard,
        cache,
        defaults: Arc::new(config.dashboard.default_request()),
        metrics: None,
    };
    spawn(create_router(state, &config.server.allowed_origins)).await
}

async fn get_request(base: &str, path: &str) -> reqwest::Response {
    reqwest::get(format!("{}{}", base, path)).await.unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/health").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers().get("x-request-id").is_some());
    assert_eq!(response.headers()["x-content-type-options"], "nosniff");

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dependencies"]["cache"], "memory");
    assert_eq!(body["generation"], 0);
    assert!(body.get("last_refresh").is_none());
}

#[tokio::test]
async fn test_merged_endpoint() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/merged").await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["date"], "2024-01-08");
    assert_eq!(records[0]["breadth"]["count20"], 80);
    assert_eq!(records[0]["breadth"]["ma20"], 40.0);
    assert_eq!(records[2]["referenceIndex"], 4800.0);
    assert_eq!(records[2]["selectedSeries"], 110.0);
    assert_eq!(body["crossovers"].as_array().unwrap().len(), 1);
    assert_eq!(body["crossovers"][0]["date"], "2024-01-10");
    assert_eq!(body["generation"], 1);

    // The published snapshot is visible to health
    let health: Value = get_request(&base, "/health").await.json().await.unwrap();
    assert_eq!(health["generation"], 1);
    assert!(health["last_refresh"].is_i64());
}

#[tokio::test]
async fn test_merged_date_filter() {
    let base = spawn_gateway().await;
    let body: Value = get_request(&base, "/v1/breadth/merged?from=2024-01-09&to=2024-01-09")
        .await
        .json()
        .await
        .unwrap();
    let records = body["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["date"], "2024-01-09");
}

#[tokio::test]
async fn test_merged_without_data_is_not_found() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/merged?from=2030-01-01").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "No data available"}));
}

#[tokio::test]
async fn test_invalid_parameters_are_rejected() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/merged?lookbackDays=0").await;
    assert_eq!(response.status(), 400);

    let response = get_request(&base, "/v1/breadth/merged?from=2024-02-01&to=2024-01-01").await;
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Validation failed");
}

#[tokio::test]
async fn test_unknown_selected_series() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/merged?selectedSeries=Nope").await;
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Unknown series");
    assert_eq!(body["details"], "Nope");
}

#[tokio::test]
async fn test_breadth_series_endpoint() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/series").await;
    assert_eq!(response.status(), 200);
    let points: Value = response.json().await.unwrap();
    let points = points.as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[2]["count20"], 120);
    assert_eq!(points[2]["ma20"], 60.0);
}

#[tokio::test]
async fn test_named_series_endpoint() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/series/s%26p%20500").await;
    assert_eq!(response.status(), 200);
    let points: Value = response.json().await.unwrap();
    assert_eq!(points.as_array().unwrap().len(), 3);
    assert_eq!(points[0]["timestamp"], 1_704_672_000_000i64);

    let response = get_request(&base, "/v1/series/unknown").await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_context_endpoint_is_plain_text() {
    let base = spawn_gateway().await;
    let response = get_request(&base, "/v1/breadth/context").await;
    assert_eq!(response.status(), 200);
    assert!(response.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/plain"));

    let text = response.text().await.unwrap();
    assert!(text.starts_with("Market breadth data 2024-01-08 to 2024-01-10 (3 days)\n"));
    assert!(text.contains("date,ma20,ma50,ma200,S&P 500,Russell 2000,Technology\n"));
    assert!(text.contains("Crossovers (1):\n2024-01-10 bullish ma20/ma50\n"));
    assert!(text.contains("Sector ranking (2):\n1. Technology +10.00%"));

    // Rendering does not publish a snapshot
    let health: Value = get_request(&base, "/health").await.json().await.unwrap();
    assert!(health.get("last_refresh").is_none());
}

#[tokio::test]
async fn test_sector_ranking_endpoint() {
    let base = spawn_gateway().await;
    let body: Value = get_request(&base, "/v1/sectors/ranking").await.json().await.unwrap();
    let ranking = body.as_array().unwrap();
    assert_eq!(ranking.len(), 2);
    assert_eq!(ranking[0]["name"], "Technology");
    assert_eq!(ranking[0]["rank"], 1);
    assert_eq!(ranking[1]["name"], "Energy");
    assert!((ranking[1]["change_pct"].as_f64().unwrap() + 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_cache_stats_endpoint() {
    let base = spawn_gateway().await;
    get_request(&base, "/v1/series/Technology").await;
    get_request(&base, "/v1/series/Technology").await;

    let stats: Value = get_request(&base, "/v1/cache/stats").await.json().await.unwrap();
    assert_eq!(stats["backend"], "memory");
    assert_eq!(stats["writes"], 1);
    assert!(stats["hits"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_openapi_and_metrics_endpoints() {
    let base = spawn_gateway().await;
    let doc: Value = get_request(&base, "/v1/openapi.json").await.json().await.unwrap();
    for path in [
        "/health",
        "/v1/breadth/merged",
        "/v1/breadth/context",
        "/v1/series/{name}",
        "/v1/sectors/ranking",
        "/v1/cache/stats",
    ] {
        assert!(doc["paths"].get(path).is_some(), "missing {}", path);
    }

    // No recorder installed in tests: empty exposition, still 200
    let response = get_request(&base, "/metrics").await;
    assert_eq!(response.status(), 200);
}
