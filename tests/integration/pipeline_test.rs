//! End-to-end tests of the fetch-cache-merge pipeline
//!
//! The real reqwest transport talks to a local axum upstream; time is driven
//! by a manual clock so freshness windows can be crossed deterministically.
//! Run with: `cargo test --test pipeline_test`

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use market_breadth_gateway::application::cache_store::ttl;
use market_breadth_gateway::application::{
    BreadthQuery, CacheStore, DashboardRequest, DashboardService, RangePreset, RefreshOutcome,
    SeriesCatalog, SeriesService, SeriesSource,
};
use market_breadth_gateway::domain::{Clock, CrossoverKind, KeyValueStore, MaPair};
use market_breadth_gateway::infrastructure::{HttpTransport, ManualClock, MemoryStore, ParquetStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// 2024-01-11T00:00:00Z
const NOW_MS: i64 = 1_704_931_200_000;

#[derive(Clone, Default)]
struct Upstream {
    hits: Arc<Mutex<Vec<String>>>,
    down: Arc<AtomicBool>,
}

impl Upstream {
    fn record(&self, entry: &str) -> Result<(), StatusCode> {
        self.hits.lock().unwrap().push(entry.to_string());
        if self.down.load(Ordering::SeqCst) {
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        } else {
            Ok(())
        }
    }

    fn hits(&self) -> Vec<String> {
        self.hits.lock().unwrap().clone()
    }

    fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

async fn index(State(up): State<Upstream>) -> Result<Json<Value>, StatusCode> {
    up.record("index")?;
    // 2024-01-08 .. 2024-01-10, epoch seconds
    Ok(Json(json!({
        "t": [1704672000, 1704758400, 1704844800],
        "c": [4700.0, 4750.5, 4800.25]
    })))
}

async fn breadth(
    State(up): State<Upstream>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Value>, StatusCode> {
    let mode = params.get("mode").map(String::as_str).unwrap_or("");
    up.record(&format!("breadth:{}", mode))?;
    let body = if mode == "latest" {
        json!([{"date": "2024-01-10", "total": 200, "ma20": 60, "ma50": 55, "ma200": 40}])
    } else {
        json!({"data": [
            {"date": "2024-01-08", "total": 200, "ma20": 40, "ma50": 50, "ma200": 45},
            {"date": "2024-01-09", "total": 200, "ma20": 45, "ma50": 50, "ma200": 45},
            {"date": "2024-01-10", "total": 200, "ma20": 50, "ma50": 50, "ma200": 45}
        ]})
    };
    Ok(Json(body))
}

async fn relay(State(up): State<Upstream>) -> StatusCode {
    up.hits.lock().unwrap().push("relay".to_string());
    StatusCode::BAD_GATEWAY
}

async fn spawn_upstream(up: Upstream) -> String {
    let app = Router::new()
        .route("/index/{symbol}", get(index))
        .route("/breadth", get(breadth))
        .route("/relay", get(relay))
        .with_state(up);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn series_service(base: &str, store: Arc<dyn KeyValueStore>, clock: Arc<ManualClock>) -> SeriesService {
    let clock: Arc<dyn Clock> = clock;
    let transport = Arc::new(HttpTransport::new(&format!("{}/relay", base), None, clock.clone()).unwrap());
    SeriesService::new(transport, Arc::new(CacheStore::new(store, clock)))
}

fn breadth_query(base: &str) -> BreadthQuery {
    BreadthQuery {
        endpoint: format!("{}/breadth", base),
        lookback_days: 5,
        exchanges: vec!["NYSE".to_string()],
        price_min: Some(5.0),
        price_max: None,
        volume_ma20_min: None,
        volume_ma20_max: None,
        units: None,
    }
}

#[tokio::test]
async fn test_index_series_cache_then_stale_fallback() {
    let up = Upstream::default();
    let base = spawn_upstream(up.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let svc = series_service(&base, Arc::new(MemoryStore::new()), clock.clone());
    let url = format!("{}/index/spx", base);

    let first = svc.fetch_index_series(&url).await;
    assert_eq!(first.len(), 3);
    assert_eq!(first[0].timestamp, 1_704_672_000_000);
    assert_eq!(first[2].close, 4800.25);

    // Within the 4 hour window: no network
    clock.advance(ttl::INDEX_MS);
    assert_eq!(svc.fetch_index_series(&url).await, first);
    assert_eq!(up.hits(), vec!["index"]);

    // Expired and upstream down: direct + relay fail, stale data served
    clock.advance(1);
    up.set_down(true);
    assert_eq!(svc.fetch_index_series(&url).await, first);
    assert_eq!(up.hits(), vec!["index", "index", "relay"]);
}

#[tokio::test]
async fn test_breadth_fresh_window_and_latest_overlay() {
    let up = Upstream::default();
    let base = spawn_upstream(up.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let svc = series_service(&base, Arc::new(MemoryStore::new()), clock.clone());
    let query = breadth_query(&base);

    let points = svc.fetch_breadth_series(&query).await;
    let dates: Vec<&str> = points.iter().map(|p| p.date.as_str()).collect();
    assert_eq!(dates, vec!["2024-01-08", "2024-01-09", "2024-01-10"]);
    // Latest wins over history for 2024-01-10
    assert_eq!(points[2].ma20, 60.0);
    assert_eq!(points[2].count20, 120);
    let mut hits = up.hits();
    hits.sort();
    assert_eq!(hits, vec!["breadth:history", "breadth:latest"]);

    // Fresh window: nothing fetched, and a different lookback shares the entry
    clock.advance(ttl::BREADTH_FRESH_MS - 1);
    let mut narrower = query.clone();
    narrower.lookback_days = 1;
    assert_eq!(svc.fetch_breadth_series(&narrower).await, points);
    assert_eq!(up.hits().len(), 2);

    // Past the fresh window the cached history still covers: latest only
    clock.advance(2);
    let again = svc.fetch_breadth_series(&query).await;
    assert_eq!(again, points);
    assert_eq!(up.hits().len(), 3);
    assert_eq!(up.hits()[2], "breadth:latest");

    // Past the history TTL with upstream down: cached data survives
    clock.advance(ttl::BREADTH_HISTORY_MS + 1);
    up.set_down(true);
    assert_eq!(svc.fetch_breadth_series(&query).await, points);
}

#[tokio::test]
async fn test_parquet_cache_survives_restart_and_version_bump_orphans() {
    let up = Upstream::default();
    let base = spawn_upstream(up.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let dir = tempfile::tempdir().unwrap();
    let url = format!("{}/index/rut", base);

    let first = series_service(&base, Arc::new(ParquetStore::new(dir.path())), clock.clone());
    let points = first.fetch_index_series(&url).await;
    assert_eq!(points.len(), 3);

    // A new process over the same directory serves the entry without network
    up.set_down(true);
    let restarted = series_service(&base, Arc::new(ParquetStore::new(dir.path())), clock.clone());
    assert_eq!(restarted.fetch_index_series(&url).await, points);
    assert_eq!(up.hits(), vec!["index"]);

    // Bumped cache version: old entry is invisible, upstream is down, result is empty
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    let transport = Arc::new(HttpTransport::new(
        &format!("{}/relay", base),
        None,
        clock_dyn.clone(),
    )
    .unwrap());
    let bumped = SeriesService::new(
        transport,
        Arc::new(CacheStore::with_version(
            Arc::new(ParquetStore::new(dir.path())),
            clock_dyn,
            "mbg_v4",
        )),
    );
    assert!(bumped.fetch_index_series(&url).await.is_empty());
}

#[tokio::test]
async fn test_dashboard_refresh_merges_all_sources() {
    let up = Upstream::default();
    let base = spawn_upstream(up.clone()).await;
    let clock = Arc::new(ManualClock::new(NOW_MS));
    let series = Arc::new(series_service(&base, Arc::new(MemoryStore::new()), clock));

    let source = |name: &str, symbol: &str| SeriesSource {
        name: name.to_string(),
        url: format!("{}/index/{}", base, symbol),
    };
    let catalog = SeriesCatalog {
        reference: Some(source("S&P 500", "spx")),
        secondary: Some(source("Russell 2000", "rut")),
        choices: vec![source("Technology", "xlk")],
        sectors: vec![],
    };
    let dashboard = DashboardService::new(series, catalog);

    let query = breadth_query(&base);
    let request = DashboardRequest {
        lookback_days: query.lookback_days,
        exchanges: query.exchanges.clone(),
        price_min: query.price_min,
        price_max: None,
        volume_ma20_min: None,
        volume_ma20_max: None,
        breadth_endpoint: query.endpoint.clone(),
        breadth_units: None,
        selected_series: Some("Technology".to_string()),
        from_date: None,
        to_date: None,
        range: RangePreset::OneMonth,
    };

    let RefreshOutcome::Completed(snapshot) = dashboard.refresh(request).await.unwrap() else {
        panic!("single refresh cannot be superseded");
    };
    assert_eq!(snapshot.records.len(), 3);
    for record in &snapshot.records {
        assert!(record.breadth.is_some());
        assert!(record.reference_index.is_some());
        assert!(record.secondary_index.is_some());
        assert!(record.selected_series.is_some());
    }
    // ma20 rises through ma50 on 2024-01-10 (45/50 -> 60/55)
    let kinds: Vec<(&str, CrossoverKind, MaPair)> = snapshot
        .crossovers
        .iter()
        .map(|c| (c.date.as_str(), c.kind, c.pair))
        .collect();
    assert_eq!(kinds, vec![("2024-01-10", CrossoverKind::Bullish, MaPair::Ma20Ma50)]);
}
