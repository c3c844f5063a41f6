//! Market Breadth Gateway
//!
//! A read-only REST gateway over a cache-first market breadth pipeline:
//! breadth, index and sector series are fetched from upstream HTTP APIs,
//! normalized, cached with fresh/stale fallbacks and merged into one aligned
//! per-day dataset.
//!
//! # Architecture
//!
//! The gateway follows clean/onion architecture:
//! - **Domain**: Time-series entities and the transport/store/clock traits
//! - **Application**: Normalizer, cache store, fetchers, merge engine, dashboard
//! - **Infrastructure**: reqwest transport, memory/Parquet/Redis stores
//! - **API**: HTTP handlers, routing, and middleware
//!
//! # Configuration
//!
//! The gateway is configured via `config.yaml` and environment variables:
//! - `CONFIG_PATH`: Config file location (default: config.yaml)
//! - `PORT`: Overrides `server.port`
//! - `CACHE_BACKEND`: `memory`, `parquet` or `redis`
//! - `CACHE_PATH`: Parquet cache directory (default: data/cache)
//! - `REDIS_URL`: Redis connection string for the redis backend
//! - `RUST_LOG`: Logging level (default: info)
//! - `LOG_FORMAT`: `json` for structured logs
//!
//! # Quick Start
//!
//! ```bash
//! cargo run --release
//!
//! curl http://localhost:3010/health
//! curl "http://localhost:3010/v1/breadth/merged?range=6M"
//! curl "http://localhost:3010/v1/breadth/context?from=2024-01-01&to=2024-06-30"
//! ```

use anyhow::Context;
use market_breadth_gateway::api::routes::create_router;
use market_breadth_gateway::api::state::AppState;
use market_breadth_gateway::application::{
    CacheStore, DashboardRequest, DashboardService, RefreshOutcome, SeriesService,
};
use market_breadth_gateway::config::{AppConfig, CacheBackend};
use market_breadth_gateway::domain::{Clock, KeyValueStore};
use market_breadth_gateway::infrastructure::{
    HttpTransport, MemoryStore, ParquetStore, RedisRepository, SystemClock,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let env_filter = EnvFilter::new(env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));

    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // Load Config
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
    let config = AppConfig::load(&config_path)?;
    tracing::info!("Loaded configuration from {}", config_path);

    // Metrics recorder (installed once, rendered by /metrics)
    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    // Infrastructure
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = build_store(&config)?;
    tracing::info!("Cache backend: {} (version {})", store.backend(), config.cache.version);

    let transport = Arc::new(HttpTransport::new(
        &config.upstream.proxy_url,
        config.upstream.timeout(),
        clock.clone(),
    )?);

    // Application
    let cache = Arc::new(CacheStore::with_version(
        store,
        clock,
        config.cache.version.clone(),
    ));
    let series = Arc::new(SeriesService::new(transport, cache.clone()));
    let dashboard = Arc::new(
        DashboardService::new(series, config.catalog()).with_context_rows(config.dashboard.context_rows),
    );
    let defaults = config.dashboard.default_request();

    if let Some(secs) = config.dashboard.refresh_interval_secs {
        spawn_refresh_loop(dashboard.clone(), defaults.clone(), Duration::from_secs(secs.max(1)));
    }

    let state = AppState {
        dashboard,
        cache,
        defaults: Arc::new(defaults),
        metrics: Some(metrics),
    };

    let app = create_router(state, &config.server.allowed_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to address {}", addr))?;
    tracing::info!("Market breadth gateway running at http://{}", addr);

    // Graceful shutdown handling
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error during operation")?;

    Ok(())
}

fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::Parquet => {
            let store = ParquetStore::new(&config.cache.path);
            tracing::info!("Parquet cache storage initialized at: {}", config.cache.path);
            Arc::new(store)
        }
        CacheBackend::Redis => {
            let redis = RedisRepository::new(config.cache.redis_url.clone());
            if !redis.is_enabled() {
                anyhow::bail!("CACHE_BACKEND=redis requires a valid REDIS_URL");
            }
            Arc::new(redis)
        }
    };
    Ok(store)
}

/// Periodically refresh the default view so the snapshot stays warm.
fn spawn_refresh_loop(dashboard: Arc<DashboardService>, request: DashboardRequest, period: Duration) {
    tracing::info!("Background dashboard refresh every {}s", period.as_secs());
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match dashboard.refresh(request.clone()).await {
                Ok(RefreshOutcome::Completed(snapshot)) => {
                    tracing::debug!("Background refresh {} completed", snapshot.generation);
                }
                Ok(RefreshOutcome::Superseded { generation, latest }) => {
                    tracing::debug!("Background refresh {} superseded by {}", generation, latest);
                }
                Err(e) => tracing::warn!("Background refresh failed: {}", e),
            }
        }
    });
}

/// Wait for SIGTERM or SIGINT (Ctrl+C) to initiate graceful shutdown
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        },
    }
}
