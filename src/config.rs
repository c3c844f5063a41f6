//! Application configuration loaded from `config.yaml`.
//!
//! Every section has defaults, so an empty file is a valid configuration.
//! Selected environment variables override file values after parsing.

use crate::application::{BreadthUnits, DashboardRequest, RangePreset, SeriesCatalog, SeriesSource};
use crate::application::cache_store::CACHE_VERSION;
use crate::infrastructure::http_client::DEFAULT_PROXY_URL;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct AppConfig {
    /// HTTP server binding and CORS
    #[serde(default)]
    pub server: ServerConfig,
    /// Cache backend selection
    #[serde(default)]
    pub cache: CacheConfig,
    /// Upstream transport settings
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Default dashboard view and background refresh
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Reference, secondary and selectable index series
    #[serde(default)]
    pub series: SeriesConfig,
    /// Sector universe for the performance ranking
    #[serde(default)]
    pub sectors: Vec<SeriesSource>,
}

/// Server configuration settings.
///
/// Defines how the HTTP server should bind and what CORS origins to allow.
#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number to listen on (default: 3010)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Comma-separated list of allowed CORS origins (default: "*")
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3010
}
fn default_allowed_origins() -> String {
    "*".to_string()
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    #[default]
    Parquet,
    Redis,
}

impl std::str::FromStr for CacheBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "parquet" => Ok(CacheBackend::Parquet),
            "redis" => Ok(CacheBackend::Redis),
            other => anyhow::bail!("Unknown cache backend '{}' (expected memory, parquet or redis)", other),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Directory for the Parquet backend
    #[serde(default = "default_cache_path")]
    pub path: String,
    /// Connection string for the Redis backend
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Key prefix; bumping it orphans every existing entry
    #[serde(default = "default_cache_version")]
    pub version: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            path: default_cache_path(),
            redis_url: None,
            version: default_cache_version(),
        }
    }
}

fn default_cache_path() -> String {
    "data/cache".to_string()
}
fn default_cache_version() -> String {
    CACHE_VERSION.to_string()
}

#[derive(Deserialize, Debug, Clone)]
pub struct UpstreamConfig {
    /// CORS relay used when a direct request fails
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    /// Per-request timeout; unset means no timeout
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            timeout_secs: None,
        }
    }
}

fn default_proxy_url() -> String {
    DEFAULT_PROXY_URL.to_string()
}

/// Default dashboard view, used by the background refresh and as the base
/// for query parameters.
#[derive(Deserialize, Debug, Clone)]
pub struct DashboardConfig {
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    #[serde(default)]
    pub exchanges: Vec<String>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub volume_ma20_min: Option<f64>,
    #[serde(default)]
    pub volume_ma20_max: Option<f64>,
    #[serde(default)]
    pub breadth_endpoint: String,
    #[serde(default)]
    pub breadth_units: Option<BreadthUnits>,
    #[serde(default)]
    pub selected_series: Option<String>,
    #[serde(default)]
    pub range: RangePreset,
    /// Background refresh period; unset disables the refresh task
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
    /// Row cap of the narrative context table
    #[serde(default = "default_context_rows")]
    pub context_rows: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            exchanges: Vec::new(),
            price_min: None,
            price_max: None,
            volume_ma20_min: None,
            volume_ma20_max: None,
            breadth_endpoint: String::new(),
            breadth_units: None,
            selected_series: None,
            range: RangePreset::default(),
            refresh_interval_secs: None,
            context_rows: default_context_rows(),
        }
    }
}

fn default_lookback_days() -> u32 {
    365
}
fn default_context_rows() -> usize {
    400
}

impl DashboardConfig {
    pub fn default_request(&self) -> DashboardRequest {
        DashboardRequest {
            lookback_days: self.lookback_days,
            exchanges: self.exchanges.clone(),
            price_min: self.price_min,
            price_max: self.price_max,
            volume_ma20_min: self.volume_ma20_min,
            volume_ma20_max: self.volume_ma20_max,
            breadth_endpoint: self.breadth_endpoint.clone(),
            breadth_units: self.breadth_units,
            selected_series: self.selected_series.clone(),
            from_date: None,
            to_date: None,
            range: self.range,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SeriesConfig {
    #[serde(default)]
    pub reference: Option<SeriesSource>,
    #[serde(default)]
    pub secondary: Option<SeriesSource>,
    #[serde(default)]
    pub choices: Vec<SeriesSource>,
}

impl AppConfig {
    /// Read and parse a YAML file, then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read {} - ensure file exists in working directory",
                path.display()
            )
        })?;
        let mut config = Self::from_yaml(&content)?;
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        // An empty document parses as null
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).context("Failed to parse config - check YAML syntax and structure")
    }

    /// Apply `PORT`, `REDIS_URL`, `CACHE_PATH` and `CACHE_BACKEND` from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT").and_then(|p| p.parse::<u16>().ok()) {
            self.server.port = port;
        }
        if let Some(url) = lookup("REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Some(path) = lookup("CACHE_PATH") {
            self.cache.path = path;
        }
        if let Some(backend) = lookup("CACHE_BACKEND") {
            self.cache.backend = backend.parse()?;
        }
        Ok(())
    }

    pub fn catalog(&self) -> SeriesCatalog {
        SeriesCatalog {
            reference: self.series.reference.clone(),
            secondary: self.series.secondary.clone(),
            choices: self.series.choices.clone(),
            sectors: self.sectors.clone(),
        }
    }
}
