//! Dashboard refresh cycle.
//!
//! One refresh fetches the four source series concurrently, merges them and
//! publishes the result as the current snapshot. Every refresh takes a
//! generation number; a refresh that finishes after a newer one has started
//! is discarded instead of overwriting newer state.

use crate::application::breadth_payload::BreadthUnits;
use crate::application::merge::{detect_crossovers, merge_in_range, DateRange, RangePreset};
use crate::application::narrative::{rank_sectors, render_context, ContextOptions, SectorPerformance};
use crate::application::series_service::{BreadthQuery, SeriesService};
use crate::domain::{BreadthPoint, Crossover, DashboardError, MergedRecord, RawPoint};
use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use utoipa::ToSchema;

/// A named upstream index series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SeriesSource {
    pub name: String,
    pub url: String,
}

/// Configured index series the dashboard can draw from.
#[derive(Debug, Clone, Default)]
pub struct SeriesCatalog {
    /// Fixed reference index (e.g. S&P 500)
    pub reference: Option<SeriesSource>,
    /// Secondary cap index (e.g. Russell 2000)
    pub secondary: Option<SeriesSource>,
    /// Sector and stock series selectable by name
    pub choices: Vec<SeriesSource>,
    /// Sector universe for the performance ranking
    pub sectors: Vec<SeriesSource>,
}

impl SeriesCatalog {
    /// Case-insensitive lookup across every configured series.
    pub fn find(&self, name: &str) -> Option<&SeriesSource> {
        self.reference
            .iter()
            .chain(self.secondary.iter())
            .chain(self.choices.iter())
            .chain(self.sectors.iter())
            .find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Parameters of one dashboard view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardRequest {
    pub lookback_days: u32,
    #[serde(default)]
    pub exchanges: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub volume_ma20_min: Option<f64>,
    pub volume_ma20_max: Option<f64>,
    pub breadth_endpoint: String,
    pub breadth_units: Option<BreadthUnits>,
    /// Catalog name of the selected sector/stock series
    pub selected_series: Option<String>,
    #[schema(value_type = Option<String>, format = Date)]
    pub from_date: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub to_date: Option<NaiveDate>,
    #[serde(default)]
    pub range: RangePreset,
}

impl DashboardRequest {
    pub fn breadth_query(&self) -> BreadthQuery {
        BreadthQuery {
            endpoint: self.breadth_endpoint.clone(),
            lookback_days: self.lookback_days,
            exchanges: self.exchanges.clone(),
            price_min: self.price_min,
            price_max: self.price_max,
            volume_ma20_min: self.volume_ma20_min,
            volume_ma20_max: self.volume_ma20_max,
            units: self.breadth_units,
        }
    }

    pub fn date_range(&self) -> DateRange {
        DateRange {
            from: self.from_date,
            to: self.to_date,
            preset: self.range,
        }
    }
}

/// Published result of a completed refresh.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub generation: u64,
    pub refreshed_at: i64,
    pub records: Vec<MergedRecord>,
    pub crossovers: Vec<Crossover>,
    #[serde(skip)]
    pub request: Option<DashboardRequest>,
}

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// The refresh was the newest one and its snapshot is now current.
    Completed(Arc<DashboardSnapshot>),
    /// A newer refresh started while this one was fetching.
    Superseded { generation: u64, latest: u64 },
}

struct Sources {
    breadth: Vec<BreadthPoint>,
    reference: Vec<RawPoint>,
    secondary: Vec<RawPoint>,
    selected: Vec<RawPoint>,
}

pub struct DashboardService {
    series: Arc<SeriesService>,
    catalog: SeriesCatalog,
    context_rows: usize,
    generation: AtomicU64,
    snapshot: RwLock<Option<Arc<DashboardSnapshot>>>,
}

impl DashboardService {
    pub fn new(series: Arc<SeriesService>, catalog: SeriesCatalog) -> Self {
        info!(
            "Initialized DashboardService with {} selectable series and {} sectors",
            catalog.choices.len(),
            catalog.sectors.len()
        );
        Self {
            series,
            catalog,
            context_rows: ContextOptions::default().max_rows,
            generation: AtomicU64::new(0),
            snapshot: RwLock::new(None),
        }
    }

    /// Cap on table rows in the narrative context.
    pub fn with_context_rows(mut self, rows: usize) -> Self {
        self.context_rows = rows;
        self
    }

    pub fn catalog(&self) -> &SeriesCatalog {
        &self.catalog
    }

    pub fn series(&self) -> &Arc<SeriesService> {
        &self.series
    }

    /// Generation of the most recently started refresh.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub async fn snapshot(&self) -> Option<Arc<DashboardSnapshot>> {
        self.snapshot.read().await.clone()
    }

    /// Run one refresh cycle for `request`.
    ///
    /// # Errors
    ///
    /// - `UnknownSeries` when the selected series is not in the catalog
    /// - `NoData` when nothing falls inside the requested range
    pub async fn refresh(&self, request: DashboardRequest) -> Result<RefreshOutcome, DashboardError> {
        let selected = self.resolve_selected(&request)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!("Dashboard refresh {} started", generation);

        let sources = self.fetch_sources(&request, selected).await;

        let latest = self.generation();
        if latest != generation {
            info!("Dashboard refresh {} superseded by {}", generation, latest);
            return Ok(RefreshOutcome::Superseded { generation, latest });
        }

        let now = self.now_ms();
        let records = merge_sources(&sources, &request.date_range(), now);
        if records.is_empty() {
            warn!("Dashboard refresh {} produced no records", generation);
            return Err(DashboardError::NoData);
        }
        let crossovers = detect_crossovers(&records);

        let snapshot = Arc::new(DashboardSnapshot {
            generation,
            refreshed_at: now,
            records,
            crossovers,
            request: Some(request),
        });

        let mut slot = self.snapshot.write().await;
        if let Some(current) = slot.as_ref() {
            if current.generation > generation {
                return Ok(RefreshOutcome::Superseded {
                    generation,
                    latest: current.generation,
                });
            }
        }
        *slot = Some(snapshot.clone());
        info!(
            "Dashboard refresh {} published {} records, {} crossovers",
            generation,
            snapshot.records.len(),
            snapshot.crossovers.len()
        );
        Ok(RefreshOutcome::Completed(snapshot))
    }

    /// Deterministic text context for the narrative collaborator.
    ///
    /// Computed on the side; the published snapshot is left untouched.
    pub async fn context(&self, request: &DashboardRequest) -> Result<String, DashboardError> {
        let selected = self.resolve_selected(request)?;
        let range = request.date_range();
        let (sources, sectors) = tokio::join!(
            self.fetch_sources(request, selected),
            self.sector_ranking(&range)
        );

        let records = merge_sources(&sources, &range, self.now_ms());
        if records.is_empty() {
            return Err(DashboardError::NoData);
        }
        let crossovers = detect_crossovers(&records);

        let options = ContextOptions {
            reference_label: label(self.catalog.reference.as_ref(), "reference"),
            secondary_label: label(self.catalog.secondary.as_ref(), "secondary"),
            selected_label: label(selected, "selected"),
            max_rows: self.context_rows,
        };
        Ok(render_context(&records, &crossovers, &sectors, &options))
    }

    /// Sector performance ranking across `range`.
    pub async fn sector_ranking(&self, range: &DateRange) -> Vec<SectorPerformance> {
        let fetched = join_all(
            self.catalog
                .sectors
                .iter()
                .map(|s| async move { (s.name.clone(), self.series.fetch_index_series(&s.url).await) }),
        )
        .await;
        rank_sectors(&fetched, range, self.now_ms())
    }

    /// Normalized points of a catalog series.
    pub async fn named_series(&self, name: &str) -> Result<Vec<RawPoint>, DashboardError> {
        let source = self
            .catalog
            .find(name)
            .ok_or_else(|| DashboardError::UnknownSeries(name.to_string()))?;
        Ok(self.series.fetch_index_series(&source.url).await)
    }

    pub async fn breadth_series(&self, query: &BreadthQuery) -> Vec<BreadthPoint> {
        self.series.fetch_breadth_series(query).await
    }

    fn resolve_selected(&self, request: &DashboardRequest) -> Result<Option<&SeriesSource>, DashboardError> {
        match request.selected_series.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(name) => self
                .catalog
                .find(name)
                .map(Some)
                .ok_or_else(|| DashboardError::UnknownSeries(name.to_string())),
        }
    }

    async fn fetch_sources(&self, request: &DashboardRequest, selected: Option<&SeriesSource>) -> Sources {
        let query = request.breadth_query();
        let (breadth, reference, secondary, selected) = tokio::join!(
            self.series.fetch_breadth_series(&query),
            self.fetch_source(self.catalog.reference.as_ref()),
            self.fetch_source(self.catalog.secondary.as_ref()),
            self.fetch_source(selected),
        );
        Sources {
            breadth,
            reference,
            secondary,
            selected,
        }
    }

    async fn fetch_source(&self, source: Option<&SeriesSource>) -> Vec<RawPoint> {
        match source {
            Some(s) => self.series.fetch_index_series(&s.url).await,
            None => Vec::new(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.series.cache().clock().now_ms()
    }
}

fn merge_sources(sources: &Sources, range: &DateRange, now_ms: i64) -> Vec<MergedRecord> {
    merge_in_range(
        &sources.breadth,
        &sources.reference,
        &sources.secondary,
        &sources.selected,
        range,
        now_ms,
    )
}

fn label(source: Option<&SeriesSource>, fallback: &str) -> String {
    source
        .map(|s| s.name.clone())
        .unwrap_or_else(|| fallback.to_string())
}
