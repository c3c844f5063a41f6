pub mod breadth_payload;
pub mod cache_store;
pub mod dashboard_service;
pub mod merge;
pub mod narrative;
pub mod normalizer;
pub mod series_service;

pub use breadth_payload::{decode_breadth, BreadthUnits};
pub use cache_store::{CacheStats, CacheStore};
pub use dashboard_service::{
    DashboardRequest, DashboardService, DashboardSnapshot, RefreshOutcome, SeriesCatalog,
    SeriesSource,
};
pub use merge::{detect_crossovers, filter_range, merge, DateRange, RangePreset};
pub use narrative::{rank_sectors, render_context, ContextOptions, SectorPerformance};
pub use normalizer::normalize;
pub use series_service::{BreadthQuery, SeriesService};
