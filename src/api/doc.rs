use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        // System Handlers
        crate::api::handlers::health_handler,
        crate::api::handlers::metrics_handler,
        // Breadth Handlers
        crate::api::breadth_handlers::merged_handler,
        crate::api::breadth_handlers::breadth_series_handler,
        crate::api::breadth_handlers::context_handler,
        // Series Handlers
        crate::api::breadth_handlers::series_handler,
        crate::api::breadth_handlers::sectors_handler,
        // Cache Handlers
        crate::api::breadth_handlers::cache_stats_handler
    ),
    components(
        schemas(
            crate::api::handlers::HealthResponse,
            crate::api::handlers::HealthDependencies,
            crate::api::breadth_handlers::MergedResponse,
            crate::api::breadth_handlers::ErrorResponse,
            crate::domain::RawPoint,
            crate::domain::BreadthPoint,
            crate::domain::BreadthMetrics,
            crate::domain::MergedRecord,
            crate::domain::Crossover,
            crate::domain::CrossoverKind,
            crate::domain::MaPair,
            crate::application::BreadthUnits,
            crate::application::RangePreset,
            crate::application::SectorPerformance,
            crate::application::CacheStats
        )
    ),
    tags(
        (name = "system", description = "System endpoints for health checks and metrics"),
        (name = "Breadth", description = "Merged market breadth dataset, crossovers and narrative context"),
        (name = "Series", description = "Index and sector series"),
        (name = "Cache", description = "Cache statistics")
    ),
    info(
        title = "Market Breadth Gateway API",
        version = "0.1.0",
        description = "Read-only REST API over a cache-first market breadth pipeline: heterogeneous upstream payloads are normalized, cached with fresh/stale fallbacks and merged into one aligned per-day dataset."
    )
)]
pub struct ApiDoc;
