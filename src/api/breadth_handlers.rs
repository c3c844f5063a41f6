//! HTTP handlers for the merged breadth dataset.
//!
//! Query parameters override the configured default view. All data comes
//! from the cache-first series fetchers, so handlers never fail on upstream
//! outages; an empty result is reported as `404 No data available`.

use crate::api::state::AppState;
use crate::application::{
    BreadthUnits, CacheStats, DashboardRequest, RangePreset, RefreshOutcome, SectorPerformance,
};
use crate::domain::{BreadthPoint, Crossover, DashboardError, MergedRecord, RawPoint};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

// ============================================================================
// Query Parameters
// ============================================================================

/// Dashboard view parameters; anything omitted falls back to configuration
#[derive(Debug, Clone, Default, Deserialize, IntoParams, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DashboardQuery {
    /// Breadth lookback window in days (1-3650)
    #[validate(range(min = 1, max = 3650))]
    pub lookback_days: Option<u32>,
    /// Comma-separated exchange floors (e.g. "NYSE,NASDAQ")
    #[validate(length(max = 200))]
    pub exchanges: Option<String>,
    #[validate(range(min = 0.0))]
    pub price_min: Option<f64>,
    #[validate(range(min = 0.0))]
    pub price_max: Option<f64>,
    #[validate(range(min = 0.0))]
    pub volume_ma20_min: Option<f64>,
    #[validate(range(min = 0.0))]
    pub volume_ma20_max: Option<f64>,
    /// Breadth API endpoint
    #[validate(url)]
    pub breadth_endpoint: Option<String>,
    /// Unit of the endpoint's `ma*` fields (percent or count)
    pub breadth_units: Option<BreadthUnits>,
    /// Catalog name of the selected sector/stock series
    #[validate(length(min = 1, max = 100))]
    pub selected_series: Option<String>,
    /// Inclusive start date (YYYY-MM-DD)
    #[param(value_type = Option<String>, format = Date, example = "2024-01-01")]
    pub from: Option<NaiveDate>,
    /// Inclusive end date (YYYY-MM-DD)
    #[param(value_type = Option<String>, format = Date, example = "2024-06-30")]
    pub to: Option<NaiveDate>,
    /// Trailing window when no dates are given (1M, 3M, 6M, 1Y, 3Y, 5Y, 7Y)
    pub range: Option<RangePreset>,
}

impl DashboardQuery {
    /// Overlay the supplied parameters on `defaults`.
    pub fn apply(&self, defaults: &DashboardRequest) -> DashboardRequest {
        let mut request = defaults.clone();
        if let Some(days) = self.lookback_days {
            request.lookback_days = days;
        }
        if let Some(exchanges) = &self.exchanges {
            request.exchanges = exchanges
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        request.price_min = self.price_min.or(request.price_min);
        request.price_max = self.price_max.or(request.price_max);
        request.volume_ma20_min = self.volume_ma20_min.or(request.volume_ma20_min);
        request.volume_ma20_max = self.volume_ma20_max.or(request.volume_ma20_max);
        if let Some(endpoint) = &self.breadth_endpoint {
            request.breadth_endpoint = endpoint.clone();
        }
        request.breadth_units = self.breadth_units.or(request.breadth_units);
        if let Some(selected) = &self.selected_series {
            request.selected_series = Some(selected.clone());
        }
        if self.from.is_some() || self.to.is_some() {
            request.from_date = self.from;
            request.to_date = self.to;
        }
        if let Some(range) = self.range {
            request.range = range;
        }
        request
    }

    fn check(&self) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
        if let Err(validation_errors) = self.validate() {
            return Err(bad_request("Validation failed", format!("{:?}", validation_errors)));
        }
        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(bad_request(
                    "Validation failed",
                    format!("from ({}) is after to ({})", from, to),
                ));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Merged dataset of the latest refresh
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MergedResponse {
    pub records: Vec<MergedRecord>,
    pub crossovers: Vec<Crossover>,
    /// Refresh generation that produced this dataset
    pub generation: u64,
}

/// Error response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn bad_request(error: &str, details: String) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: error.to_string(),
            details: Some(details),
        }),
    )
}

fn no_data() -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: DashboardError::NoData.to_string(),
            details: None,
        }),
    )
}

fn dashboard_error(err: DashboardError) -> ApiError {
    match err {
        DashboardError::NoData => no_data(),
        DashboardError::UnknownSeries(name) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "Unknown series".to_string(),
                details: Some(name),
            }),
        ),
    }
}

// ============================================================================
// Breadth Handlers
// ============================================================================

/// Get the merged breadth dataset
#[utoipa::path(
    get,
    path = "/v1/breadth/merged",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Merged per-day records and crossovers", body = MergedResponse),
        (status = 400, description = "Invalid input parameters", body = ErrorResponse),
        (status = 404, description = "No data in range or unknown series", body = ErrorResponse),
        (status = 409, description = "Superseded by a newer refresh", body = ErrorResponse)
    ),
    description = "Runs a dashboard refresh: breadth, reference index, secondary index and the selected series are fetched concurrently (cache first), aligned by calendar day and filtered to the requested range.",
    tag = "Breadth"
)]
pub async fn merged_handler(
    Query(query): Query<DashboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<MergedResponse>, ApiError> {
    query.check()?;
    let request = query.apply(&state.defaults);

    match state.dashboard.refresh(request).await.map_err(dashboard_error)? {
        RefreshOutcome::Completed(snapshot) => Ok(Json(MergedResponse {
            records: snapshot.records.clone(),
            crossovers: snapshot.crossovers.clone(),
            generation: snapshot.generation,
        })),
        RefreshOutcome::Superseded { generation, latest } => Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Superseded by a newer refresh".to_string(),
                details: Some(format!("generation {} superseded by {}", generation, latest)),
            }),
        )),
    }
}

/// Get the breadth series
#[utoipa::path(
    get,
    path = "/v1/breadth/series",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Breadth points, ascending by date", body = Vec<BreadthPoint>),
        (status = 400, description = "Invalid input parameters", body = ErrorResponse),
        (status = 404, description = "No data available", body = ErrorResponse)
    ),
    description = "Returns the cached/merged breadth series for the filter set. The lookback window does not affect the cache key.",
    tag = "Breadth"
)]
pub async fn breadth_series_handler(
    Query(query): Query<DashboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<BreadthPoint>>, ApiError> {
    query.check()?;
    let request = query.apply(&state.defaults);
    let points = state.dashboard.breadth_series(&request.breadth_query()).await;
    if points.is_empty() {
        return Err(no_data());
    }
    Ok(Json(points))
}

/// Get a configured index series
#[utoipa::path(
    get,
    path = "/v1/series/{name}",
    params(
        ("name" = String, Path, description = "Catalog name of the series (case-insensitive)")
    ),
    responses(
        (status = 200, description = "Normalized index points", body = Vec<RawPoint>),
        (status = 404, description = "Unknown series or no data", body = ErrorResponse)
    ),
    tag = "Series"
)]
pub async fn series_handler(
    Path(name): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<Vec<RawPoint>>, ApiError> {
    let points = state.dashboard.named_series(&name).await.map_err(dashboard_error)?;
    if points.is_empty() {
        return Err(no_data());
    }
    Ok(Json(points))
}

/// Get the narrative context table
#[utoipa::path(
    get,
    path = "/v1/breadth/context",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Deterministic text rendering of the merged slice", content_type = "text/plain"),
        (status = 400, description = "Invalid input parameters", body = ErrorResponse),
        (status = 404, description = "No data in range or unknown series", body = ErrorResponse)
    ),
    description = "Renders the merged records, crossovers and sector ranking as a plain-text table for the AI analysis collaborator. Identical data renders identical text.",
    tag = "Breadth"
)]
pub async fn context_handler(
    Query(query): Query<DashboardQuery>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    query.check()?;
    let request = query.apply(&state.defaults);
    let text = state.dashboard.context(&request).await.map_err(dashboard_error)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text))
}

/// Get the sector performance ranking
#[utoipa::path(
    get,
    path = "/v1/sectors/ranking",
    params(DashboardQuery),
    responses(
        (status = 200, description = "Sectors ordered by percent change", body = Vec<SectorPerformance>),
        (status = 400, description = "Invalid input parameters", body = ErrorResponse),
        (status = 404, description = "No data available", body = ErrorResponse)
    ),
    description = "Ranks the configured sector indices by percent change over the requested range. Only the date parameters apply.",
    tag = "Series"
)]
pub async fn sectors_handler(
    Query(query): Query<DashboardQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<SectorPerformance>>, ApiError> {
    query.check()?;
    let request = query.apply(&state.defaults);
    let ranking = state.dashboard.sector_ranking(&request.date_range()).await;
    if ranking.is_empty() {
        return Err(no_data());
    }
    Ok(Json(ranking))
}

// ============================================================================
// Cache Handlers
// ============================================================================

/// Get cache statistics
#[utoipa::path(
    get,
    path = "/v1/cache/stats",
    responses(
        (status = 200, description = "Cache counters and backend usage", body = CacheStats)
    ),
    tag = "Cache"
)]
pub async fn cache_stats_handler(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DashboardRequest {
        DashboardRequest {
            lookback_days: 365,
            exchanges: vec!["NYSE".to_string()],
            price_min: Some(5.0),
            price_max: None,
            volume_ma20_min: None,
            volume_ma20_max: None,
            breadth_endpoint: "https://breadth.example.com/api".to_string(),
            breadth_units: None,
            selected_series: Some("Technology".to_string()),
            from_date: None,
            to_date: None,
            range: RangePreset::OneYear,
        }
    }

    #[test]
    fn test_empty_query_keeps_defaults() {
        assert_eq!(DashboardQuery::default().apply(&defaults()), defaults());
    }

    #[test]
    fn test_query_overrides() {
        let query = DashboardQuery {
            exchanges: Some("NYSE, NASDAQ,,".to_string()),
            price_max: Some(500.0),
            range: Some(RangePreset::OneMonth),
            to: NaiveDate::from_ymd_opt(2024, 6, 30),
            ..Default::default()
        };
        let request = query.apply(&defaults());
        assert_eq!(request.exchanges, vec!["NYSE", "NASDAQ"]);
        assert_eq!(request.price_min, Some(5.0));
        assert_eq!(request.price_max, Some(500.0));
        assert_eq!(request.range, RangePreset::OneMonth);
        assert_eq!(request.from_date, None);
        assert_eq!(request.to_date, NaiveDate::from_ymd_opt(2024, 6, 30));
    }

    #[test]
    fn test_validation() {
        let bad_lookback = DashboardQuery {
            lookback_days: Some(0),
            ..Default::default()
        };
        assert!(bad_lookback.check().is_err());

        let bad_url = DashboardQuery {
            breadth_endpoint: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(bad_url.check().is_err());

        let inverted = DashboardQuery {
            from: NaiveDate::from_ymd_opt(2024, 2, 1),
            to: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..Default::default()
        };
        let (status, Json(body)) = inverted.check().unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.details.unwrap().contains("after"));
    }

    #[test]
    fn test_no_data_body() {
        let (status, Json(body)) = dashboard_error(DashboardError::NoData);
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"error": "No data available"})
        );
    }
}
