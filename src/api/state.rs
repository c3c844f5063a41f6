use crate::application::{CacheStore, DashboardRequest, DashboardService};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub dashboard: Arc<DashboardService>,
    pub cache: Arc<CacheStore>,
    /// Base view that query parameters override
    pub defaults: Arc<DashboardRequest>,
    /// Installed once at startup; absent when no recorder is installed
    pub metrics: Option<PrometheusHandle>,
}
