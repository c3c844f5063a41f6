use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

/// Axum middleware: count requests and record latency per route template.
///
/// The matched route (e.g. `/v1/series/{name}`) is used as the label so path
/// parameters do not explode metric cardinality.
pub async fn record_http_metrics(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status().as_u16();
    let status_class = format!("{}xx", status / 100);
    metrics::counter!(
        "http_requests_total",
        "method" => method.clone(),
        "path" => path.clone(),
        "status" => status.to_string(),
        "status_class" => status_class
    )
    .increment(1);
    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method,
        "path" => path
    )
    .record(latency.as_secs_f64());

    if latency.as_millis() > 1000 {
        tracing::warn!("Slow HTTP request: {}ms", latency.as_millis());
    }

    response
}
