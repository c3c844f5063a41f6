//! Series fetchers with cache-first, stale-fallback policies.
//!
//! Both fetchers follow "try cache, else fetch, else stale cache, else empty"
//! and never surface an error to the caller; they differ in freshness rules.

use crate::application::breadth_payload::{decode_breadth, BreadthUnits};
use crate::application::cache_store::{ttl, CacheStore};
use crate::application::normalizer::normalize;
use crate::domain::{BreadthPoint, JsonTransport, RawPoint, TransportError, DAY_MS};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use utoipa::ToSchema;

/// Lookback used by the "latest" breadth query.
pub const LATEST_LOOKBACK_DAYS: u32 = 5;

/// Cached history may start this many days after the requested lookback
/// (weekends, holidays) and still count as covering it.
pub const COVERAGE_SLACK_DAYS: i64 = 7;

/// Breadth query parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BreadthQuery {
    /// Breadth API endpoint
    pub endpoint: String,
    /// Lookback window in days (the upstream `t` parameter)
    pub lookback_days: u32,
    /// Exchange floors to include (e.g. NYSE, NASDAQ); empty means all
    #[serde(default)]
    pub exchanges: Vec<String>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub volume_ma20_min: Option<f64>,
    pub volume_ma20_max: Option<f64>,
    /// Unit of the endpoint's `ma*` fields; inferred from the payload layout when absent
    pub units: Option<BreadthUnits>,
}

impl BreadthQuery {
    /// Filter-relevant parameters only. The lookback window is deliberately
    /// absent so cached breadth survives range changes.
    pub fn fingerprint_params(&self) -> Value {
        let mut params = Map::new();
        params.insert("endpoint".into(), json!(self.endpoint));
        params.insert("exchanges".into(), json!(self.exchanges));
        params.insert("priceMin".into(), json!(self.price_min));
        params.insert("priceMax".into(), json!(self.price_max));
        params.insert("volumeMa20Min".into(), json!(self.volume_ma20_min));
        params.insert("volumeMa20Max".into(), json!(self.volume_ma20_max));
        if let Some(units) = self.units {
            params.insert("units".into(), json!(units));
        }
        Value::Object(params)
    }

    /// Upstream URL for a query of `lookback_days` in the given mode.
    pub fn url(&self, lookback_days: u32, mode: &str) -> Result<String, TransportError> {
        let mut url = Url::parse(&self.endpoint).map_err(|e| TransportError::InvalidUrl {
            url: self.endpoint.clone(),
            reason: e.to_string(),
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("t", &lookback_days.to_string());
            pairs.append_pair("mode", mode);
            if !self.exchanges.is_empty() {
                pairs.append_pair("exchanges", &self.exchanges.join(","));
            }
            let bounds = [
                ("price_min", self.price_min),
                ("price_max", self.price_max),
                ("vol_ma20_min", self.volume_ma20_min),
                ("vol_ma20_max", self.volume_ma20_max),
            ];
            for (name, value) in bounds {
                if let Some(v) = value {
                    pairs.append_pair(name, &v.to_string());
                }
            }
        }
        Ok(url.into())
    }
}

/// Index and breadth series retrieval.
pub struct SeriesService {
    transport: Arc<dyn JsonTransport>,
    cache: Arc<CacheStore>,
}

impl SeriesService {
    pub fn new(transport: Arc<dyn JsonTransport>, cache: Arc<CacheStore>) -> Self {
        Self { transport, cache }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Fetch an index or sector series.
    ///
    /// Flow:
    /// 1. Fresh cache (4 hours)
    /// 2. Fetch + normalize, caching non-empty results
    /// 3. Stale cache, else empty
    pub async fn fetch_index_series(&self, url: &str) -> Vec<RawPoint> {
        let key = self.cache.key("index", &json!({ "url": url }));

        if let Some(hit) = self.cache.load_as::<Vec<RawPoint>>(&key, Some(ttl::INDEX_MS)).await {
            debug!("Index series served from cache: {}", url);
            return hit.data;
        }

        match self.transport.fetch_json(url).await {
            Ok(raw) => {
                let points = normalize(&raw);
                if !points.is_empty() {
                    info!("Fetched {} points for {}", points.len(), url);
                    self.cache.save(&key, &points).await;
                    return points;
                }
                warn!("Unrecognized or empty payload from {}, trying stale cache", url);
            }
            Err(e) => warn!("Index fetch failed for {}: {}", url, e),
        }

        self.cache
            .load_as::<Vec<RawPoint>>(&key, None)
            .await
            .map(|stale| stale.data)
            .unwrap_or_default()
    }

    /// Fetch the breadth series for `query`.
    ///
    /// Flow:
    /// 1. Cache younger than 5 minutes is returned without network calls
    /// 2. "latest" is always fetched; full "history" only when the cache is
    ///    absent, its history is older than the history TTL, or it does not
    ///    reach back far enough
    /// 3. Overlay cache (when history was not refetched), history, then latest
    /// 4. Persist non-empty results; when nothing usable arrived return the
    ///    cache or empty
    ///
    /// A payload that decodes to no days counts as "no new data", never as an
    /// empty series.
    pub async fn fetch_breadth_series(&self, query: &BreadthQuery) -> Vec<BreadthPoint> {
        let key = self.cache.key("breadth", &query.fingerprint_params());
        let cached = self
            .cache
            .load_as::<BreadthCacheEntry>(&key, None)
            .await
            .filter(|c| !c.data.points.is_empty());

        if let Some(c) = &cached {
            if c.age_ms < ttl::BREADTH_FRESH_MS {
                debug!("Breadth served from fresh cache ({}ms old)", c.age_ms);
                return c.data.points.clone();
            }
        }

        let now = self.cache.clock().now_ms();
        let needs_history = match &cached {
            None => true,
            Some(c) => {
                now - c.data.history_at > ttl::BREADTH_HISTORY_MS
                    || !covers_lookback(&c.data.points, query.lookback_days, now)
            }
        };

        let latest_fut = self.fetch_breadth_payload(query, LATEST_LOOKBACK_DAYS, "latest");
        let history_fut = async {
            if needs_history {
                Some(self.fetch_breadth_payload(query, query.lookback_days, "history").await)
            } else {
                None
            }
        };
        let (latest, history) = tokio::join!(latest_fut, history_fut);

        let latest = usable_days(latest, "latest");
        let history = history.and_then(|result| usable_days(result, "history"));

        if latest.is_none() && history.is_none() {
            warn!("No usable breadth data fetched, returning cached data");
            return cached.map(|c| c.data.points).unwrap_or_default();
        }

        // Refetched history replaces the cached days and restarts the history clock
        let (base, history_at) = match (&history, cached) {
            (Some(_), _) => (Vec::new(), now),
            (None, Some(c)) => (c.data.points, c.data.history_at),
            (None, None) => (Vec::new(), 0),
        };
        let merged = overlay_by_day([base, history.unwrap_or_default(), latest.unwrap_or_default()]);

        info!("Breadth series merged: {} days", merged.len());
        let entry = BreadthCacheEntry {
            history_at,
            points: merged,
        };
        self.cache.save(&key, &entry).await;
        entry.points
    }

    async fn fetch_breadth_payload(
        &self,
        query: &BreadthQuery,
        lookback_days: u32,
        mode: &str,
    ) -> Result<Vec<BreadthPoint>, TransportError> {
        let url = query.url(lookback_days, mode)?;
        let raw = self.transport.fetch_json(&url).await?;
        let points = decode_breadth(&raw, query.units);
        debug!("Breadth {} payload decoded to {} days", mode, points.len());
        Ok(points)
    }
}

/// Persisted breadth series together with the time its history was last
/// fetched. Latest-only refreshes rewrite the entry but keep `history_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BreadthCacheEntry {
    history_at: i64,
    points: Vec<BreadthPoint>,
}

fn usable_days(
    result: Result<Vec<BreadthPoint>, TransportError>,
    mode: &str,
) -> Option<Vec<BreadthPoint>> {
    match result {
        Ok(points) if !points.is_empty() => Some(points),
        Ok(_) => {
            warn!("Breadth {} payload held no usable days", mode);
            None
        }
        Err(e) => {
            warn!("Breadth {} fetch failed: {}", mode, e);
            None
        }
    }
}

/// Merge layers by calendar day; later layers win on collisions.
pub fn overlay_by_day<I>(layers: I) -> Vec<BreadthPoint>
where
    I: IntoIterator<Item = Vec<BreadthPoint>>,
{
    let mut by_day: BTreeMap<String, BreadthPoint> = BTreeMap::new();
    for point in layers.into_iter().flatten() {
        by_day.insert(point.date.clone(), point);
    }
    let mut merged: Vec<BreadthPoint> = by_day.into_values().collect();
    merged.sort_by_key(|p| p.timestamp);
    merged
}

fn covers_lookback(points: &[BreadthPoint], lookback_days: u32, now: i64) -> bool {
    let Some(first) = points.first() else {
        return false;
    };
    let required_start = now - (lookback_days as i64 - COVERAGE_SLACK_DAYS).max(0) * DAY_MS;
    first.timestamp <= required_start
}
