//! HTTP transport for upstream market data APIs.
//!
//! Every request carries a cache-busting query parameter so intermediate HTTP
//! caches never serve a stale body. When the direct request fails the same
//! (cache-busted) URL is retried exactly once through a public relay proxy.

use crate::domain::{Clock, JsonTransport, TransportError};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default public relay; accepts `?url=<percent-encoded url>` and returns the raw body.
pub const DEFAULT_PROXY_URL: &str = "https://api.allorigins.win/raw";

/// Name of the cache-busting query parameter.
pub const CACHE_BUST_PARAM: &str = "_";

/// reqwest-backed transport with a single relay fallback.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    proxy_url: String,
    clock: Arc<dyn Clock>,
}

impl HttpTransport {
    /// Create a transport.
    ///
    /// `timeout` of `None` leaves requests bounded only by the runtime.
    pub fn new(
        proxy_url: &str,
        timeout: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let mut builder = Client::builder().user_agent("MarketBreadthGateway/1.0");
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            proxy_url: proxy_url.to_string(),
            clock,
        })
    }

    /// Append the cache-busting parameter to `url`.
    pub fn cache_busted(url: &str, now_ms: i64) -> Result<Url, TransportError> {
        let mut parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        parsed
            .query_pairs_mut()
            .append_pair(CACHE_BUST_PARAM, &now_ms.to_string());
        Ok(parsed)
    }

    /// Wrap `target` in the relay URL.
    pub fn proxied(proxy_url: &str, target: &Url) -> Result<Url, TransportError> {
        Url::parse_with_params(proxy_url, &[("url", target.as_str())]).map_err(|e| {
            TransportError::InvalidUrl {
                url: proxy_url.to_string(),
                reason: e.to_string(),
            }
        })
    }

    async fn get_once(&self, url: &Url, route: &'static str) -> Result<Value, TransportError> {
        debug!("GET ({}) {}", route, url);
        let result = self.send(url).await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!("upstream_requests_total", "route" => route, "outcome" => outcome)
            .increment(1);
        result
    }

    async fn send(&self, url: &Url) -> Result<Value, TransportError> {
        let response = self
            .client
            .get(url.clone())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<Value>().await.map_err(|e| TransportError::Decode {
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl JsonTransport for HttpTransport {
    async fn fetch_json(&self, url: &str) -> Result<Value, TransportError> {
        let busted = Self::cache_busted(url, self.clock.now_ms())?;

        match self.get_once(&busted, "direct").await {
            Ok(value) => Ok(value),
            Err(direct_err) => {
                warn!("Direct fetch failed, retrying via relay: {}", direct_err);
                let relayed = Self::proxied(&self.proxy_url, &busted)?;
                self.get_once(&relayed, "proxy").await
            }
        }
    }
}
