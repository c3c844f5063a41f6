//! Versioned cache store with fresh and stale lookups.
//!
//! Every key is namespaced by a cache-format version, so bumping the version
//! orphans all previously written entries without a migration or deletion
//! pass. Values are stored as `{timestamp, data}`; freshness is decided on
//! read by comparing `now - timestamp` against a caller-supplied TTL.

use crate::domain::{Clock, KeyValueStore};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use utoipa::ToSchema;

/// Current cache-format version. Bump to orphan every existing entry.
pub const CACHE_VERSION: &str = "mbg_v3";

/// Freshness windows for the two fetch policies
pub mod ttl {
    /// Index and sector series (4 hours)
    pub const INDEX_MS: i64 = 4 * 60 * 60 * 1000;

    /// Breadth entries younger than this are served without any network call (5 minutes)
    pub const BREADTH_FRESH_MS: i64 = 5 * 60 * 1000;

    /// Breadth history older than this is refetched in full (4 hours)
    pub const BREADTH_HISTORY_MS: i64 = 4 * 60 * 60 * 1000;
}

/// Persisted envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry<T> {
    timestamp: i64,
    data: T,
}

/// A cache read together with its age.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPayload<T = Value> {
    pub data: T,
    pub written_at: i64,
    pub age_ms: i64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    expired: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    write_failures: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CacheStats {
    pub backend: String,
    pub version: String,
    /// Reads answered within their TTL
    pub hits: u64,
    /// Reads answered without a TTL bound (stale fallback)
    pub stale_hits: u64,
    /// Reads rejected because the entry was older than its TTL
    pub expired: u64,
    /// Reads with no usable entry (absent or corrupt)
    pub misses: u64,
    pub writes: u64,
    pub write_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_bytes: Option<u64>,
}

/// Deterministic fingerprint of a parameter object.
///
/// Object keys are sorted at every nesting level before serialization, so
/// identical parameter sets produce identical strings regardless of the order
/// in which keys were inserted.
pub fn fingerprint(params: &Value) -> String {
    canonicalize(params).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let sorted: BTreeMap<&String, Value> =
                obj.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Shared cache front over any [`KeyValueStore`].
pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    version: String,
    counters: Counters,
}

impl CacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self::with_version(store, clock, CACHE_VERSION)
    }

    pub fn with_version(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock,
            version: version.into(),
            counters: Counters::default(),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// `<version>_<operation>_<fingerprint>`
    pub fn key(&self, operation: &str, params: &Value) -> String {
        format!("{}_{}_{}", self.version, operation, fingerprint(params))
    }

    /// Persist `payload` under `key`, stamped with the current time.
    ///
    /// Best effort: failures are logged and swallowed so freshly fetched data
    /// is always returned to the caller.
    pub async fn save<T: Serialize>(&self, key: &str, payload: &T) {
        let entry = StoredEntry {
            timestamp: self.clock.now_ms(),
            data: payload,
        };
        let json = match serde_json::to_string(&entry) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize cache entry {}: {}", key, e);
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        match self.store.set(key, &json).await {
            Ok(()) => {
                debug!("Cache write: {}", key);
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Failed to write cache entry {} ({}): {}", key, self.store.backend(), e);
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_operations_total", "operation" => "write_failure")
                    .increment(1);
            }
        }
    }

    /// Read the raw JSON payload under `key`.
    ///
    /// With `Some(ttl_ms)` the entry is returned only while `age <= ttl_ms`;
    /// with `None` it is returned regardless of age.
    pub async fn load(&self, key: &str, ttl_ms: Option<i64>) -> Option<CachedPayload<Value>> {
        self.load_as::<Value>(key, ttl_ms).await
    }

    /// Typed variant of [`CacheStore::load`]. Entries that fail to
    /// deserialize as `T` are treated as a miss.
    pub async fn load_as<T: DeserializeOwned>(
        &self,
        key: &str,
        ttl_ms: Option<i64>,
    ) -> Option<CachedPayload<T>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return self.miss(key),
            Err(e) => {
                warn!("Cache read failed for {}: {}", key, e);
                return self.miss(key);
            }
        };

        let entry: StoredEntry<T> = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                return self.miss(key);
            }
        };

        let age_ms = (self.clock.now_ms() - entry.timestamp).max(0);
        match ttl_ms {
            Some(ttl) if age_ms > ttl => {
                debug!("Cache expired: {} (age {}ms > {}ms)", key, age_ms, ttl);
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_operations_total", "operation" => "expired").increment(1);
                return None;
            }
            Some(_) => {
                debug!("Cache hit: {}", key);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_operations_total", "operation" => "hit").increment(1);
            }
            None => {
                debug!("Stale cache read: {} (age {}ms)", key, age_ms);
                self.counters.stale_hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("cache_operations_total", "operation" => "stale_hit")
                    .increment(1);
            }
        }

        Some(CachedPayload {
            data: entry.data,
            written_at: entry.timestamp,
            age_ms,
        })
    }

    fn miss<T>(&self, key: &str) -> Option<T> {
        debug!("Cache miss: {}", key);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("cache_operations_total", "operation" => "miss").increment(1);
        None
    }

    pub fn stats(&self) -> CacheStats {
        let usage = self.store.disk_usage();
        CacheStats {
            backend: self.store.backend().to_string(),
            version: self.version.clone(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            stale_hits: self.counters.stale_hits.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
            disk_entries: usage.map(|(entries, _)| entries),
            disk_bytes: usage.map(|(_, bytes)| bytes),
        }
    }
}
