//! Domain layer - Core entities and the traits the pipeline is built on.
//!
//! This module defines the domain model for the market breadth gateway,
//! following clean architecture principles. It contains:
//! - Seam traits for transport, persistence and time
//! - Time-series entities (raw points, breadth points, merged records)
//! - Typed errors surfaced by the transport and dashboard layers

pub mod error;
pub mod series;

pub use error::{DashboardError, TransportError};
pub use series::*;

use async_trait::async_trait;
use serde_json::Value;

/// Transport trait for fetching JSON documents from upstream APIs.
///
/// Implementations must be thread-safe (`Send + Sync`) for use in async
/// contexts.
///
/// # Implementations
///
/// See `infrastructure::http_client::HttpTransport` for the reqwest
/// implementation with relay fallback.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JsonTransport: Send + Sync {
    /// Fetch and parse a JSON document.
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute upstream URL
    ///
    /// # Errors
    ///
    /// Returns `TransportError` only after every attempt the implementation
    /// makes has failed.
    async fn fetch_json(&self, url: &str) -> Result<Value, TransportError>;
}

/// Repository trait for cache persistence.
///
/// A plain string key/value store. Freshness is decided by the reader from
/// the timestamp embedded in each value, so stores never expire entries on
/// their own.
///
/// # Implementations
///
/// - `infrastructure::memory_store::MemoryStore` (process-local)
/// - `infrastructure::parquet_store::ParquetStore` (durable, on disk)
/// - `infrastructure::redis::RedisRepository` (shared)
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a stored value by key.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(String))` if the key exists, `Ok(None)` if it
    /// doesn't, or an error if the backend fails.
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Store a value, replacing any previous value under the same key.
    ///
    /// # Errors
    ///
    /// - Returns error if the backend is unreachable
    /// - Returns error if the value cannot be persisted (quota, disk)
    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()>;

    /// Short backend name for health and stats output.
    fn backend(&self) -> &'static str;

    /// `(entries, bytes)` held on disk, for backends that can tell.
    fn disk_usage(&self) -> Option<(usize, u64)> {
        None
    }
}

/// Source of "now" for cache freshness and cache-busting.
pub trait Clock: Send + Sync {
    /// Current Unix time in milliseconds.
    fn now_ms(&self) -> i64;
}
