//! Time-series entities shared by the fetch, merge and presentation layers.

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Milliseconds in one calendar day.
pub const DAY_MS: i64 = 86_400_000;

/// Numeric timestamps below this are seconds, everything else milliseconds.
pub const SECONDS_THRESHOLD: f64 = 10_000_000_000.0;

/// Canonical `(timestamp, value)` unit produced by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct RawPoint {
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    /// Close value at this timestamp
    pub close: f64,
}

impl RawPoint {
    pub fn new(timestamp: i64, close: f64) -> Self {
        Self { timestamp, close }
    }
}

/// Moving-average breadth for a single calendar day.
///
/// Percentages are always derived from the counts, so
/// `ma_k == 100 * count_k / total` holds for every instance (or `0` when
/// `total == 0`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BreadthPoint {
    /// Calendar day (YYYY-MM-DD, UTC)
    pub date: String,
    /// Unix timestamp (milliseconds)
    pub timestamp: i64,
    /// Number of constituents considered
    pub total: u32,
    /// Constituents above their 20-period moving average
    pub count20: u32,
    /// Constituents above their 50-period moving average
    pub count50: u32,
    /// Constituents above their 200-period moving average
    pub count200: u32,
    /// Percentage above MA20
    pub ma20: f64,
    /// Percentage above MA50
    pub ma50: f64,
    /// Percentage above MA200
    pub ma200: f64,
}

impl BreadthPoint {
    /// Build a point from raw counts; the percentages are computed here.
    pub fn from_counts(date: NaiveDate, timestamp: i64, total: u32, counts: [u32; 3]) -> Self {
        let [count20, count50, count200] = counts;
        Self {
            date: format_day(date),
            timestamp,
            total,
            count20,
            count50,
            count200,
            ma20: percentage(count20, total),
            ma50: percentage(count50, total),
            ma200: percentage(count200, total),
        }
    }

    pub fn metrics(&self) -> BreadthMetrics {
        BreadthMetrics {
            total: self.total,
            count20: self.count20,
            count50: self.count50,
            count200: self.count200,
            ma20: self.ma20,
            ma50: self.ma50,
            ma200: self.ma200,
        }
    }
}

/// Breadth fields carried by a merged record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BreadthMetrics {
    pub total: u32,
    pub count20: u32,
    pub count50: u32,
    pub count200: u32,
    pub ma20: f64,
    pub ma50: f64,
    pub ma200: f64,
}

/// One calendar day of the aligned dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MergedRecord {
    /// Calendar day (YYYY-MM-DD, UTC)
    pub date: String,
    /// Start of the day (Unix milliseconds, UTC)
    pub timestamp: i64,
    /// Breadth metrics, when the breadth series covers this day
    pub breadth: Option<BreadthMetrics>,
    /// Close of the fixed reference index
    pub reference_index: Option<f64>,
    /// Close of the secondary cap index
    pub secondary_index: Option<f64>,
    /// Close of the selected sector/stock series
    pub selected_series: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum CrossoverKind {
    Bullish,
    Bearish,
}

/// Which breadth lines are compared for crossovers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MaPair {
    Ma20Ma50,
    Ma50Ma200,
}

impl MaPair {
    pub const ALL: [MaPair; 2] = [MaPair::Ma20Ma50, MaPair::Ma50Ma200];

    /// `(short, long)` breadth values for this pair.
    pub fn lines(self, metrics: &BreadthMetrics) -> (f64, f64) {
        match self {
            MaPair::Ma20Ma50 => (metrics.ma20, metrics.ma50),
            MaPair::Ma50Ma200 => (metrics.ma50, metrics.ma200),
        }
    }
}

/// A crossing of a short breadth line over/under a long one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Crossover {
    pub date: String,
    pub timestamp: i64,
    pub kind: CrossoverKind,
    pub pair: MaPair,
}

fn percentage(count: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * count as f64 / total as f64
    }
}

/// UTC calendar day containing `timestamp_ms`.
pub fn day_of(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}

/// Midnight UTC of `date`, in milliseconds.
pub fn day_start_ms(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

pub fn format_day(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}
