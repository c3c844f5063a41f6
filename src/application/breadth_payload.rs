//! Decoding of upstream breadth payloads.
//!
//! Breadth endpoints answer in one of two layouts:
//!
//! - **flat**: one object per day carrying `ma20/ma50/ma200` (or
//!   `avg_ma20`-style aliases), optional `count20`-style counts and `total`;
//! - **complex**: `{ma20: [...], ma50: [...], ma200: [...]}` where each
//!   sub-series holds `{date, value, total}` per day and must be pivoted into
//!   one record per date.
//!
//! The two layouts historically used the same field names with different
//! units, so every source carries an explicit [`BreadthUnits`] tag. Without a
//! tag the per-layout default applies (flat = percent, complex = count).

use crate::application::normalizer::{first_present, parse_number, parse_timestamp, TIMESTAMP_KEYS};
use crate::domain::{day_of, day_start_ms, BreadthPoint};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use utoipa::ToSchema;

const PERIODS: [u32; 3] = [20, 50, 200];
const TOTAL_KEYS: [&str; 4] = ["total", "total_count", "totalCount", "count"];

/// Unit of the `ma*` fields of a breadth source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BreadthUnits {
    /// Values are percentages of `total` (0-100)
    Percent,
    /// Values are counts of constituents above the moving average
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreadthShape {
    Flat,
    Complex,
}

impl BreadthShape {
    pub fn default_units(self) -> BreadthUnits {
        match self {
            BreadthShape::Flat => BreadthUnits::Percent,
            BreadthShape::Complex => BreadthUnits::Count,
        }
    }
}

/// Detect the layout of `raw` after peeling `{data: ...}` wrappers.
pub fn detect_breadth_shape(raw: &Value) -> Option<BreadthShape> {
    let raw = unwrap_data(raw);
    if is_complex(raw) {
        Some(BreadthShape::Complex)
    } else if raw.as_array().and_then(|a| a.first()).is_some_and(Value::is_object) {
        Some(BreadthShape::Flat)
    } else {
        None
    }
}

/// Decode a breadth payload into one point per calendar day, ascending.
///
/// Records that lack a date, a total, or any of the three metrics are
/// dropped. Unknown layouts decode to an empty sequence.
pub fn decode_breadth(raw: &Value, units: Option<BreadthUnits>) -> Vec<BreadthPoint> {
    let raw = unwrap_data(raw);
    let Some(shape) = detect_breadth_shape(raw) else {
        return Vec::new();
    };
    let units = units.unwrap_or(shape.default_units());

    let by_day: BTreeMap<NaiveDate, BreadthPoint> = match shape {
        BreadthShape::Flat => raw
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(Value::as_object)
            .filter_map(|row| decode_flat_row(row, units))
            .collect(),
        BreadthShape::Complex => pivot_complex(raw, units),
    };
    by_day.into_values().collect()
}

fn unwrap_data(mut raw: &Value) -> &Value {
    while let Some(inner) = raw.as_object().and_then(|o| o.get("data")) {
        if is_complex(raw) {
            break;
        }
        raw = inner;
    }
    raw
}

fn is_complex(raw: &Value) -> bool {
    raw.as_object().is_some_and(|obj| {
        PERIODS
            .iter()
            .any(|p| obj.get(&format!("ma{}", p)).is_some_and(Value::is_array))
    })
}

fn decode_flat_row(row: &Map<String, Value>, units: BreadthUnits) -> Option<(NaiveDate, BreadthPoint)> {
    let (date, timestamp) = row_day(row)?;
    let total = to_count(parse_number(first_present(row, &TOTAL_KEYS)?)?)?;

    let mut counts = [0u32; 3];
    for (slot, period) in counts.iter_mut().zip(PERIODS) {
        *slot = flat_count(row, period, total, units)?;
    }
    Some((date, BreadthPoint::from_counts(date, timestamp, total, counts)))
}

fn flat_count(row: &Map<String, Value>, period: u32, total: u32, units: BreadthUnits) -> Option<u32> {
    let count_keys = [
        format!("count{}", period),
        format!("count_ma{}", period),
        format!("above_ma{}", period),
    ];
    let count_keys: Vec<&str> = count_keys.iter().map(String::as_str).collect();
    if let Some(count) = first_present(row, &count_keys).and_then(parse_number) {
        return clamp_count(count, total);
    }

    let ma_keys = [
        format!("ma{}", period),
        format!("avg_ma{}", period),
        format!("pct_ma{}", period),
    ];
    let ma_keys: Vec<&str> = ma_keys.iter().map(String::as_str).collect();
    let value = parse_number(first_present(row, &ma_keys)?)?;
    units_to_count(value, total, units)
}

#[derive(Default)]
struct PartialDay {
    total: Option<u32>,
    values: [Option<f64>; 3],
}

fn pivot_complex(raw: &Value, units: BreadthUnits) -> BTreeMap<NaiveDate, BreadthPoint> {
    let Some(obj) = raw.as_object() else {
        return BTreeMap::new();
    };

    let mut days: BTreeMap<NaiveDate, PartialDay> = BTreeMap::new();
    for (idx, period) in PERIODS.iter().enumerate() {
        let Some(series) = obj.get(&format!("ma{}", period)).and_then(Value::as_array) else {
            continue;
        };
        for row in series.iter().filter_map(Value::as_object) {
            let Some((date, _)) = row_day(row) else {
                continue;
            };
            let Some(value) = row.get("value").and_then(parse_number) else {
                continue;
            };
            let day = days.entry(date).or_default();
            day.values[idx] = Some(value);
            if day.total.is_none() {
                day.total = first_present(row, &TOTAL_KEYS)
                    .and_then(parse_number)
                    .and_then(to_count);
            }
        }
    }

    days.into_iter()
        .filter_map(|(date, day)| {
            let total = day.total?;
            let mut counts = [0u32; 3];
            for (slot, value) in counts.iter_mut().zip(day.values) {
                *slot = units_to_count(value?, total, units)?;
            }
            Some((date, BreadthPoint::from_counts(date, day_start_ms(date), total, counts)))
        })
        .collect()
}

/// Calendar day of a record; the point timestamp is the start of that day.
fn row_day(row: &Map<String, Value>) -> Option<(NaiveDate, i64)> {
    let mut keys: Vec<&str> = TIMESTAMP_KEYS.to_vec();
    keys.push("timestamp");
    let ts = parse_timestamp(first_present(row, &keys)?)?;
    let date = day_of(ts)?;
    Some((date, day_start_ms(date)))
}

fn units_to_count(value: f64, total: u32, units: BreadthUnits) -> Option<u32> {
    match units {
        BreadthUnits::Count => clamp_count(value, total),
        BreadthUnits::Percent => clamp_count(value * total as f64 / 100.0, total),
    }
}

fn clamp_count(value: f64, total: u32) -> Option<u32> {
    let count = to_count(value)?;
    Some(count.min(total))
}

fn to_count(value: f64) -> Option<u32> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value.round().min(u32::MAX as f64) as u32)
}
