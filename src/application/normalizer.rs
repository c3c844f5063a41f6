//! Payload normalizer.
//!
//! Upstream series arrive in several JSON layouts. Each layout is a
//! [`PayloadShape`] with a pure matcher; [`normalize`] tries them in a fixed
//! priority order and returns the first match as canonical [`RawPoint`]s.
//! Unrecognized input yields an empty sequence, never an error.

use crate::domain::{day_start_ms, RawPoint, SECONDS_THRESHOLD};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

/// Timestamp field names probed on object records, in priority order.
pub const TIMESTAMP_KEYS: [&str; 6] = ["date", "time", "t", "Date", "Time", "dt"];

/// Value field names probed on object records, in priority order.
pub const VALUE_KEYS: [&str; 9] = [
    "value", "close", "c", "Close", "Price", "price", "v", "adClose", "adjClose",
];

/// Recognized upstream layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// `{ "data": <payload> }`
    Wrapped,
    /// `[[ts, open, high, low, close, ...], ...]` or `[[ts, value], ...]`
    ArrayOfArrays,
    /// `[{ "date": ..., "close": ... }, ...]` with aliased key names
    ArrayOfObjects,
    /// `{ "t": [...], "c": [...] }`
    Columnar,
}

impl PayloadShape {
    /// Matchers are tried in this order. The wrapper comes first so a
    /// `{data: [...]}` body is never mistaken for anything else.
    pub const PRIORITY: [PayloadShape; 4] = [
        PayloadShape::Wrapped,
        PayloadShape::ArrayOfArrays,
        PayloadShape::ArrayOfObjects,
        PayloadShape::Columnar,
    ];

    /// `None` when `raw` does not have this shape.
    pub fn try_parse(self, raw: &Value) -> Option<Vec<RawPoint>> {
        match self {
            PayloadShape::Wrapped => raw.as_object()?.get("data").map(normalize),
            PayloadShape::ArrayOfArrays => {
                let rows = raw.as_array()?;
                if !rows.first()?.is_array() {
                    return None;
                }
                Some(rows.iter().filter_map(parse_array_row).collect())
            }
            PayloadShape::ArrayOfObjects => {
                let rows = raw.as_array()?;
                if !rows.first()?.is_object() {
                    return None;
                }
                Some(
                    rows.iter()
                        .filter_map(Value::as_object)
                        .filter_map(parse_object_row)
                        .collect(),
                )
            }
            PayloadShape::Columnar => {
                let obj = raw.as_object()?;
                let times = obj.get("t")?.as_array()?;
                let closes = obj.get("c")?.as_array()?;
                Some(
                    times
                        .iter()
                        .zip(closes)
                        .filter_map(|(t, c)| Some(RawPoint::new(parse_timestamp(t)?, parse_number(c)?)))
                        .collect(),
                )
            }
        }
    }
}

/// Convert any supported payload into canonical points.
pub fn normalize(raw: &Value) -> Vec<RawPoint> {
    PayloadShape::PRIORITY
        .iter()
        .find_map(|shape| shape.try_parse(raw))
        .unwrap_or_default()
}

/// First shape that matches `raw`, if any.
pub fn detect_shape(raw: &Value) -> Option<PayloadShape> {
    PayloadShape::PRIORITY
        .into_iter()
        .find(|shape| shape.try_parse(raw).is_some())
}

fn parse_array_row(row: &Value) -> Option<RawPoint> {
    let cells = row.as_array()?;
    if cells.len() < 2 {
        return None;
    }
    let close_idx = if cells.len() >= 5 { 4 } else { 1 };
    Some(RawPoint::new(
        parse_timestamp(&cells[0])?,
        parse_number(&cells[close_idx])?,
    ))
}

fn parse_object_row(row: &Map<String, Value>) -> Option<RawPoint> {
    let ts = first_present(row, &TIMESTAMP_KEYS)?;
    let value = first_present(row, &VALUE_KEYS)?;
    Some(RawPoint::new(parse_timestamp(ts)?, parse_number(value)?))
}

/// Value of the first key in `keys` that is present and not null.
pub(crate) fn first_present<'a>(row: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| row.get(*k))
        .find(|v| !v.is_null())
}

/// Finite number from a JSON number or numeric string.
pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Millisecond timestamp from an epoch number (seconds or ms) or a date string.
pub(crate) fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(_) => epoch_to_ms(parse_number(value)?),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(n) if n.is_finite() => epoch_to_ms(n),
                _ => parse_date_string(s),
            }
        }
        _ => None,
    }
}

fn epoch_to_ms(n: f64) -> Option<i64> {
    let ms = if n < SECONDS_THRESHOLD { n * 1000.0 } else { n };
    ms.is_finite().then(|| ms.round() as i64)
}

fn parse_date_string(s: &str) -> Option<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(day_start_ms(date));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
        return Some(day_start_ms(date));
    }
    None
}
