//! Merge engine.
//!
//! Aligns the breadth series and up to three index series into one record
//! per UTC calendar day, then narrows the result to a date range.

use crate::domain::{
    day_of, day_start_ms, format_day, BreadthPoint, Crossover, CrossoverKind, MaPair,
    MergedRecord, RawPoint, DAY_MS,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Trailing window selector used when no explicit dates are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
pub enum RangePreset {
    #[serde(rename = "1M")]
    OneMonth,
    #[serde(rename = "3M")]
    ThreeMonths,
    #[serde(rename = "6M")]
    SixMonths,
    #[default]
    #[serde(rename = "1Y")]
    OneYear,
    #[serde(rename = "3Y")]
    ThreeYears,
    #[serde(rename = "5Y")]
    FiveYears,
    #[serde(rename = "7Y")]
    SevenYears,
}

impl RangePreset {
    pub const ALL: [RangePreset; 7] = [
        RangePreset::OneMonth,
        RangePreset::ThreeMonths,
        RangePreset::SixMonths,
        RangePreset::OneYear,
        RangePreset::ThreeYears,
        RangePreset::FiveYears,
        RangePreset::SevenYears,
    ];

    pub fn days(self) -> i64 {
        match self {
            RangePreset::OneMonth => 30,
            RangePreset::ThreeMonths => 90,
            RangePreset::SixMonths => 180,
            RangePreset::OneYear => 365,
            RangePreset::ThreeYears => 1095,
            RangePreset::FiveYears => 1825,
            RangePreset::SevenYears => 2555,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RangePreset::OneMonth => "1M",
            RangePreset::ThreeMonths => "3M",
            RangePreset::SixMonths => "6M",
            RangePreset::OneYear => "1Y",
            RangePreset::ThreeYears => "3Y",
            RangePreset::FiveYears => "5Y",
            RangePreset::SevenYears => "7Y",
        }
    }
}

impl fmt::Display for RangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RangePreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RangePreset::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown range '{}', expected one of 1M, 3M, 6M, 1Y, 3Y, 5Y, 7Y", s))
    }
}

/// Date filter applied after merging.
///
/// Explicit dates take precedence over the preset. `to` is inclusive of the
/// whole day; a single bound leaves the other side open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    #[schema(value_type = Option<String>, format = Date)]
    pub from: Option<NaiveDate>,
    #[schema(value_type = Option<String>, format = Date)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    pub preset: RangePreset,
}

impl DateRange {
    pub fn preset(preset: RangePreset) -> Self {
        Self { from: None, to: None, preset }
    }

    pub fn between(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to, preset: RangePreset::default() }
    }

    /// `[lower, upper)` millisecond bounds relative to `now_ms`.
    pub fn bounds(&self, now_ms: i64) -> (Option<i64>, Option<i64>) {
        if self.from.is_none() && self.to.is_none() {
            return (Some(now_ms - self.preset.days() * DAY_MS), None);
        }
        (
            self.from.map(day_start_ms),
            self.to.map(|d| day_start_ms(d) + DAY_MS),
        )
    }
}

/// Align the four series by calendar day, ascending.
///
/// A series only fills its own field, and only for days it has a point on.
/// Within one series a later point on the same day replaces an earlier one.
pub fn merge(
    breadth: &[BreadthPoint],
    reference: &[RawPoint],
    secondary: &[RawPoint],
    selected: &[RawPoint],
) -> Vec<MergedRecord> {
    let mut days: BTreeMap<NaiveDate, MergedRecord> = BTreeMap::new();

    for point in breadth {
        if let Some(day) = day_of(point.timestamp) {
            record_for(&mut days, day).breadth = Some(point.metrics());
        }
    }

    fill(&mut days, reference, |r, close| r.reference_index = Some(close));
    fill(&mut days, secondary, |r, close| r.secondary_index = Some(close));
    fill(&mut days, selected, |r, close| r.selected_series = Some(close));

    // BTreeMap iteration is already ascending by day
    days.into_values().collect()
}

fn fill(
    days: &mut BTreeMap<NaiveDate, MergedRecord>,
    points: &[RawPoint],
    set: impl Fn(&mut MergedRecord, f64),
) {
    for point in points {
        if let Some(day) = day_of(point.timestamp) {
            set(record_for(days, day), point.close);
        }
    }
}

fn record_for(days: &mut BTreeMap<NaiveDate, MergedRecord>, day: NaiveDate) -> &mut MergedRecord {
    days.entry(day).or_insert_with(|| MergedRecord {
        date: format_day(day),
        timestamp: day_start_ms(day),
        breadth: None,
        reference_index: None,
        secondary_index: None,
        selected_series: None,
    })
}

/// Records whose timestamp falls inside `range`.
pub fn filter_range(records: &[MergedRecord], range: &DateRange, now_ms: i64) -> Vec<MergedRecord> {
    let (lower, upper) = range.bounds(now_ms);
    records
        .iter()
        .filter(|r| lower.map_or(true, |lo| r.timestamp >= lo))
        .filter(|r| upper.map_or(true, |hi| r.timestamp < hi))
        .cloned()
        .collect()
}

/// Merge then filter in one step.
pub fn merge_in_range(
    breadth: &[BreadthPoint],
    reference: &[RawPoint],
    secondary: &[RawPoint],
    selected: &[RawPoint],
    range: &DateRange,
    now_ms: i64,
) -> Vec<MergedRecord> {
    filter_range(&merge(breadth, reference, secondary, selected), range, now_ms)
}

/// Short/long breadth line crossings between consecutive breadth-bearing records.
pub fn detect_crossovers(records: &[MergedRecord]) -> Vec<Crossover> {
    let with_breadth: Vec<_> = records
        .iter()
        .filter_map(|r| r.breadth.map(|b| (r, b)))
        .collect();

    let mut crossovers = Vec::new();
    for window in with_breadth.windows(2) {
        let (_, prev) = window[0];
        let (record, cur) = window[1];
        for pair in MaPair::ALL {
            let (prev_short, prev_long) = pair.lines(&prev);
            let (cur_short, cur_long) = pair.lines(&cur);
            let kind = if prev_short <= prev_long && cur_short > cur_long {
                CrossoverKind::Bullish
            } else if prev_short >= prev_long && cur_short < cur_long {
                CrossoverKind::Bearish
            } else {
                continue;
            };
            crossovers.push(Crossover {
                date: record.date.clone(),
                timestamp: record.timestamp,
                kind,
                pair,
            });
        }
    }
    crossovers
}
