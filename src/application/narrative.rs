//! Narrative context rendering.
//!
//! Produces the plain-text data table handed to the AI analysis collaborator.
//! Output depends only on the inputs: identical slices render byte-identical
//! text, so a conversation can be replayed against the same context.

use crate::application::merge::DateRange;
use crate::domain::{Crossover, CrossoverKind, MaPair, MergedRecord, RawPoint};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt::Write;
use utoipa::ToSchema;

/// Relative performance of one sector index over the active range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SectorPerformance {
    pub name: String,
    pub start_close: f64,
    pub end_close: f64,
    /// Percent change from first to last close
    pub change_pct: f64,
    /// 1 is the strongest sector
    pub rank: usize,
}

/// Column labels and size limits for [`render_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextOptions {
    pub reference_label: String,
    pub secondary_label: String,
    pub selected_label: String,
    /// Most recent rows kept in the table
    pub max_rows: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            reference_label: "reference".to_string(),
            secondary_label: "secondary".to_string(),
            selected_label: "selected".to_string(),
            max_rows: 400,
        }
    }
}

/// Rank sector series by percent change across `range`.
///
/// Series with fewer than two points in range, or a zero starting close,
/// are left out. Ties are broken by name.
pub fn rank_sectors(
    series: &[(String, Vec<RawPoint>)],
    range: &DateRange,
    now_ms: i64,
) -> Vec<SectorPerformance> {
    let (lower, upper) = range.bounds(now_ms);
    let in_range = |p: &&RawPoint| {
        lower.map_or(true, |lo| p.timestamp >= lo) && upper.map_or(true, |hi| p.timestamp < hi)
    };

    let mut ranked: Vec<SectorPerformance> = series
        .iter()
        .filter_map(|(name, points)| {
            let start = points.iter().filter(in_range).min_by_key(|p| p.timestamp)?;
            let end = points.iter().filter(in_range).max_by_key(|p| p.timestamp)?;
            if start.timestamp == end.timestamp || start.close == 0.0 {
                return None;
            }
            Some(SectorPerformance {
                name: name.clone(),
                start_close: start.close,
                end_close: end.close,
                change_pct: (end.close - start.close) / start.close * 100.0,
                rank: 0,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.change_pct
            .partial_cmp(&a.change_pct)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    for (i, sector) in ranked.iter_mut().enumerate() {
        sector.rank = i + 1;
    }
    ranked
}

/// Render the merged slice, its crossovers and the sector ranking as text.
pub fn render_context(
    records: &[MergedRecord],
    crossovers: &[Crossover],
    sectors: &[SectorPerformance],
    options: &ContextOptions,
) -> String {
    let mut out = String::new();

    match (records.first(), records.last()) {
        (Some(first), Some(last)) => {
            let _ = writeln!(
                out,
                "Market breadth data {} to {} ({} days)",
                first.date,
                last.date,
                records.len()
            );
        }
        _ => {
            let _ = writeln!(out, "Market breadth data: no records");
        }
    }

    let _ = writeln!(
        out,
        "date,ma20,ma50,ma200,{},{},{}",
        options.reference_label, options.secondary_label, options.selected_label
    );
    let skip = records.len().saturating_sub(options.max_rows);
    if skip > 0 {
        let _ = writeln!(out, "# {} earlier rows omitted", skip);
    }
    for record in &records[skip..] {
        let (ma20, ma50, ma200) = match record.breadth {
            Some(b) => (cell(Some(b.ma20)), cell(Some(b.ma50)), cell(Some(b.ma200))),
            None => (cell(None), cell(None), cell(None)),
        };
        let _ = writeln!(
            out,
            "{},{},{},{},{},{},{}",
            record.date,
            ma20,
            ma50,
            ma200,
            cell(record.reference_index),
            cell(record.secondary_index),
            cell(record.selected_series)
        );
    }

    out.push('\n');
    let _ = writeln!(out, "Crossovers ({}):", crossovers.len());
    for c in crossovers {
        let _ = writeln!(out, "{} {} {}", c.date, kind_label(c.kind), pair_label(c.pair));
    }

    out.push('\n');
    let _ = writeln!(out, "Sector ranking ({}):", sectors.len());
    for s in sectors {
        let _ = writeln!(
            out,
            "{}. {} {:+.2}% ({:.2} -> {:.2})",
            s.rank, s.name, s.change_pct, s.start_close, s.end_close
        );
    }

    out
}

fn cell(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn kind_label(kind: CrossoverKind) -> &'static str {
    match kind {
        CrossoverKind::Bullish => "bullish",
        CrossoverKind::Bearish => "bearish",
    }
}

fn pair_label(pair: MaPair) -> &'static str {
    match pair {
        MaPair::Ma20Ma50 => "ma20/ma50",
        MaPair::Ma50Ma200 => "ma50/ma200",
    }
}
