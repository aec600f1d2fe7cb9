//! Composite financial-health scoring.
//!
//! Four sub-scores in [0, 100] feed a weighted composite:
//!
//! - **Size** (40%): percentile rank of latest total assets in the collected set.
//! - **Stability** (30%): inverse coefficient of variation of total assets.
//! - **Data quality** (20%): field completeness and recency of the latest figures.
//! - **Growth** (10%): compound annual growth of total assets, clamped to ±50%.

use crate::models::{CompanyRecord, HealthTier, ScoreRecord};
use chrono::{Datelike, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const WEIGHT_SIZE: f64 = 0.40;
pub const WEIGHT_STABILITY: f64 = 0.30;
pub const WEIGHT_QUALITY: f64 = 0.20;
pub const WEIGHT_GROWTH: f64 = 0.10;

/// Score used when a metric is undefined.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Quality scores below this flag the record as low data quality.
pub const LOW_QUALITY_THRESHOLD: f64 = 50.0;

/// Growth rates beyond ±50% a year saturate the growth score.
pub const GROWTH_CLAMP: f64 = 0.5;

const EXPECTED_FIELDS: f64 = 6.0;

/// Inputs that are not part of a company record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoringContext {
    /// Year recency is measured against.
    pub reference_year: i32,
}

impl ScoringContext {
    pub fn current() -> Self {
        Self {
            reference_year: Utc::now().year(),
        }
    }
}

/// Score every record in place against the whole collected set.
pub fn score_companies(records: &mut [CompanyRecord], ctx: &ScoringContext) {
    let population: Vec<f64> = records
        .iter()
        .filter_map(|r| latest_point(&r.financials.total_assets()).map(|(_, v)| v))
        .collect();

    for record in records.iter_mut() {
        record.score = Some(score_company(record, &population, ctx));
    }

    tracing::info!(
        "Scored {} companies ({} with asset figures)",
        records.len(),
        population.len()
    );
}

/// Score one record. `population` holds the latest total assets of every
/// company in the set, this one included.
pub fn score_company(
    record: &CompanyRecord,
    population: &[f64],
    ctx: &ScoringContext,
) -> ScoreRecord {
    let totals = record.financials.total_assets();
    let latest = latest_point(&totals);
    let earliest = totals.iter().next().map(|(y, v)| (*y, *v));
    let values: Vec<f64> = totals.values().copied().collect();

    let size_score = asset_size_score(latest.map(|(_, v)| v), population);
    let stability = stability_score(&values);
    let quality = data_quality_score(record, latest.map(|(y, _)| y), ctx);
    let growth_rate = compound_growth_rate(&totals);
    let growth = growth_rate.map(growth_score);
    let composite = composite_score(size_score, stability, quality, growth);
    let insufficient_data = totals.is_empty();

    ScoreRecord {
        size_score: round_to(size_score, 1),
        stability_score: round_to(stability, 1),
        quality_score: round_to(quality, 1),
        growth_score: growth.map(|g| round_to(g, 1)),
        growth_rate,
        composite,
        tier: HealthTier::from_score(composite),
        latest_year: latest.map(|(y, _)| y),
        latest_total_assets: latest.map(|(_, v)| v),
        earliest_year: earliest.map(|(y, _)| y),
        earliest_total_assets: earliest.map(|(_, v)| v),
        years_of_data: totals.len(),
        insufficient_data,
        low_data_quality: insufficient_data || quality < LOW_QUALITY_THRESHOLD,
    }
}

fn latest_point(totals: &BTreeMap<i32, f64>) -> Option<(i32, f64)> {
    totals.iter().next_back().map(|(y, v)| (*y, *v))
}

/// Percentile rank (average rank for ties) of `value` within `population`.
///
/// A company without a value scores 0. A value missing from the
/// population is ranked as if it had been inserted.
pub fn asset_size_score(value: Option<f64>, population: &[f64]) -> f64 {
    let Some(value) = value.filter(|v| v.is_finite()) else {
        return 0.0;
    };

    let below = population.iter().filter(|p| **p < value).count() as f64;
    let equal = population.iter().filter(|p| **p == value).count();
    let (n, equal) = if equal == 0 {
        (population.len() as f64 + 1.0, 1.0)
    } else {
        (population.len() as f64, equal as f64)
    };

    let rank = below + (equal + 1.0) / 2.0;
    bounded(100.0 * rank / n)
}

/// `100 * (1 - min(CV, 1))` over yearly totals; neutral with fewer than
/// two points or a non-positive mean.
pub fn stability_score(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return NEUTRAL_SCORE;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if !mean.is_finite() || mean <= 0.0 {
        return NEUTRAL_SCORE;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    bounded(100.0 * (1.0 - cv.min(1.0)))
}

/// Fraction of the six expected fields present: name, incorporation
/// date, address, industry codes, current-assets and fixed-assets series.
pub fn completeness(record: &CompanyRecord) -> f64 {
    let present = [
        !record.name.trim().is_empty(),
        record.incorporation_date.is_some(),
        record
            .address
            .as_deref()
            .is_some_and(|a| !a.trim().is_empty()),
        !record.industry_codes.is_empty(),
        !record.financials.current_assets.is_empty(),
        !record.financials.fixed_assets.is_empty(),
    ]
    .iter()
    .filter(|p| **p)
    .count() as f64;

    present / EXPECTED_FIELDS
}

/// 100 for figures from this or last year, dropping 25 per extra year.
pub fn recency_score(latest_year: Option<i32>, reference_year: i32) -> f64 {
    match latest_year.map(|y| (reference_year - y).max(0)) {
        Some(0) | Some(1) => 100.0,
        Some(2) => 75.0,
        Some(3) => 50.0,
        Some(4) => 25.0,
        _ => 0.0,
    }
}

pub fn data_quality_score(
    record: &CompanyRecord,
    latest_year: Option<i32>,
    ctx: &ScoringContext,
) -> f64 {
    let score = 0.5 * completeness(record) * 100.0
        + 0.5 * recency_score(latest_year, ctx.reference_year);
    bounded(score)
}

/// CAGR between the earliest and latest yearly totals.
///
/// Undefined with fewer than two years, a non-positive baseline or a
/// negative latest value.
pub fn compound_growth_rate(totals: &BTreeMap<i32, f64>) -> Option<f64> {
    if totals.len() < 2 {
        return None;
    }
    let (first_year, first) = totals.iter().next()?;
    let (last_year, last) = totals.iter().next_back()?;
    let years = last_year - first_year;
    if years <= 0 || *first <= 0.0 || *last < 0.0 {
        return None;
    }

    let rate = (last / first).powf(1.0 / years as f64) - 1.0;
    rate.is_finite().then_some(rate)
}

/// Map a growth rate onto [0, 100]; 0% growth scores 50.
pub fn growth_score(rate: f64) -> f64 {
    if rate.is_nan() {
        return NEUTRAL_SCORE;
    }
    (rate.clamp(-GROWTH_CLAMP, GROWTH_CLAMP) + GROWTH_CLAMP) * 100.0
}

/// Weighted composite, rounded to one decimal and clamped to [0, 100].
/// An undefined growth score contributes the neutral midpoint.
pub fn composite_score(size: f64, stability: f64, quality: f64, growth: Option<f64>) -> f64 {
    let raw = WEIGHT_SIZE * bounded(size)
        + WEIGHT_STABILITY * bounded(stability)
        + WEIGHT_QUALITY * bounded(quality)
        + WEIGHT_GROWTH * growth.map(bounded).unwrap_or(NEUTRAL_SCORE);
    bounded(round_to(raw, 1))
}

/// Records ordered best first: composite, then latest total assets, then name.
pub fn rank_companies(records: &[CompanyRecord]) -> Vec<&CompanyRecord> {
    let mut ranked: Vec<&CompanyRecord> = records.iter().collect();
    ranked.sort_by(|a, b| {
        let key = |r: &CompanyRecord| {
            r.score
                .as_ref()
                .map(|s| (s.composite, s.latest_total_assets.unwrap_or(f64::MIN)))
                .unwrap_or((f64::MIN, f64::MIN))
        };
        let (ca, ta) = key(a);
        let (cb, tb) = key(b);
        cb.partial_cmp(&ca)
            .unwrap_or(Ordering::Equal)
            .then(tb.partial_cmp(&ta).unwrap_or(Ordering::Equal))
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked
}

/// Best `n` scored companies that have usable asset figures.
pub fn top_prospects(records: &[CompanyRecord], n: usize) -> Vec<&CompanyRecord> {
    rank_companies(records)
        .into_iter()
        .filter(|r| r.score.as_ref().is_some_and(|s| !s.insufficient_data))
        .take(n)
        .collect()
}

fn bounded(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
