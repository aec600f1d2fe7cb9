use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============ Identity & Search ============

/// Registry identifier: jurisdiction code plus registration number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId {
    /// Jurisdiction code (e.g. "gb").
    pub jurisdiction: String,
    /// Company registration number within the jurisdiction.
    pub company_number: String,
}

impl CompanyId {
    pub fn new(jurisdiction: impl Into<String>, company_number: impl Into<String>) -> Self {
        Self {
            jurisdiction: jurisdiction.into(),
            company_number: company_number.into(),
        }
    }
}

impl fmt::Display for CompanyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.jurisdiction, self.company_number)
    }
}

/// One search the extractor pages through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCriteria {
    /// Industry tag the results are filed under.
    pub industry_category: String,
    /// Free-text keyword sent as `q`.
    pub keyword: String,
    /// Jurisdiction / country code filter.
    pub jurisdiction: String,
    /// Earliest incorporation date (inclusive).
    pub incorporated_from: NaiveDate,
    /// Latest incorporation date (inclusive).
    pub incorporated_to: NaiveDate,
}

/// Run mode; controls the industry presets and collection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Test,
    Production,
}

impl RunMode {
    /// Upper-case suffix used in output file names.
    pub fn file_suffix(&self) -> &'static str {
        match self {
            RunMode::Test => "TEST",
            RunMode::Production => "PROD",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunMode::Test => "TEST MODE",
            RunMode::Production => "PRODUCTION MODE",
        }
    }
}

impl std::str::FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(RunMode::Test),
            "production" | "prod" => Ok(RunMode::Production),
            other => Err(format!("unknown run mode '{}'", other)),
        }
    }
}

// ============ Financial data ============

/// Yearly asset values for the two balance-sheet asset classes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialSeries {
    /// Fiscal year -> current assets.
    pub current_assets: BTreeMap<i32, f64>,
    /// Fiscal year -> fixed assets.
    pub fixed_assets: BTreeMap<i32, f64>,
}

impl FinancialSeries {
    /// Total assets per year: the sum when both classes report a year,
    /// otherwise whichever single value is available.
    pub fn total_assets(&self) -> BTreeMap<i32, f64> {
        let mut totals = self.current_assets.clone();
        for (year, value) in &self.fixed_assets {
            *totals.entry(*year).or_insert(0.0) += value;
        }
        totals
    }

    /// No year carries a usable total-assets value.
    pub fn is_insufficient(&self) -> bool {
        self.current_assets.is_empty() && self.fixed_assets.is_empty()
    }
}

/// Presence of balance-sheet arrays in the detail response.
///
/// Lenient: an array counts as present when it has entries, even if
/// every value inside is null.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheetInfo {
    pub has_current_assets: bool,
    pub has_fixed_assets: bool,
    pub current_assets_entries: usize,
    pub fixed_assets_entries: usize,
}

impl BalanceSheetInfo {
    pub fn has_balance_sheet(&self) -> bool {
        self.has_current_assets || self.has_fixed_assets
    }
}

// ============ Company record ============

/// A company collected from the registry, enriched in place by scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub id: CompanyId,
    pub name: String,
    /// Industry tag from the search criteria.
    pub industry_category: String,
    pub search_keyword: String,
    /// Registry industry codes ("code: description").
    #[serde(default)]
    pub industry_codes: Vec<String>,
    pub incorporation_date: Option<NaiveDate>,
    pub company_type: Option<String>,
    pub status: Option<String>,
    pub address: Option<String>,
    pub registry_url: Option<String>,
    #[serde(default)]
    pub officers_available: bool,
    #[serde(default)]
    pub previous_names: Vec<String>,
    /// Financial sections exactly as the registry returned them.
    pub raw_financials: Option<serde_json::Value>,
    #[serde(default)]
    pub financials: FinancialSeries,
    #[serde(default)]
    pub balance_sheet: BalanceSheetInfo,
    /// Filled by the scoring stage.
    #[serde(default)]
    pub score: Option<ScoreRecord>,
}

// ============ Scoring ============

/// Categorical health classification derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HealthTier {
    Healthy,
    Stable,
    #[serde(rename = "At-Risk")]
    AtRisk,
    Distressed,
}

impl HealthTier {
    /// Classify a composite score: >=70 Healthy, >=50 Stable, >=30 At-Risk,
    /// everything below Distressed.
    pub fn from_score(score: f64) -> Self {
        if score >= 70.0 {
            HealthTier::Healthy
        } else if score >= 50.0 {
            HealthTier::Stable
        } else if score >= 30.0 {
            HealthTier::AtRisk
        } else {
            HealthTier::Distressed
        }
    }

    pub fn all() -> [HealthTier; 4] {
        [
            HealthTier::Healthy,
            HealthTier::Stable,
            HealthTier::AtRisk,
            HealthTier::Distressed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthTier::Healthy => "Healthy",
            HealthTier::Stable => "Stable",
            HealthTier::AtRisk => "At-Risk",
            HealthTier::Distressed => "Distressed",
        }
    }
}

impl fmt::Display for HealthTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived metrics and scores for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub size_score: f64,
    pub stability_score: f64,
    pub quality_score: f64,
    /// `None` when growth is undefined (single year, zero baseline).
    pub growth_score: Option<f64>,
    /// Compound annual growth rate as a fraction (0.05 = 5%).
    pub growth_rate: Option<f64>,
    pub composite: f64,
    pub tier: HealthTier,
    pub latest_year: Option<i32>,
    pub latest_total_assets: Option<f64>,
    pub earliest_year: Option<i32>,
    pub earliest_total_assets: Option<f64>,
    pub years_of_data: usize,
    pub insufficient_data: bool,
    pub low_data_quality: bool,
}

// ============ Errors & run bookkeeping ============

/// Error log categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    NotFound,
    RateLimited,
    Timeout,
    ServerError,
    Unexpected,
}

/// One entry of the JSON error log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub category: ErrorCategory,
    /// Absent for failures of a search page rather than a company.
    pub company: Option<CompanyId>,
    pub status: Option<u16>,
    pub message: String,
}

/// Tallies of what the extractor has seen so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub companies_checked: u64,
    pub with_financials: u64,
    pub without_financials: u64,
    pub with_balance_sheet: u64,
    pub without_balance_sheet: u64,
    pub not_found: u64,
    pub failed: u64,
}

impl RunCounters {
    /// Share of checked companies with balance-sheet data, in percent.
    pub fn balance_sheet_rate(&self) -> Option<f64> {
        if self.companies_checked == 0 {
            None
        } else {
            Some(self.with_balance_sheet as f64 / self.companies_checked as f64 * 100.0)
        }
    }
}
