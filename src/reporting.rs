//! Output files of a run: three CSVs, a text summary and the error log.

use crate::errors::{AppError, ResultExt};
use crate::models::{CompanyRecord, ErrorRecord, HealthTier, RunCounters, RunMode};
use crate::scoring::{rank_companies, top_prospects};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::{Path, PathBuf};

const RAW_HEADER: [&str; 19] = [
    "Industry_Category",
    "Search_Keyword",
    "Company_Name",
    "Company_Number",
    "Jurisdiction",
    "Incorporation_Date",
    "Company_Type",
    "Status",
    "Registered_Address",
    "Registry_URL",
    "Officers_Available",
    "Industry_Codes",
    "Previous_Names",
    "Has_Current_Assets",
    "Has_Fixed_Assets",
    "Current_Assets_Entries",
    "Fixed_Assets_Entries",
    "Total_Assets_By_Year",
    "Financial_Data",
];

const SCORE_HEADER: [&str; 15] = [
    "Latest_Year",
    "Latest_Total_Assets",
    "Earliest_Year",
    "Earliest_Total_Assets",
    "Years_Of_Data",
    "Growth_Rate_Pct",
    "Size_Score",
    "Stability_Score",
    "Quality_Score",
    "Growth_Score",
    "Composite_Score",
    "Health_Tier",
    "Insufficient_Data",
    "Low_Data_Quality",
    "Scored",
];

/// Run-level figures for the summary report.
#[derive(Debug, Clone)]
pub struct RunSummary<'a> {
    pub mode: RunMode,
    pub counters: &'a RunCounters,
    pub requests_used: u64,
    pub request_limit: u64,
    pub errors: &'a [ErrorRecord],
    pub stop_reason: &'a str,
}

/// Paths written by [`ReportWriter::write_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub raw_csv: PathBuf,
    pub enhanced_csv: PathBuf,
    pub top_csv: PathBuf,
    pub summary: PathBuf,
    pub error_log: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path, mode: RunMode, timestamp: &str) -> Self {
        let name = |prefix: &str, ext: &str| {
            dir.join(format!("{}_{}_{}.{}", prefix, mode.file_suffix(), timestamp, ext))
        };
        Self {
            raw_csv: name("companies_raw", "csv"),
            enhanced_csv: name("companies_enhanced", "csv"),
            top_csv: name("top_prospects", "csv"),
            summary: name("summary", "txt"),
            error_log: name("error_log", "json"),
        }
    }
}

/// Writes every output of one run into the output directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
    paths: OutputPaths,
    top_n: usize,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>, mode: RunMode, timestamp: &str, top_n: usize) -> Self {
        let dir = dir.into();
        let paths = OutputPaths::new(&dir, mode, timestamp);
        Self { dir, paths, top_n }
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    /// Write all five outputs. `records` should already be scored.
    pub fn write_all(&self, records: &[CompanyRecord], summary: &RunSummary<'_>) -> Result<&OutputPaths, AppError> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating output directory {}", self.dir.display()))?;

        write_raw_csv(records, &self.paths.raw_csv)?;
        write_enhanced_csv(records, &self.paths.enhanced_csv)?;
        write_top_prospects_csv(records, self.top_n, &self.paths.top_csv)?;
        write_summary(records, summary, &self.paths.summary)?;
        write_error_log(summary.errors, &self.paths.error_log)?;

        tracing::info!("✓ Outputs written to {}", self.dir.display());
        Ok(&self.paths)
    }
}

/// One row per collected company, in collection order.
pub fn write_raw_csv(records: &[CompanyRecord], path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::Csv(format!("Cannot create {}: {}", path.display(), e)))?;

    wtr.write_record(RAW_HEADER)?;
    for record in records {
        wtr.write_record(raw_fields(record))?;
    }

    wtr.flush()?;
    tracing::info!("✓ Raw data: {} rows -> {}", records.len(), path.display());
    Ok(())
}

/// Raw columns plus metrics and scores, best composite first.
pub fn write_enhanced_csv(records: &[CompanyRecord], path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::Csv(format!("Cannot create {}: {}", path.display(), e)))?;

    wtr.write_record(RAW_HEADER.iter().chain(SCORE_HEADER.iter()))?;
    let ranked = rank_companies(records);
    for record in &ranked {
        let mut row = raw_fields(record);
        row.extend(score_fields(record));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    tracing::info!("✓ Enhanced data: {} rows -> {}", ranked.len(), path.display());
    Ok(())
}

/// Top `n` ranked companies with usable figures, numbered from 1.
pub fn write_top_prospects_csv(records: &[CompanyRecord], n: usize, path: &Path) -> Result<(), AppError> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|e| AppError::Csv(format!("Cannot create {}: {}", path.display(), e)))?;

    wtr.write_record([
        "Rank",
        "Company_Name",
        "Company_Number",
        "Industry_Category",
        "Health_Tier",
        "Composite_Score",
        "Latest_Total_Assets",
        "Growth_Rate_Pct",
        "Years_Of_Data",
        "Registry_URL",
    ])?;

    let top = top_prospects(records, n);
    for (rank, record) in top.iter().enumerate() {
        let Some(score) = record.score.as_ref() else {
            continue;
        };
        wtr.write_record([
            (rank + 1).to_string(),
            record.name.clone(),
            record.id.company_number.clone(),
            record.industry_category.clone(),
            score.tier.to_string(),
            format!("{:.1}", score.composite),
            opt_money(score.latest_total_assets),
            opt_pct(score.growth_rate),
            score.years_of_data.to_string(),
            record.registry_url.clone().unwrap_or_default(),
        ])?;
    }

    wtr.flush()?;
    tracing::info!("✓ Top prospects: {} rows -> {}", top.len(), path.display());
    Ok(())
}

/// JSON array of error records.
pub fn write_error_log(errors: &[ErrorRecord], path: &Path) -> Result<(), AppError> {
    let body = serde_json::to_string_pretty(errors)?;
    std::fs::write(path, body).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("✓ Error log: {} entries -> {}", errors.len(), path.display());
    Ok(())
}

pub fn write_summary(records: &[CompanyRecord], summary: &RunSummary<'_>, path: &Path) -> Result<(), AppError> {
    let text = render_summary(records, summary);
    std::fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
    tracing::info!("✓ Summary -> {}", path.display());
    Ok(())
}

/// Plain-text report of a run.
pub fn render_summary(records: &[CompanyRecord], summary: &RunSummary<'_>) -> String {
    let mut out = String::with_capacity(4 * 1024);
    let c = summary.counters;
    let rule = "=".repeat(60);

    // Writing into a String cannot fail.
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "REGISTRY HEALTH SCAN SUMMARY ({})", summary.mode.label().to_uppercase());
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "Stopped: {}", summary.stop_reason);
    let _ = writeln!(out);

    let _ = writeln!(out, "Run statistics");
    let _ = writeln!(out, "  Companies checked:          {}", c.companies_checked);
    let _ = writeln!(out, "  With financials:            {}", c.with_financials);
    let _ = writeln!(out, "  Without financials:         {}", c.without_financials);
    let _ = writeln!(out, "  With balance sheet:         {}", c.with_balance_sheet);
    let _ = writeln!(out, "  Financials, no balance:     {}", c.without_balance_sheet);
    let _ = writeln!(out, "  Not found:                  {}", c.not_found);
    let _ = writeln!(out, "  Failed:                     {}", c.failed);
    match c.balance_sheet_rate() {
        Some(rate) => {
            let _ = writeln!(out, "  Balance sheet success rate: {:.1}%", rate);
        }
        None => {
            let _ = writeln!(out, "  Balance sheet success rate: n/a");
        }
    }
    let _ = writeln!(out, "  Companies collected:        {}", records.len());
    let _ = writeln!(out);

    let _ = writeln!(out, "API usage");
    let _ = writeln!(
        out,
        "  Requests: {}/{} ({} remaining)",
        summary.requests_used,
        summary.request_limit,
        summary.request_limit.saturating_sub(summary.requests_used)
    );
    let _ = writeln!(out, "  Errors logged: {}", summary.errors.len());
    let _ = writeln!(out);

    let mut by_industry: BTreeMap<&str, usize> = BTreeMap::new();
    for record in records {
        *by_industry.entry(record.industry_category.as_str()).or_insert(0) += 1;
    }
    let _ = writeln!(out, "Industry breakdown");
    for (industry, count) in &by_industry {
        let _ = writeln!(out, "  {:<20} {}", industry, count);
    }
    let _ = writeln!(out);

    let scored: Vec<_> = records.iter().filter_map(|r| r.score.as_ref()).collect();
    let _ = writeln!(out, "Health tiers");
    for tier in HealthTier::all() {
        let count = scored.iter().filter(|s| s.tier == tier).count();
        let _ = writeln!(out, "  {:<12} {}", tier.as_str(), count);
    }
    if scored.is_empty() {
        let _ = writeln!(out, "  Average composite: n/a");
    } else {
        let avg = scored.iter().map(|s| s.composite).sum::<f64>() / scored.len() as f64;
        let _ = writeln!(out, "  Average composite: {:.1}", avg);
    }
    let low_quality = scored.iter().filter(|s| s.low_data_quality).count();
    let _ = writeln!(out, "  Low data quality:  {}", low_quality);
    let _ = writeln!(out);

    let _ = writeln!(out, "Top 5 prospects");
    let top = top_prospects(records, 5);
    if top.is_empty() {
        let _ = writeln!(out, "  (none with usable asset figures)");
    }
    for (i, record) in top.iter().enumerate() {
        if let Some(score) = record.score.as_ref() {
            let _ = writeln!(
                out,
                "  {}. {} ({}) {:.1} {} assets {}",
                i + 1,
                record.name,
                record.id,
                score.composite,
                score.tier,
                opt_money(score.latest_total_assets)
            );
        }
    }

    out
}

fn raw_fields(record: &CompanyRecord) -> Vec<String> {
    let totals = record.financials.total_assets();
    let totals_text = totals
        .iter()
        .map(|(year, value)| format!("{}:{:.2}", year, value))
        .collect::<Vec<_>>()
        .join("; ");

    vec![
        record.industry_category.clone(),
        record.search_keyword.clone(),
        record.name.clone(),
        record.id.company_number.clone(),
        record.id.jurisdiction.clone(),
        record
            .incorporation_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        record.company_type.clone().unwrap_or_default(),
        record.status.clone().unwrap_or_default(),
        record.address.clone().unwrap_or_default(),
        record.registry_url.clone().unwrap_or_default(),
        yes_no(record.officers_available),
        record.industry_codes.join("; "),
        record.previous_names.join("; "),
        yes_no(record.balance_sheet.has_current_assets),
        yes_no(record.balance_sheet.has_fixed_assets),
        record.balance_sheet.current_assets_entries.to_string(),
        record.balance_sheet.fixed_assets_entries.to_string(),
        totals_text,
        record
            .raw_financials
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_default(),
    ]
}

fn score_fields(record: &CompanyRecord) -> Vec<String> {
    let Some(s) = record.score.as_ref() else {
        let mut empty = vec![String::new(); SCORE_HEADER.len() - 1];
        empty.push(yes_no(false));
        return empty;
    };
    vec![
        s.latest_year.map(|y| y.to_string()).unwrap_or_default(),
        opt_money(s.latest_total_assets),
        s.earliest_year.map(|y| y.to_string()).unwrap_or_default(),
        opt_money(s.earliest_total_assets),
        s.years_of_data.to_string(),
        opt_pct(s.growth_rate),
        format!("{:.1}", s.size_score),
        format!("{:.1}", s.stability_score),
        format!("{:.1}", s.quality_score),
        s.growth_score.map(|g| format!("{:.1}", g)).unwrap_or_default(),
        format!("{:.1}", s.composite),
        s.tier.to_string(),
        yes_no(s.insufficient_data),
        yes_no(s.low_data_quality),
        yes_no(true),
    ]
}

fn yes_no(flag: bool) -> String {
    let text = if flag { "Yes" } else { "No" };
    text.to_string()
}

fn opt_money(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn opt_pct(rate: Option<f64>) -> String {
    rate.map(|r| format!("{:.2}", r * 100.0)).unwrap_or_default()
}
