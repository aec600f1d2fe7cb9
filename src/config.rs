use crate::models::{RunMode, SearchCriteria};
use chrono::{Datelike, NaiveDate, Utc};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.opencorporates.com/v0.4";

/// How the API token is attached to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <token>`
    Bearer,
    /// `?api_token=<token>`
    QueryParam,
}

/// Industries searched in each mode: (category, keywords).
const TEST_INDUSTRIES: &[(&str, &[&str])] = &[
    ("Accounting", &["accounting", "bookkeeping", "chartered accountant"]),
    ("ATM_Vending", &["vending", "ATM operator"]),
];

const PRODUCTION_INDUSTRIES: &[(&str, &[&str])] = &[
    (
        "Accounting",
        &["accounting", "bookkeeping", "chartered accountant", "tax services"],
    ),
    ("Laundromats", &["laundromat", "launderette", "dry cleaning"]),
    ("Storage", &["storage", "self storage", "warehousing"]),
    ("ATM_Vending", &["vending", "ATM operator"]),
];

#[derive(Debug, Clone)]
pub struct Config {
    pub api_token: String,
    pub base_url: String,
    pub auth_style: AuthStyle,
    pub mode: RunMode,
    pub criteria: Vec<SearchCriteria>,
    /// Usable companies to collect per industry before moving on.
    pub target_per_industry: Option<usize>,
    /// Usable companies to collect in total.
    pub max_total_companies: Option<usize>,
    pub monthly_request_quota: u64,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub request_timeout: Duration,
    pub detail_delay: Duration,
    pub search_delay: Duration,
    pub per_page: u32,
    pub max_pages: u32,
    pub detail_concurrency: usize,
    /// Save a checkpoint every N processed companies.
    pub checkpoint_every: usize,
    pub resume_checkpoint: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub top_n: usize,
    /// Drop companies without balance-sheet arrays instead of flagging them.
    pub require_balance_sheet: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mode: RunMode = std::env::var("RUN_MODE")
            .unwrap_or_else(|_| "test".to_string())
            .parse()
            .map_err(|e: String| anyhow::anyhow!("RUN_MODE: {}", e))?;

        let jurisdiction = std::env::var("JURISDICTION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "gb".to_string());
        let years_min = env_parse("INCORPORATED_YEARS_AGO_MIN", 20i32)?;
        let years_max = env_parse("INCORPORATED_YEARS_AGO_MAX", 40i32)?;
        if years_min > years_max {
            anyhow::bail!("INCORPORATED_YEARS_AGO_MIN must not exceed INCORPORATED_YEARS_AGO_MAX");
        }

        let mut config = Self::for_mode(
            mode,
            std::env::var("REGISTRY_API_TOKEN")
                .map_err(|_| anyhow::anyhow!("REGISTRY_API_TOKEN environment variable required"))
                .and_then(|token| {
                    if token.trim().is_empty() {
                        anyhow::bail!("REGISTRY_API_TOKEN cannot be empty");
                    }
                    Ok(token.trim().to_string())
                })?,
            std::env::var("REGISTRY_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        );
        if !config.base_url.starts_with("http://") && !config.base_url.starts_with("https://") {
            anyhow::bail!("REGISTRY_BASE_URL must start with http:// or https://");
        }
        config.criteria = build_criteria(mode, &jurisdiction, Utc::now().year(), years_min, years_max);

        config.auth_style = match std::env::var("REGISTRY_AUTH_STYLE")
            .unwrap_or_else(|_| "bearer".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "bearer" => AuthStyle::Bearer,
            "query" => AuthStyle::QueryParam,
            other => anyhow::bail!("REGISTRY_AUTH_STYLE must be 'bearer' or 'query', got '{}'", other),
        };
        config.monthly_request_quota = env_parse("MONTHLY_REQUEST_QUOTA", 500u64)?;
        config.max_retries = env_parse("MAX_RETRIES", 2u32)?;
        config.backoff_base = Duration::from_millis(env_parse("BACKOFF_BASE_MS", 2000u64)?);
        config.request_timeout = Duration::from_secs(env_parse("REQUEST_TIMEOUT_SECS", 30u64)?);
        config.detail_delay = Duration::from_millis(env_parse("DETAIL_DELAY_MS", 1500u64)?);
        config.search_delay = Duration::from_millis(env_parse("SEARCH_DELAY_MS", 2000u64)?);
        config.per_page = env_parse("PER_PAGE", 30u32)?.clamp(1, 100);
        config.max_pages = env_parse("MAX_PAGES", 3u32)?;
        config.detail_concurrency = env_parse("DETAIL_CONCURRENCY", 1usize)?.max(1);
        config.checkpoint_every = env_parse("CHECKPOINT_EVERY", 10usize)?.max(1);
        config.resume_checkpoint = std::env::var("RESUME_CHECKPOINT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        config.output_dir = PathBuf::from(
            std::env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string()),
        );
        config.top_n = env_parse("TOP_N", 20usize)?;
        config.require_balance_sheet = env_parse("REQUIRE_BALANCE_SHEET", false)?;

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully ({})", config.mode.label());
        tracing::debug!("Registry base URL: {}", config.base_url);
        tracing::debug!(
            "Quota: {} requests, {} search criteria, concurrency {}",
            config.monthly_request_quota,
            config.criteria.len(),
            config.detail_concurrency
        );

        Ok(config)
    }

    /// Defaults for a mode, with the default pacing and limits.
    ///
    /// Search criteria cover companies incorporated 20 to 40 years ago in `gb`.
    pub fn for_mode(mode: RunMode, api_token: String, base_url: String) -> Self {
        let (target_per_industry, max_total_companies) = match mode {
            RunMode::Test => (Some(25), Some(50)),
            RunMode::Production => (None, None),
        };

        Self {
            api_token,
            base_url,
            auth_style: AuthStyle::Bearer,
            mode,
            criteria: build_criteria(mode, "gb", Utc::now().year(), 20, 40),
            target_per_industry,
            max_total_companies,
            monthly_request_quota: 500,
            max_retries: 2,
            backoff_base: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            detail_delay: Duration::from_millis(1500),
            search_delay: Duration::from_secs(2),
            per_page: 30,
            max_pages: 3,
            detail_concurrency: 1,
            checkpoint_every: 10,
            resume_checkpoint: None,
            output_dir: PathBuf::from("output"),
            top_n: 20,
            require_balance_sheet: false,
        }
    }
}

/// Expand the mode's industry preset into one criteria entry per keyword.
pub fn build_criteria(
    mode: RunMode,
    jurisdiction: &str,
    current_year: i32,
    years_ago_min: i32,
    years_ago_max: i32,
) -> Vec<SearchCriteria> {
    let industries = match mode {
        RunMode::Test => TEST_INDUSTRIES,
        RunMode::Production => PRODUCTION_INDUSTRIES,
    };
    let from = NaiveDate::from_ymd_opt(current_year - years_ago_max, 1, 1);
    let to = NaiveDate::from_ymd_opt(current_year - years_ago_min, 12, 31);
    let (Some(incorporated_from), Some(incorporated_to)) = (from, to) else {
        return Vec::new();
    };

    industries
        .iter()
        .flat_map(|(category, keywords)| {
            keywords.iter().map(move |keyword| SearchCriteria {
                industry_category: category.to_string(),
                keyword: keyword.to_string(),
                jurisdiction: jurisdiction.to_string(),
                incorporated_from,
                incorporated_to,
            })
        })
        .collect()
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", key, raw)),
        _ => Ok(default),
    }
}
