//! Extraction workflow shared by fresh and resumed runs
//!
//! For every search criterion:
//! 1. Page through registry search results
//! 2. Fetch full detail for each unseen company (bounded fan-out)
//! 3. Parse balance-sheet data and build the company record
//! 4. Record skips and failures without aborting the batch
//! 5. Checkpoint every N processed companies and once more at the end
use crate::checkpoint::{CheckpointStore, RunState};
use crate::config::Config;
use crate::errors::AppError;
use crate::financials::{parse_company_financials, ParsedFinancials};
use crate::models::{CompanyId, CompanyRecord, ErrorCategory, ErrorRecord, SearchCriteria};
use crate::registry_client::RegistryClient;
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// Why extraction stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every criterion was searched to its last page.
    Completed,
    /// The total-companies target was met.
    TargetReached,
    /// No request budget left; collected results were kept.
    QuotaExhausted,
}

/// Final state of an extraction run.
#[derive(Debug)]
pub struct ExtractionOutcome {
    pub state: RunState,
    pub stop_reason: StopReason,
}

/// Drives the registry client over the configured search criteria.
#[derive(Clone)]
pub struct Extractor {
    config: Arc<Config>,
    client: RegistryClient,
    store: CheckpointStore,
    state: Arc<Mutex<RunState>>,
}

impl Extractor {
    /// `state` is either fresh or restored from a checkpoint; identifiers it
    /// already lists are never fetched again.
    pub fn new(config: Config, client: RegistryClient, store: CheckpointStore, state: RunState) -> Self {
        Self {
            config: Arc::new(config),
            client,
            store,
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn execute(&self) -> ExtractionOutcome {
        tracing::info!(
            "Starting extraction ({}): {} search criteria, quota {}/{}",
            self.config.mode.label(),
            self.config.criteria.len(),
            self.client.quota().used(),
            self.client.quota().limit()
        );

        let mut stop_reason = StopReason::Completed;
        for criteria in &self.config.criteria {
            if self.client.quota().is_exhausted() {
                tracing::warn!(
                    "⚠ Reached API request limit ({}). Stopping search.",
                    self.client.quota().limit()
                );
                stop_reason = StopReason::QuotaExhausted;
                break;
            }
            {
                let state = self.state.lock().await;
                if self.total_target_reached(&state) {
                    tracing::info!("✓ Reached total company limit. Stopping search.");
                    stop_reason = StopReason::TargetReached;
                    break;
                }
                if self.industry_target_reached(&state, &criteria.industry_category) {
                    tracing::info!(
                        "✓ Target reached for {}. Skipping '{}'.",
                        criteria.industry_category,
                        criteria.keyword
                    );
                    continue;
                }
            }

            if let Some(reason) = self.search_criteria(criteria).await {
                stop_reason = reason;
                break;
            }
        }

        let state = {
            let mut state = self.state.lock().await;
            state.request_count = self.client.quota().used();
            if let Err(e) = self.store.save(&state).await {
                tracing::error!("⚠ Final checkpoint save failed: {}", e);
            }
            state.clone()
        };

        tracing::info!(
            "Extraction finished ({:?}): {} companies collected, {} checked, {} errors, {} requests",
            stop_reason,
            state.results.len(),
            state.counters.companies_checked,
            state.errors.len(),
            state.request_count
        );

        ExtractionOutcome { state, stop_reason }
    }

    /// Page through one criterion. Returns a reason when the whole run must stop.
    async fn search_criteria(&self, criteria: &SearchCriteria) -> Option<StopReason> {
        tracing::info!(
            "Searching: {} ({})",
            criteria.keyword,
            criteria.industry_category
        );

        for page_number in 1..=self.config.max_pages {
            {
                let state = self.state.lock().await;
                if self.total_target_reached(&state) {
                    return Some(StopReason::TargetReached);
                }
                if self.industry_target_reached(&state, &criteria.industry_category) {
                    return None;
                }
            }

            let page = match self
                .client
                .search_companies(criteria, page_number, self.config.per_page)
                .await
            {
                Ok(page) => page,
                Err(e) if e.is_quota_exhausted() => return Some(StopReason::QuotaExhausted),
                Err(e) => {
                    tracing::error!("✗ Search failed for '{}': {}", criteria.keyword, e);
                    self.record_error(None, &e).await;
                    return None;
                }
            };

            if page.companies.is_empty() {
                tracing::info!("✗ No more companies on page {}", page_number);
                return None;
            }
            tracing::info!(
                "✓ Found {} companies on page {}/{}",
                page.companies.len(),
                page_number,
                page.total_pages
            );

            if let Some(reason) = self.process_page(criteria, page.companies).await {
                return Some(reason);
            }

            if page_number >= page.total_pages {
                tracing::info!("ℹ Reached last page ({})", page.total_pages);
                return None;
            }
            if !self.config.search_delay.is_zero() {
                tokio::time::sleep(self.config.search_delay).await;
            }
        }

        None
    }

    /// Fetch details for one page of search hits, at most
    /// `detail_concurrency` at a time.
    ///
    /// Every in-flight fetch is counted as a possible usable company, so
    /// parallel fetches never push a target past its limit.
    async fn process_page(&self, criteria: &SearchCriteria, companies: Vec<Value>) -> Option<StopReason> {
        let semaphore = Arc::new(Semaphore::new(self.config.detail_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        let mut page_seen = HashSet::new();
        let mut stop = None;

        'hits: for summary in companies {
            let Some(id) = company_id(&summary) else {
                tracing::debug!("Skipping search hit without jurisdiction/number");
                continue;
            };
            if !page_seen.insert(id.clone()) {
                continue;
            }

            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            loop {
                let headroom = {
                    let state = self.state.lock().await;
                    if state.is_processed(&id) {
                        tracing::debug!("Skipping {} (already processed)", id);
                        continue 'hits;
                    }
                    if self.total_target_reached(&state) {
                        tracing::info!("✓ Reached total company limit during processing");
                        stop = Some(StopReason::TargetReached);
                        break 'hits;
                    }
                    if self.industry_target_reached(&state, &criteria.industry_category) {
                        tracing::info!("✓ Reached {} target during processing", criteria.industry_category);
                        break 'hits;
                    }
                    self.headroom(&state, &criteria.industry_category)
                };
                if headroom.map_or(true, |slots| tasks.len() < slots) {
                    break;
                }
                // In-flight fetches could fill the remaining slots; wait for one.
                match tasks.join_next().await {
                    Some(joined) => absorb(joined, &mut stop),
                    None => break,
                }
            }
            if stop.is_some() {
                break;
            }
            if self.client.quota().is_exhausted() {
                stop = Some(StopReason::QuotaExhausted);
                break;
            }

            let worker = self.clone();
            let criteria = criteria.clone();
            tasks.spawn(async move {
                let _permit = permit;
                worker.process_company(&criteria, &summary, id).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            absorb(joined, &mut stop);
        }

        stop
    }

    /// Fetch, parse and record one company. Never fails the batch.
    async fn process_company(
        &self,
        criteria: &SearchCriteria,
        summary: &Value,
        id: CompanyId,
    ) -> Option<StopReason> {
        let result = self.client.fetch_company(&id).await;

        let detail = match result {
            Ok(detail) => detail,
            Err(e) if e.is_quota_exhausted() => {
                tracing::warn!("⚠ Quota exhausted before fetching {}", id);
                return Some(StopReason::QuotaExhausted);
            }
            Err(e) => {
                self.pace().await;
                self.record_company_failure(&id, &e).await;
                return None;
            }
        };
        self.pace().await;

        let parsed = parse_company_financials(&detail);
        let record = build_record(criteria, &id, summary, &detail, &parsed);
        self.record_company(record, &parsed).await;
        None
    }

    async fn pace(&self) {
        if !self.config.detail_delay.is_zero() {
            tokio::time::sleep(self.config.detail_delay).await;
        }
    }

    async fn record_company(&self, record: CompanyRecord, parsed: &ParsedFinancials) {
        let mut state = self.state.lock().await;
        let usable = parsed.balance_sheet.has_balance_sheet();
        if usable && self.headroom(&state, &record.industry_category) == Some(0) {
            // Left unprocessed so a later run can still collect it.
            tracing::info!("Target already met, not collecting {}", record.id);
            return;
        }
        if !state.mark_processed(&record.id) {
            return;
        }
        state.counters.companies_checked += 1;

        if !parsed.has_financial_data() {
            state.counters.without_financials += 1;
            tracing::info!("✗ {} ({}): no financials", record.name, record.id);
        } else if usable {
            state.counters.with_financials += 1;
            state.counters.with_balance_sheet += 1;
            tracing::info!(
                "✓ {} ({}): balance sheet (current: {}yr, fixed: {}yr)",
                record.name,
                record.id,
                parsed.balance_sheet.current_assets_entries,
                parsed.balance_sheet.fixed_assets_entries
            );
        } else {
            state.counters.with_financials += 1;
            state.counters.without_balance_sheet += 1;
            tracing::info!("✗ {} ({}): financials but no balance sheet", record.name, record.id);
        }

        if usable {
            *state
                .industry_counts
                .entry(record.industry_category.clone())
                .or_insert(0) += 1;
        }
        if usable || !self.config.require_balance_sheet {
            state.results.push(record);
        }

        self.maybe_checkpoint(&mut state).await;
    }

    async fn record_company_failure(&self, id: &CompanyId, error: &AppError) {
        let category = error.category();
        match category {
            ErrorCategory::NotFound => tracing::info!("Skipping {}: {}", id, error),
            _ => tracing::warn!("✗ Failed to fetch {}: {}", id, error),
        }

        let mut state = self.state.lock().await;
        state.errors.push(error_record(Some(id), error));

        // Transient failures stay unprocessed so a resumed run retries them.
        let transient = matches!(
            category,
            ErrorCategory::RateLimited | ErrorCategory::Timeout | ErrorCategory::ServerError
        );
        if !transient && state.mark_processed(id) {
            state.counters.companies_checked += 1;
            if category == ErrorCategory::NotFound {
                state.counters.not_found += 1;
            } else {
                state.counters.failed += 1;
            }
            self.maybe_checkpoint(&mut state).await;
        }
    }

    async fn record_error(&self, id: Option<&CompanyId>, error: &AppError) {
        let mut state = self.state.lock().await;
        state.errors.push(error_record(id, error));
    }

    /// Runs with the state lock held, so no result is mutated mid-write.
    async fn maybe_checkpoint(&self, state: &mut RunState) {
        if !checkpoint_due(state.processed.len(), self.config.checkpoint_every) {
            return;
        }
        state.request_count = self.client.quota().used();
        if let Err(e) = self.store.save(state).await {
            tracing::warn!("⚠ Checkpoint save failed: {}", e);
        }
    }

    /// Usable companies that may still be collected for `category`;
    /// `None` when neither target is set.
    fn headroom(&self, state: &RunState, category: &str) -> Option<usize> {
        let industry = self
            .config
            .target_per_industry
            .map(|target| target.saturating_sub(state.industry_count(category)));
        let total = self
            .config
            .max_total_companies
            .map(|max| max.saturating_sub(state.usable_count()));
        match (industry, total) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn total_target_reached(&self, state: &RunState) -> bool {
        self.config
            .max_total_companies
            .is_some_and(|max| state.usable_count() >= max)
    }

    fn industry_target_reached(&self, state: &RunState, category: &str) -> bool {
        self.config
            .target_per_industry
            .is_some_and(|target| state.industry_count(category) >= target)
    }
}

fn absorb(
    joined: Result<Option<StopReason>, tokio::task::JoinError>,
    stop: &mut Option<StopReason>,
) {
    match joined {
        Ok(Some(reason)) => *stop = Some(reason),
        Ok(None) => {}
        Err(e) => tracing::error!("Detail task failed: {}", e),
    }
}

/// Whether `processed` companies land on a checkpoint boundary.
/// An interval of 0 is treated as 1.
pub fn checkpoint_due(processed: usize, every: usize) -> bool {
    processed % every.max(1) == 0
}

fn error_record(id: Option<&CompanyId>, error: &AppError) -> ErrorRecord {
    ErrorRecord {
        timestamp: Utc::now(),
        category: error.category(),
        company: id.cloned(),
        status: error.status(),
        message: error.to_string(),
    }
}

/// Identifier of a search hit, if it carries both parts.
pub fn company_id(company: &Value) -> Option<CompanyId> {
    let jurisdiction = text(company, "jurisdiction_code")?;
    let number = text(company, "company_number")?;
    Some(CompanyId::new(jurisdiction, number))
}

/// Assemble a record from the detail response, falling back to the
/// search hit for fields the detail omits.
pub fn build_record(
    criteria: &SearchCriteria,
    id: &CompanyId,
    summary: &Value,
    detail: &Value,
    parsed: &ParsedFinancials,
) -> CompanyRecord {
    let field = |key: &str| text(detail, key).or_else(|| text(summary, key));

    let officers_available = field("officers_url").is_some()
        || detail
            .get("officers")
            .and_then(|o| o.as_array())
            .is_some_and(|o| !o.is_empty());

    CompanyRecord {
        id: id.clone(),
        name: field("name").unwrap_or_else(|| "Unknown".to_string()),
        industry_category: criteria.industry_category.clone(),
        search_keyword: criteria.keyword.clone(),
        industry_codes: extract_industry_codes(detail),
        incorporation_date: field("incorporation_date")
            .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
        company_type: field("company_type"),
        status: field("current_status"),
        address: field("registered_address_in_full")
            .or_else(|| extract_address(detail))
            .or_else(|| extract_address(summary)),
        registry_url: field("opencorporates_url"),
        officers_available,
        previous_names: extract_previous_names(detail),
        raw_financials: parsed.raw.clone(),
        financials: parsed.series.clone(),
        balance_sheet: parsed.balance_sheet,
        score: None,
    }
}

fn text(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_address(value: &Value) -> Option<String> {
    let address = value.get("registered_address")?.as_object()?;
    let parts: Vec<&str> = ["street_address", "locality", "region", "postal_code", "country"]
        .iter()
        .filter_map(|k| address.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join(", "))
}

fn extract_industry_codes(detail: &Value) -> Vec<String> {
    let Some(codes) = detail.get("industry_codes").and_then(|c| c.as_array()) else {
        return Vec::new();
    };
    codes
        .iter()
        .filter_map(|entry| {
            let code = entry.get("industry_code").unwrap_or(entry);
            if let Some(s) = code.as_str() {
                return Some(s.to_string());
            }
            match (text(code, "code"), text(code, "description")) {
                (Some(c), Some(d)) => Some(format!("{}: {}", c, d)),
                (Some(c), None) => Some(c),
                (None, Some(d)) => Some(d),
                (None, None) => None,
            }
        })
        .collect()
}

fn extract_previous_names(detail: &Value) -> Vec<String> {
    let Some(names) = detail.get("previous_names").and_then(|n| n.as_array()) else {
        return Vec::new();
    };
    names
        .iter()
        .filter_map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .or_else(|| text(entry, "company_name"))
        })
        .collect()
}
