use crate::config::{AuthStyle, Config};
use crate::errors::AppError;
use crate::models::{CompanyId, SearchCriteria};
use crate::quota::RequestQuota;
use crate::retry::{RetryPolicy, RetryReason};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use url::Url;

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// The inner `company` objects of `results.companies`.
    pub companies: Vec<Value>,
    pub page: u32,
    /// `results.total_pages`, 0 when the registry omits it.
    pub total_pages: u32,
}

/// Client for the corporate-registry search and detail endpoints.
///
/// Every HTTP attempt, retries included, is charged to the shared
/// [`RequestQuota`].
#[derive(Clone)]
pub struct RegistryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    auth_style: AuthStyle,
    retry: RetryPolicy,
    quota: Arc<RequestQuota>,
}

impl RegistryClient {
    /// Creates a new `RegistryClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - Base URL, credential, timeout and retry settings.
    /// * `quota` - Request counter shared with the rest of the run.
    pub fn new(config: &Config, quota: Arc<RequestQuota>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create registry client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.api_token.clone(),
            auth_style: config.auth_style,
            retry: RetryPolicy::new(config.max_retries, config.backoff_base),
            quota,
        })
    }

    pub fn quota(&self) -> &Arc<RequestQuota> {
        &self.quota
    }

    /// Fetches one page of active companies matching `criteria`.
    ///
    /// # Returns
    ///
    /// * `Result<SearchPage, AppError>` - The page; an empty page when the
    ///   response carries no `results.companies`.
    pub async fn search_companies(
        &self,
        criteria: &SearchCriteria,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, AppError> {
        let mut url = self.endpoint(&["companies", "search"])?;
        url.query_pairs_mut()
            .append_pair("q", &criteria.keyword)
            .append_pair("country_code", &criteria.jurisdiction)
            .append_pair("current_status", "Active")
            .append_pair(
                "incorporation_date",
                &format!(
                    "{}:{}",
                    criteria.incorporated_from.format("%Y-%m-%d"),
                    criteria.incorporated_to.format("%Y-%m-%d")
                ),
            )
            .append_pair("per_page", &per_page.to_string())
            .append_pair("page", &page.to_string());

        let label = format!("search '{}' page {}", criteria.keyword, page);
        tracing::info!(
            "Searching registry: {} (request #{}/{})",
            label,
            self.quota.used() + 1,
            self.quota.limit()
        );

        let data = self.get_json(url, &label).await?;
        let results = data.get("results");

        let companies = results
            .and_then(|r| r.get("companies"))
            .and_then(|c| c.as_array())
            .map(|items| {
                items
                    .iter()
                    .map(|item| item.get("company").cloned().unwrap_or_else(|| item.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let total_pages = results
            .and_then(|r| r.get("total_pages"))
            .and_then(|t| t.as_u64())
            .unwrap_or(0) as u32;

        Ok(SearchPage {
            companies,
            page,
            total_pages,
        })
    }

    /// Fetches full company detail, including financial sections.
    ///
    /// # Returns
    ///
    /// * `Result<Value, AppError>` - The `results.company` object.
    pub async fn fetch_company(&self, id: &CompanyId) -> Result<Value, AppError> {
        let url = self.endpoint(&["companies", &id.jurisdiction, &id.company_number])?;
        let label = id.to_string();
        tracing::debug!("Fetching company detail {}", label);

        let data = self.get_json(url, &label).await?;

        data.get("results")
            .and_then(|r| r.get("company"))
            .filter(|c| c.is_object())
            .cloned()
            .ok_or_else(|| {
                AppError::ExternalApiError(format!(
                    "Detail response for {} missing 'results.company'",
                    label
                ))
            })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, AppError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| AppError::Config(format!("Invalid registry base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| AppError::Config("Registry base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// GET with the retry schedule: 429 backs off exponentially, 5xx and
    /// timeouts retry after the base delay, 404 and other failures return
    /// immediately.
    async fn get_json(&self, url: Url, label: &str) -> Result<Value, AppError> {
        let mut attempt = 0u32;

        loop {
            self.quota.try_acquire()?;

            let request = match self.auth_style {
                AuthStyle::Bearer => self.client.get(url.clone()).bearer_auth(&self.token),
                AuthStyle::QueryParam => {
                    let mut with_token = url.clone();
                    with_token
                        .query_pairs_mut()
                        .append_pair("api_token", &self.token);
                    self.client.get(with_token)
                }
            };

            let (reason, error) = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    // The client timeout also covers the body read.
                    match response.json::<Value>().await {
                        Ok(data) => return Ok(data),
                        Err(e) if e.is_timeout() => (
                            RetryReason::Transient,
                            AppError::Timeout(format!("{} (reading body): {}", label, e)),
                        ),
                        Err(e) => {
                            return Err(AppError::ExternalApiError(format!(
                                "Failed to parse registry response for {}: {}",
                                label, e
                            )))
                        }
                    }
                }
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::NOT_FOUND {
                        return Err(AppError::NotFound(format!("Company not found (404): {}", label)));
                    }

                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    let excerpt: String = error_text.chars().take(200).collect();

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        (
                            RetryReason::RateLimited,
                            AppError::RateLimited(format!(
                                "{} still rate limited after {} attempts",
                                label,
                                attempt + 1
                            )),
                        )
                    } else if status.is_server_error() {
                        (
                            RetryReason::Transient,
                            AppError::ServerError {
                                status: status.as_u16(),
                                message: format!("{}: {}", label, excerpt),
                            },
                        )
                    } else {
                        return Err(AppError::ExternalApiError(format!(
                            "Registry returned {} for {}: {}",
                            status, label, excerpt
                        )));
                    }
                }
                Err(e) if e.is_timeout() => (
                    RetryReason::Transient,
                    AppError::Timeout(format!("{}: {}", label, e)),
                ),
                Err(e) => {
                    return Err(AppError::ExternalApiError(format!(
                        "Registry request failed for {}: {}",
                        label, e
                    )))
                }
            };

            match self.retry.delay_for(attempt, reason) {
                Some(delay) => {
                    tracing::warn!(
                        "⚠ {} - waiting {:?} before retry {}/{}",
                        error,
                        delay,
                        attempt + 1,
                        self.retry.max_retries
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                None => return Err(error),
            }
        }
    }
}
