/// Integration tests with a mocked registry API
/// Exercises the retry schedule, quota accounting and response parsing
use registry_health_scanner::config::{AuthStyle, Config};
use registry_health_scanner::errors::AppError;
use registry_health_scanner::models::{CompanyId, ErrorCategory, RunMode};
use registry_health_scanner::quota::RequestQuota;
use registry_health_scanner::registry_client::RegistryClient;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config with millisecond backoff
fn create_test_config(base_url: String) -> Config {
    let mut config = Config::for_mode(RunMode::Test, "test_token".to_string(), base_url);
    config.backoff_base = Duration::from_millis(5);
    config.request_timeout = Duration::from_secs(5);
    config
}

fn client_with_quota(base_url: String, limit: u64) -> (RegistryClient, Arc<RequestQuota>) {
    let quota = Arc::new(RequestQuota::new(limit));
    let client = RegistryClient::new(&create_test_config(base_url), Arc::clone(&quota)).unwrap();
    (client, quota)
}

fn company_body(number: &str) -> serde_json::Value {
    serde_json::json!({
        "results": {
            "company": {
                "name": "ACME ACCOUNTING LTD",
                "company_number": number,
                "jurisdiction_code": "gb",
                "financial_summary": {
                    "current_assets": [{"year": 2022, "value": 1000}]
                }
            }
        }
    })
}

#[tokio::test]
async fn test_fetch_company_success_sends_bearer_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/01234567"))
        .and(header("authorization", "Bearer test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(company_body("01234567")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (client, quota) = client_with_quota(mock_server.uri(), 10);
    let company = client
        .fetch_company(&CompanyId::new("gb", "01234567"))
        .await
        .unwrap();

    assert_eq!(company["name"], "ACME ACCOUNTING LTD");
    assert_eq!(quota.used(), 1);
}

#[tokio::test]
async fn test_query_param_auth_style() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/42"))
        .and(query_param("api_token", "test_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(company_body("42")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri());
    config.auth_style = AuthStyle::QueryParam;
    let client = RegistryClient::new(&config, Arc::new(RequestQuota::new(10))).unwrap();

    assert!(client.fetch_company(&CompanyId::new("gb", "42")).await.is_ok());
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (client, quota) = client_with_quota(mock_server.uri(), 10);
    let err = client
        .fetch_company(&CompanyId::new("gb", "missing"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::NotFound(_)));
    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(err.status(), Some(404));
    assert_eq!(quota.used(), 1);
}

#[tokio::test]
async fn test_rate_limit_then_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/777"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/companies/gb/777"))
        .respond_with(ResponseTemplate::new(200).set_body_json(company_body("777")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (client, quota) = client_with_quota(mock_server.uri(), 10);
    let company = client.fetch_company(&CompanyId::new("gb", "777")).await.unwrap();

    assert_eq!(company["company_number"], "777");
    // Retries are charged to the quota too
    assert_eq!(quota.used(), 2);
}

#[tokio::test]
async fn test_persistent_rate_limit_gives_up_after_cap() {
    let mock_server = MockServer::start().await;

    // max_retries = 2 -> exactly three attempts
    Mock::given(method("GET"))
        .and(path("/companies/gb/888"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (client, quota) = client_with_quota(mock_server.uri(), 10);
    let err = client
        .fetch_company(&CompanyId::new("gb", "888"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::RateLimited(_)));
    assert_eq!(err.category(), ErrorCategory::RateLimited);
    assert_eq!(quota.used(), 3);
}

#[tokio::test]
async fn test_server_error_retried_then_reported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/500"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(3)
        .mount(&mock_server)
        .await;

    let (client, _quota) = client_with_quota(mock_server.uri(), 10);
    let err = client
        .fetch_company(&CompanyId::new("gb", "500"))
        .await
        .unwrap_err();

    match &err {
        AppError::ServerError { status, message } => {
            assert_eq!(*status, 503);
            assert!(message.contains("maintenance"));
        }
        other => panic!("expected ServerError, got {:?}", other),
    }
    assert_eq!(err.category(), ErrorCategory::ServerError);
}

#[tokio::test]
async fn test_slow_response_retried_as_timeout() {
    let mock_server = MockServer::start().await;

    // Every reply outlasts the client timeout; max_retries = 2 -> three attempts
    Mock::given(method("GET"))
        .and(path("/companies/gb/777"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(company_body("777"))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri());
    config.request_timeout = Duration::from_millis(100);
    let quota = Arc::new(RequestQuota::new(10));
    let client = RegistryClient::new(&config, Arc::clone(&quota)).unwrap();

    let err = client
        .fetch_company(&CompanyId::new("gb", "777"))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Timeout(_)), "expected Timeout, got {:?}", err);
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(quota.used(), 3);
}

#[tokio::test]
async fn test_other_client_errors_not_retried() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/401"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let (client, _quota) = client_with_quota(mock_server.uri(), 10);
    let err = client
        .fetch_company(&CompanyId::new("gb", "401"))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Unexpected);
}

#[tokio::test]
async fn test_quota_stops_retries_midway() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/gb/999"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&mock_server)
        .await;

    let (client, quota) = client_with_quota(mock_server.uri(), 2);
    let err = client
        .fetch_company(&CompanyId::new("gb", "999"))
        .await
        .unwrap_err();

    assert!(err.is_quota_exhausted());
    assert_eq!(quota.used(), 2);
    assert!(quota.is_exhausted());
}

#[tokio::test]
async fn test_search_parses_companies_and_paging() {
    let mock_server = MockServer::start().await;

    let body = serde_json::json!({
        "results": {
            "page": 1,
            "per_page": 30,
            "total_pages": 4,
            "companies": [
                {"company": {"name": "ONE LTD", "company_number": "1", "jurisdiction_code": "gb"}},
                {"company": {"name": "TWO LTD", "company_number": "2", "jurisdiction_code": "gb"}}
            ]
        }
    });

    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .and(query_param("q", "bookkeeping"))
        .and(query_param("country_code", "gb"))
        .and(query_param("current_status", "Active"))
        .and(query_param("per_page", "30"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&body))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let criteria = config
        .criteria
        .iter()
        .find(|c| c.keyword == "bookkeeping")
        .cloned()
        .unwrap();
    let client = RegistryClient::new(&config, Arc::new(RequestQuota::new(10))).unwrap();

    let page = client.search_companies(&criteria, 1, 30).await.unwrap();

    assert_eq!(page.companies.len(), 2);
    assert_eq!(page.companies[1]["name"], "TWO LTD");
    assert_eq!(page.total_pages, 4);
}

#[tokio::test]
async fn test_search_without_results_is_empty_page() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"results": {}})))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri());
    let client = RegistryClient::new(&config, Arc::new(RequestQuota::new(10))).unwrap();
    let page = client
        .search_companies(&config.criteria[0], 1, 30)
        .await
        .unwrap();

    assert!(page.companies.is_empty());
    assert_eq!(page.total_pages, 0);
}
