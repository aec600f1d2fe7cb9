/// End-to-end tests of extraction, scoring and reporting against a mocked registry
use chrono::{Datelike, NaiveDate, Utc};
use registry_health_scanner::checkpoint::{CheckpointEnvelope, CheckpointStore, RunState};
use registry_health_scanner::config::Config;
use registry_health_scanner::extraction::{Extractor, StopReason};
use registry_health_scanner::models::{CompanyId, ErrorCategory, ErrorRecord, RunMode, SearchCriteria};
use registry_health_scanner::quota::RequestQuota;
use registry_health_scanner::registry_client::RegistryClient;
use registry_health_scanner::reporting::{ReportWriter, RunSummary};
use registry_health_scanner::scoring::{score_companies, ScoringContext};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Single-criterion config with no pacing delays
fn create_test_config(base_url: String, output_dir: &Path) -> Config {
    let mut config = Config::for_mode(RunMode::Test, "test_token".to_string(), base_url);
    config.criteria = vec![SearchCriteria {
        industry_category: "Accounting".to_string(),
        keyword: "accounting".to_string(),
        jurisdiction: "gb".to_string(),
        incorporated_from: NaiveDate::from_ymd_opt(1985, 1, 1).unwrap(),
        incorporated_to: NaiveDate::from_ymd_opt(2005, 12, 31).unwrap(),
    }];
    config.backoff_base = Duration::from_millis(1);
    config.detail_delay = Duration::ZERO;
    config.search_delay = Duration::ZERO;
    config.max_pages = 1;
    config.output_dir = output_dir.to_path_buf();
    config
}

fn search_results(numbers: &[&str]) -> serde_json::Value {
    let companies: Vec<_> = numbers
        .iter()
        .map(|n| {
            serde_json::json!({"company": {
                "name": format!("COMPANY {} LTD", n),
                "company_number": n,
                "jurisdiction_code": "gb"
            }})
        })
        .collect();
    serde_json::json!({
        "results": {"companies": companies, "page": 1, "total_pages": 1}
    })
}

async fn mount_search(server: &MockServer, numbers: &[&str]) {
    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_results(numbers)))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, number: &str, company: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(format!("/companies/gb/{}", number)))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": {"company": company}
        })))
        .mount(server)
        .await;
}

fn growing_company(number: &str) -> serde_json::Value {
    let year = Utc::now().year();
    serde_json::json!({
        "name": "GROWING ACCOUNTANTS LTD",
        "company_number": number,
        "jurisdiction_code": "gb",
        "incorporation_date": "1995-05-01",
        "current_status": "Active",
        "registered_address_in_full": "1 High Street, York, YO1 1AA",
        "industry_codes": [{"industry_code": {"code": "69201", "description": "Accounting and auditing"}}],
        "financial_summary": {
            "current_assets": [
                {"year": year - 3, "value": 100000},
                {"year": year - 2, "value": 120000},
                {"year": year - 1, "value": 150000}
            ],
            "fixed_assets": [
                {"year": year - 3, "value": 50000},
                {"year": year - 2, "value": 52000},
                {"year": year - 1, "value": 55000}
            ]
        }
    })
}

fn client_for(config: &Config, quota: &Arc<RequestQuota>) -> RegistryClient {
    RegistryClient::new(config, Arc::clone(quota)).unwrap()
}

#[tokio::test]
async fn test_three_companies_end_to_end() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_search(&mock_server, &["A1", "B2", "C3"]).await;
    mount_detail(&mock_server, "A1", growing_company("A1")).await;
    mount_detail(
        &mock_server,
        "B2",
        serde_json::json!({"name": "NO FIGURES LTD", "company_number": "B2", "jurisdiction_code": "gb"}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/companies/gb/C3"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), dir.path());
    let quota = Arc::new(RequestQuota::new(config.monthly_request_quota));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "e2e");

    let outcome = Extractor::new(config, client, store.clone(), RunState::new(RunMode::Test))
        .execute()
        .await;
    assert_eq!(outcome.stop_reason, StopReason::Completed);

    let mut state = outcome.state;
    score_companies(&mut state.results, &ScoringContext::current());

    assert_eq!(state.results.len(), 2);
    let scores: Vec<_> = state.results.iter().filter_map(|r| r.score.as_ref()).collect();
    assert_eq!(scores.iter().filter(|s| s.growth_score.is_some()).count(), 1);
    assert_eq!(scores.iter().filter(|s| s.low_data_quality).count(), 1);

    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].category, ErrorCategory::NotFound);
    assert_eq!(state.errors[0].company, Some(CompanyId::new("gb", "C3")));

    assert_eq!(state.counters.companies_checked, 3);
    assert_eq!(state.counters.with_balance_sheet, 1);
    assert_eq!(state.counters.without_financials, 1);
    assert_eq!(state.counters.not_found, 1);
    assert_eq!(state.request_count, 4);

    // Final checkpoint reflects the finished run
    let restored = store.load().await.unwrap();
    assert_eq!(restored.processed.len(), 3);

    let summary = RunSummary {
        mode: RunMode::Test,
        counters: &state.counters,
        requests_used: quota.used(),
        request_limit: quota.limit(),
        errors: &state.errors,
        stop_reason: "Completed",
    };
    let writer = ReportWriter::new(dir.path(), RunMode::Test, "e2e", 10);
    let paths = writer.write_all(&state.results, &summary).unwrap();

    let mut raw = csv::Reader::from_path(&paths.raw_csv).unwrap();
    assert_eq!(raw.records().count(), 2);
    let mut top = csv::Reader::from_path(&paths.top_csv).unwrap();
    assert_eq!(top.records().count(), 1);

    let log: Vec<ErrorRecord> =
        serde_json::from_str(&std::fs::read_to_string(&paths.error_log).unwrap()).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].category, ErrorCategory::NotFound);
}

#[tokio::test]
async fn test_require_balance_sheet_drops_unusable_companies() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_search(&mock_server, &["A1", "B2"]).await;
    mount_detail(&mock_server, "A1", growing_company("A1")).await;
    mount_detail(
        &mock_server,
        "B2",
        serde_json::json!({"name": "NO FIGURES LTD", "accounts": [{"made_up_to": "2020-12-31"}]}),
    )
    .await;

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.require_balance_sheet = true;
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "strict");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.state.results.len(), 1);
    assert_eq!(outcome.state.results[0].id.company_number, "A1");
    assert_eq!(outcome.state.counters.without_balance_sheet, 1);
}

#[tokio::test]
async fn test_quota_exhaustion_keeps_collected_results() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_search(&mock_server, &["A1", "B2", "C3"]).await;
    mount_detail(&mock_server, "A1", growing_company("A1")).await;
    Mock::given(method("GET"))
        .and(path("/companies/gb/B2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), dir.path());
    // One search plus one detail
    let quota = Arc::new(RequestQuota::new(2));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "quota");

    let outcome = Extractor::new(config, client, store.clone(), RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.stop_reason, StopReason::QuotaExhausted);
    assert_eq!(outcome.state.results.len(), 1);
    assert_eq!(outcome.state.request_count, 2);
    assert!(!outcome.state.is_processed(&CompanyId::new("gb", "B2")));

    let restored = store.load().await.unwrap();
    assert_eq!(restored.results.len(), 1);
}

#[tokio::test]
async fn test_transient_failure_left_for_resume() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_search(&mock_server, &["S5"]).await;
    Mock::given(method("GET"))
        .and(path("/companies/gb/S5"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), dir.path());
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "transient");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    let state = outcome.state;
    assert!(state.results.is_empty());
    assert_eq!(state.errors.len(), 1);
    assert_eq!(state.errors[0].category, ErrorCategory::ServerError);
    assert_eq!(state.errors[0].status, Some(502));
    assert!(!state.is_processed(&CompanyId::new("gb", "S5")));
    // Retried on resume, so not yet counted as checked or failed
    assert_eq!(state.counters.companies_checked, 0);
    assert_eq!(state.counters.failed, 0);
}

#[tokio::test]
async fn test_search_failure_recorded_without_company() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let config = create_test_config(mock_server.uri(), dir.path());
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "search");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.state.errors.len(), 1);
    assert_eq!(outcome.state.errors[0].company, None);
    assert_eq!(outcome.state.errors[0].category, ErrorCategory::Unexpected);
}

#[tokio::test]
async fn test_parallel_fetches_stop_at_targets() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let numbers = ["P1", "P2", "P3", "P4", "P5", "P6"];
    mount_search(&mock_server, &numbers).await;
    for number in numbers {
        mount_detail(&mock_server, number, growing_company(number)).await;
    }

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.detail_concurrency = 4;
    config.target_per_industry = Some(2);
    config.max_total_companies = Some(2);
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "parallel-targets");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.stop_reason, StopReason::TargetReached);
    assert_eq!(outcome.state.results.len(), 2);
    assert_eq!(outcome.state.usable_count(), 2);
    assert_eq!(outcome.state.industry_count("Accounting"), 2);
    // One search plus exactly two detail fetches
    assert_eq!(outcome.state.request_count, 3);
}

#[tokio::test]
async fn test_parallel_fetches_collect_every_hit_without_targets() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let numbers = ["Q1", "Q2", "Q3", "Q4", "Q5", "Q6"];
    mount_search(&mock_server, &numbers).await;
    for number in numbers {
        Mock::given(method("GET"))
            .and(path(format!("/companies/gb/{}", number)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"results": {"company": growing_company(number)}}))
                    .set_delay(Duration::from_millis(20)),
            )
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.detail_concurrency = 3;
    config.target_per_industry = None;
    config.max_total_companies = None;
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "parallel-all");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.state.results.len(), 6);
    assert_eq!(outcome.state.processed.len(), 6);
    assert_eq!(outcome.state.counters.companies_checked, 6);
    assert_eq!(outcome.state.request_count, 7);
}

#[tokio::test]
async fn test_industry_target_skips_remaining_keywords() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .and(query_param("q", "accounting"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_results(&["K1", "K2"])))
        .expect(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/companies/search"))
        .and(query_param("q", "bookkeeping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_results(&["K3"])))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_detail(&mock_server, "K1", growing_company("K1")).await;
    Mock::given(method("GET"))
        .and(path("/companies/gb/K2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri(), dir.path());
    let mut second = config.criteria[0].clone();
    second.keyword = "bookkeeping".to_string();
    config.criteria.push(second);
    config.target_per_industry = Some(1);
    config.max_total_companies = None;
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "industry-target");

    let outcome = Extractor::new(config, client, store, RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.stop_reason, StopReason::Completed);
    assert_eq!(outcome.state.results.len(), 1);
    assert_eq!(outcome.state.results[0].id.company_number, "K1");
    assert!(!outcome.state.is_processed(&CompanyId::new("gb", "K2")));
    assert_eq!(outcome.state.request_count, 2);
}

/// Answers detail requests and notes how many companies the checkpoint
/// on disk held when each request arrived.
struct CheckpointSnapshots {
    checkpoint: PathBuf,
    seen: Arc<Mutex<Vec<Option<usize>>>>,
}

impl Respond for CheckpointSnapshots {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let processed = std::fs::read_to_string(&self.checkpoint)
            .ok()
            .and_then(|raw| serde_json::from_str::<CheckpointEnvelope>(&raw).ok())
            .and_then(|envelope| envelope.open().ok())
            .map(|state| state.processed.len());
        self.seen.lock().unwrap().push(processed);

        let number = request.url.path().rsplit('/').next().unwrap_or_default();
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"results": {"company": growing_company(number)}}))
    }
}

#[tokio::test]
async fn test_checkpoint_written_every_n_companies() {
    let mock_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_search(&mock_server, &["N1", "N2", "N3", "N4"]).await;
    let store = CheckpointStore::for_run(dir.path(), RunMode::Test, "cadence");
    let seen = Arc::new(Mutex::new(Vec::new()));
    Mock::given(method("GET"))
        .and(path_regex("^/companies/gb/"))
        .respond_with(CheckpointSnapshots {
            checkpoint: store.path().to_path_buf(),
            seen: Arc::clone(&seen),
        })
        .expect(4)
        .mount(&mock_server)
        .await;

    let mut config = create_test_config(mock_server.uri(), dir.path());
    config.checkpoint_every = 2;
    config.detail_concurrency = 1;
    let quota = Arc::new(RequestQuota::new(50));
    let client = client_for(&config, &quota);

    let outcome = Extractor::new(config, client, store.clone(), RunState::new(RunMode::Test))
        .execute()
        .await;

    assert_eq!(outcome.state.results.len(), 4);
    // Nothing saved before the second company, then one save per two companies
    assert_eq!(*seen.lock().unwrap(), vec![None, None, Some(2), Some(2)]);

    let restored = store.load().await.unwrap();
    assert_eq!(restored.processed.len(), 4);
}
