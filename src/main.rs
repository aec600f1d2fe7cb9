use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registry_health_scanner::checkpoint::{CheckpointStore, RunState};
use registry_health_scanner::config::Config;
use registry_health_scanner::extraction::{Extractor, StopReason};
use registry_health_scanner::quota::RequestQuota;
use registry_health_scanner::registry_client::RegistryClient;
use registry_health_scanner::reporting::{ReportWriter, RunSummary};
use registry_health_scanner::scoring::{score_companies, ScoringContext};

/// Main entry point for the registry health scan.
///
/// Loads configuration, restores a checkpoint when one is configured, runs
/// the extraction, scores the collected companies and writes every output.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok when the outputs were written, even if the
///   quota ran out part-way; an error only for configuration or output failures.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry_health_scanner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

    let (state, store) = restore_or_start(&config, &timestamp).await;

    let quota = Arc::new(RequestQuota::with_used(
        config.monthly_request_quota,
        state.request_count,
    ));
    let client = RegistryClient::new(&config, Arc::clone(&quota))?;
    tracing::info!("✓ Registry client initialized: {}", config.base_url);

    let output_dir = config.output_dir.clone();
    let mode = config.mode;
    let top_n = config.top_n;

    let outcome = Extractor::new(config, client, store, state).execute().await;
    if outcome.stop_reason == StopReason::QuotaExhausted {
        tracing::warn!("⚠ Request quota exhausted; writing partial results");
    }

    let mut state = outcome.state;
    score_companies(&mut state.results, &ScoringContext::current());

    let stop_reason = format!("{:?}", outcome.stop_reason);
    let summary = RunSummary {
        mode,
        counters: &state.counters,
        requests_used: quota.used(),
        request_limit: quota.limit(),
        errors: &state.errors,
        stop_reason: &stop_reason,
    };
    let writer = ReportWriter::new(output_dir, mode, &timestamp, top_n);
    let paths = writer.write_all(&state.results, &summary)?;

    tracing::info!("✓ Scan complete: {} companies", state.results.len());
    tracing::info!("  Enhanced data: {}", paths.enhanced_csv.display());
    tracing::info!("  Top prospects: {}", paths.top_csv.display());
    tracing::info!("  Summary:       {}", paths.summary.display());

    Ok(())
}

/// Resume from `RESUME_CHECKPOINT` when it loads cleanly, otherwise start a
/// fresh run with a new checkpoint file.
async fn restore_or_start(config: &Config, timestamp: &str) -> (RunState, CheckpointStore) {
    if let Some(path) = &config.resume_checkpoint {
        let store = CheckpointStore::new(path.clone());
        match store.load().await {
            Ok(state) => {
                if state.mode != config.mode {
                    tracing::warn!(
                        "⚠ Checkpoint was written in {} mode, continuing in {} mode",
                        state.mode.label(),
                        config.mode.label()
                    );
                }
                tracing::info!("✓ Resuming run {} from {}", state.run_id, path.display());
                return (state, store);
            }
            Err(e) => {
                tracing::warn!("⚠ Could not resume from {}: {}. Starting fresh.", path.display(), e);
            }
        }
    }

    let store = CheckpointStore::for_run(&config.output_dir, config.mode, timestamp);
    tracing::info!("Starting fresh run, checkpoint: {}", store.path().display());
    (RunState::new(config.mode), store)
}
