//! Re-score a saved checkpoint and regenerate every output without
//! touching the registry.
//!
//! Usage: `rescore <checkpoint.json>` (or `RESUME_CHECKPOINT`).

use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use registry_health_scanner::checkpoint::CheckpointStore;
use registry_health_scanner::reporting::{ReportWriter, RunSummary};
use registry_health_scanner::scoring::{score_companies, ScoringContext};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "registry_health_scanner=info,rescore=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let path = env::args()
        .nth(1)
        .or_else(|| env::var("RESUME_CHECKPOINT").ok())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow::anyhow!("usage: rescore <checkpoint.json> (or set RESUME_CHECKPOINT)"))?;
    let output_dir = PathBuf::from(env::var("OUTPUT_DIR").unwrap_or_else(|_| "output".to_string()));
    let top_n: usize = env::var("TOP_N")
        .ok()
        .map(|v| v.parse())
        .transpose()
        .map_err(|e| anyhow::anyhow!("TOP_N: {}", e))?
        .unwrap_or(20);
    let quota_limit: u64 = env::var("MONTHLY_REQUEST_QUOTA")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(500);

    let mut state = CheckpointStore::new(path).load().await?;
    score_companies(&mut state.results, &ScoringContext::current());

    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
    let summary = RunSummary {
        mode: state.mode,
        counters: &state.counters,
        requests_used: state.request_count,
        request_limit: quota_limit,
        errors: &state.errors,
        stop_reason: "rescored from checkpoint",
    };
    let writer = ReportWriter::new(output_dir, state.mode, &timestamp, top_n);
    let paths = writer.write_all(&state.results, &summary)?;

    println!("Rescored {} companies", state.results.len());
    println!("- {}", paths.enhanced_csv.display());
    println!("- {}", paths.top_csv.display());
    println!("- {}", paths.summary.display());

    Ok(())
}
