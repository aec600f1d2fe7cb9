use crate::errors::{AppError, ResultExt};
use crate::models::{CompanyId, CompanyRecord, ErrorRecord, RunCounters, RunMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// In-progress extraction state; what a checkpoint persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    /// Every company looked at, in processing order.
    pub processed: Vec<CompanyId>,
    pub results: Vec<CompanyRecord>,
    pub counters: RunCounters,
    /// Usable (balance-sheet) companies per industry category.
    pub industry_counts: BTreeMap<String, usize>,
    pub errors: Vec<ErrorRecord>,
    pub request_count: u64,
    #[serde(skip)]
    seen: HashSet<CompanyId>,
}

impl RunState {
    pub fn new(mode: RunMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
            processed: Vec::new(),
            results: Vec::new(),
            counters: RunCounters::default(),
            industry_counts: BTreeMap::new(),
            errors: Vec::new(),
            request_count: 0,
            seen: HashSet::new(),
        }
    }

    pub fn is_processed(&self, id: &CompanyId) -> bool {
        self.seen.contains(id)
    }

    /// Claim `id` for processing. Returns false if it was already claimed.
    pub fn mark_processed(&mut self, id: &CompanyId) -> bool {
        if self.seen.insert(id.clone()) {
            self.processed.push(id.clone());
            true
        } else {
            false
        }
    }

    /// Collected companies that carry balance-sheet data.
    pub fn usable_count(&self) -> usize {
        self.industry_counts.values().sum()
    }

    pub fn industry_count(&self, category: &str) -> usize {
        self.industry_counts.get(category).copied().unwrap_or(0)
    }

    fn rebuild_index(&mut self) {
        self.seen = self
            .processed
            .iter()
            .chain(self.results.iter().map(|r| &r.id))
            .cloned()
            .collect();
    }
}

/// On-disk checkpoint: the serialized state plus its SHA-256 checksum.
///
/// A checksum mismatch means the file was truncated or edited and the
/// checkpoint is rejected rather than resumed from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    pub format_version: u32,
    pub saved_at: DateTime<Utc>,
    /// SHA-256 of `state` (hex encoded).
    pub checksum: String,
    /// `RunState` as a JSON string.
    pub state: String,
}

impl CheckpointEnvelope {
    pub fn seal(state: &RunState) -> Result<Self, AppError> {
        let data = serde_json::to_string(state)?;
        Ok(Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            saved_at: Utc::now(),
            checksum: Self::compute_checksum(&data),
            state: data,
        })
    }

    fn compute_checksum(data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn is_valid(&self) -> bool {
        Self::compute_checksum(&self.state) == self.checksum
    }

    /// Validate and decode the state.
    pub fn open(self) -> Result<RunState, AppError> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(AppError::CorruptCheckpoint(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        if !self.is_valid() {
            tracing::warn!(
                "Checkpoint validation failed: checksum mismatch. Expected: {}, Data length: {}",
                self.checksum,
                self.state.len()
            );
            return Err(AppError::CorruptCheckpoint("checksum mismatch".to_string()));
        }

        let mut state: RunState = serde_json::from_str(&self.state)
            .map_err(|e| AppError::CorruptCheckpoint(format!("invalid state: {}", e)))?;
        state.rebuild_index();
        Ok(state)
    }
}

/// Reads and writes the checkpoint file of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<dir>/checkpoint_<mode>_<timestamp>.json`
    pub fn for_run(dir: &Path, mode: RunMode, timestamp: &str) -> Self {
        Self::new(dir.join(format!(
            "checkpoint_{}_{}.json",
            mode.file_suffix().to_ascii_lowercase(),
            timestamp
        )))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write atomically: a sibling temp file renamed over the target.
    pub async fn save(&self, state: &RunState) -> Result<(), AppError> {
        let envelope = CheckpointEnvelope::seal(state)?;
        let body = serde_json::to_vec_pretty(&envelope)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .with_context(|| format!("writing {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("renaming {} into place", tmp.display()))?;

        tracing::info!(
            "💾 Checkpoint saved: {} companies, {} processed ({})",
            state.results.len(),
            state.processed.len(),
            self.path.display()
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<RunState, AppError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("reading {}", self.path.display()))?;
        let envelope: CheckpointEnvelope = serde_json::from_str(&raw)
            .map_err(|e| AppError::CorruptCheckpoint(format!("invalid envelope: {}", e)))?;
        let state = envelope.open()?;

        tracing::info!(
            "✓ Checkpoint loaded: {} companies restored, {} processed, {} requests used",
            state.results.len(),
            state.processed.len(),
            state.request_count
        );
        Ok(state)
    }
}
