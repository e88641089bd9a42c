//! Run history persistence.
//!
//! The orchestrator reports every status change of a run to an optional [`RunStore`].
//! Stores only record; a store failure is logged by the caller and never changes how a
//! run proceeds.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryRunStore`] for tests and ephemeral services.
//! - [`JsonlRunStore`], an append-only newline-delimited JSON file. Every save appends the
//!   full record; on reload the last line for an id wins.
//!
//! ```rust
//! use cognitionflow::run_store::{JsonlRunStore, RunRecord, RunStore};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let dir = tempfile::tempdir()?;
//! let store = JsonlRunStore::open(dir.path().join("runs.jsonl"))?;
//!
//! let record = RunRecord::new("run-1", "make a chart", dir.path(), json!({"model": "gpt-4o"}));
//! store.save(&record).await?;
//!
//! let reopened = JsonlRunStore::open(dir.path().join("runs.jsonl"))?;
//! assert_eq!(reopened.get("run-1").await?.map(|r| r.task), Some("make a chart".to_string()));
//! # Ok(())
//! # }
//! ```

use crate::cognitionflow::artifacts::Artifact;
use crate::cognitionflow::orchestration::{OrchestrationError, RunStatus, Termination};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted view of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub status: RunStatus,
    pub task: String,
    pub work_dir: PathBuf,
    /// Model, variant, mode and caller-supplied options the run was started with.
    #[serde(default)]
    pub config: Value,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub termination: Option<Termination>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub rounds: usize,
}

impl RunRecord {
    /// A fresh `pending` record started now.
    pub fn new(id: &str, task: &str, work_dir: &Path, config: Value) -> Self {
        Self {
            id: id.to_string(),
            status: RunStatus::Pending,
            task: task.to_string(),
            work_dir: work_dir.to_path_buf(),
            config,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            termination: None,
            artifacts: Vec::new(),
            error: None,
            warning: None,
            rounds: 0,
        }
    }

    /// Move to `to`, refusing anything but a forward step.
    pub fn advance(&mut self, to: RunStatus) -> Result<(), OrchestrationError> {
        if !self.status.can_transition_to(to) {
            return Err(OrchestrationError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Fill in the end-of-run fields. The status itself changes through [`advance`](Self::advance).
    pub fn finish(
        &mut self,
        termination: Termination,
        error: Option<String>,
        warning: Option<String>,
        artifacts: Vec<Artifact>,
        rounds: usize,
    ) {
        let now = Utc::now();
        self.completed_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds().max(0) as u64);
        self.termination = Some(termination);
        self.error = error;
        self.warning = warning;
        self.artifacts = artifacts;
        self.rounds = rounds;
    }
}

/// Aggregate numbers over every stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub total_runs: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage of completed runs, one decimal.
    pub success_rate: f64,
    /// Mean duration of runs that finished, rounded to whole milliseconds.
    pub avg_duration_ms: u64,
}

impl RunMetrics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RunRecord>) -> Self {
        let mut total = 0usize;
        let mut successful = 0usize;
        let mut failed = 0usize;
        let mut duration_sum = 0u64;
        let mut duration_count = 0u64;

        for record in records {
            total += 1;
            match record.status {
                RunStatus::Completed => successful += 1,
                RunStatus::Failed => failed += 1,
                _ => {}
            }
            if let Some(ms) = record.duration_ms {
                duration_sum += ms;
                duration_count += 1;
            }
        }

        let success_rate = if total > 0 {
            (successful as f64 / total as f64 * 1000.0).round() / 10.0
        } else {
            0.0
        };
        let avg_duration_ms = if duration_count > 0 {
            (duration_sum as f64 / duration_count as f64).round() as u64
        } else {
            0
        };

        Self {
            total_runs: total,
            successful,
            failed,
            success_rate,
            avg_duration_ms,
        }
    }
}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Serde(serde_json::Error),
    /// A previous holder of the store lock panicked.
    Poisoned,
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "Run store IO error: {}", e),
            StoreError::Serde(e) => write!(f, "Run store serialization error: {}", e),
            StoreError::Poisoned => write!(f, "Run store lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serde(e)
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the record with `record.id`.
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError>;

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError>;

    /// Most recently started first.
    async fn history(&self, limit: usize, offset: usize) -> Result<Vec<RunRecord>, StoreError>;

    async fn metrics(&self) -> Result<RunMetrics, StoreError>;
}

fn page(records: &HashMap<String, RunRecord>, limit: usize, offset: usize) -> Vec<RunRecord> {
    let mut sorted: Vec<&RunRecord> = records.values().collect();
    sorted.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| a.id.cmp(&b.id)));
    sorted
        .into_iter()
        .skip(offset)
        .take(limit)
        .cloned()
        .collect()
}

#[derive(Default)]
pub struct InMemoryRunStore {
    records: Mutex<HashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(run_id).cloned())
    }

    async fn history(&self, limit: usize, offset: usize) -> Result<Vec<RunRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(page(&records, limit, offset))
    }

    async fn metrics(&self) -> Result<RunMetrics, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(RunMetrics::from_records(records.values()))
    }
}

/// Append-only JSONL run history.
pub struct JsonlRunStore {
    path: PathBuf,
    records: Mutex<HashMap<String, RunRecord>>,
}

impl JsonlRunStore {
    /// Open (or create) the store at `path`, loading existing lines.
    ///
    /// Lines that fail to parse are skipped with a warning so one corrupt write does not
    /// hide the rest of the history.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut records = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(fs::File::open(&path)?);
            for (line_no, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RunRecord>(&line) {
                    Ok(record) => {
                        records.insert(record.id.clone(), record);
                    }
                    Err(e) => log::warn!(
                        "{}:{}: skipping unreadable run record: {}",
                        path.display(),
                        line_no + 1,
                        e
                    ),
                }
            }
        }

        log::debug!("loaded {} run record(s) from {}", records.len(), path.display());
        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RunStore for JsonlRunStore {
    async fn save(&self, record: &RunRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let mut records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(run_id).cloned())
    }

    async fn history(&self, limit: usize, offset: usize) -> Result<Vec<RunRecord>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(page(&records, limit, offset))
    }

    async fn metrics(&self) -> Result<RunMetrics, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(RunMetrics::from_records(records.values()))
    }
}
