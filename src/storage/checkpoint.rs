//! Per-problem run artifacts, doubling as the resume checkpoint.
//!
//! Under the run directory each resolved problem has:
//!
//! ```text
//! {id}.py           last candidate (empty when none was produced)
//! {id}.json         full attempt log
//! initial/{id}.py   first candidate
//! {id}.txt          verdict token: Correct or Incorrect
//! ```
//!
//! The verdict file is written last. Its presence is the only signal that a
//! problem has been handled, so an interrupted write leaves the problem
//! unresolved and it is simply redone on the next run.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::correction::{CorrectionReport, Verdict};
use crate::error::StorageError;

const VERDICT_EXT: &str = "txt";

/// Checkpoint store keyed by problem identifier.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Whether a verdict exists for the problem. Idempotent.
    async fn is_resolved(&self, problem_id: &str) -> Result<bool, StorageError>;

    /// Persist the artifacts and verdict for a finished problem.
    async fn record(&self, report: &CorrectionReport) -> Result<(), StorageError>;

    /// All recorded verdicts, sorted by problem identifier.
    async fn verdicts(&self) -> Result<Vec<(String, Verdict)>, StorageError>;
}

/// Filesystem checkpoint store rooted at one run directory.
#[derive(Debug, Clone)]
pub struct FsCheckpointStore {
    run_dir: PathBuf,
}

impl FsCheckpointStore {
    /// Create a store for `{output_dir}/{run_name}`.
    pub fn new(output_dir: impl AsRef<Path>, run_name: &str) -> Self {
        Self {
            run_dir: output_dir.as_ref().join(run_name),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    fn path_for(&self, problem_id: &str, ext: &str) -> Result<PathBuf, StorageError> {
        validate_id(problem_id)?;
        Ok(self.run_dir.join(format!("{}.{}", problem_id, ext)))
    }

    fn initial_path(&self, problem_id: &str) -> Result<PathBuf, StorageError> {
        validate_id(problem_id)?;
        Ok(self.run_dir.join("initial").join(format!("{}.py", problem_id)))
    }
}

fn validate_id(problem_id: &str) -> Result<(), StorageError> {
    if problem_id.is_empty()
        || problem_id.contains(['/', '\\'])
        || problem_id.contains("..")
    {
        return Err(StorageError::InvalidId(problem_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn is_resolved(&self, problem_id: &str) -> Result<bool, StorageError> {
        let path = self.path_for(problem_id, VERDICT_EXT)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn record(&self, report: &CorrectionReport) -> Result<(), StorageError> {
        let id = &report.problem_id;
        let initial = self.initial_path(id)?;
        if let Some(parent) = initial.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(
            self.path_for(id, "py")?,
            report.final_candidate().unwrap_or_default(),
        )
        .await?;
        fs::write(&initial, report.initial_candidate().unwrap_or_default()).await?;
        fs::write(
            self.path_for(id, "json")?,
            serde_json::to_string_pretty(report)?,
        )
        .await?;

        let verdict_path = self.path_for(id, VERDICT_EXT)?;
        let staging = self.path_for(id, "txt.tmp")?;
        fs::write(&staging, report.verdict().as_str()).await?;
        fs::rename(&staging, &verdict_path).await?;

        tracing::debug!(problem = %id, verdict = %report.verdict(), "Checkpoint recorded");
        Ok(())
    }

    async fn verdicts(&self) -> Result<Vec<(String, Verdict)>, StorageError> {
        if !fs::try_exists(&self.run_dir).await? {
            return Ok(Vec::new());
        }

        let mut verdicts = Vec::new();
        let mut entries = fs::read_dir(&self.run_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VERDICT_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let content = fs::read_to_string(&path).await?;
            match content.parse::<Verdict>() {
                Ok(verdict) => verdicts.push((id.to_string(), verdict)),
                Err(reason) => {
                    tracing::warn!(path = %path.display(), reason = %reason, "Ignoring unreadable verdict");
                }
            }
        }
        verdicts.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(verdicts)
    }
}
