//! Batch driver over the DS-1000 problems.
//!
//! Problems are processed one at a time, library by library in the
//! configured order. A problem with a recorded verdict is skipped without
//! calling the model, which makes an interrupted run resumable by simply
//! starting it again.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::correction::{SelfCorrectionLoop, Verdict};
use crate::dataset::{Dataset, Library};
use crate::error::{GenerationError, StorageError};
use crate::storage::{accuracy_by_library, CheckpointStore, LibraryAccuracy};

/// Errors that abort a batch run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Generation failed in a way that would repeat for every problem.
    #[error("Generation failed on {problem_id}: {source}")]
    Generation {
        problem_id: String,
        #[source]
        source: GenerationError,
    },

    /// Checkpoint store failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Pause between processed problems.
#[derive(Debug, Clone, Copy)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub async fn pause(&self) {
        if self.is_enabled() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// Outcome of a batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// Problems run through the loop in this invocation.
    pub processed: usize,
    /// Problems skipped because a verdict already existed.
    pub skipped: usize,
    /// Of `processed`, how many passed.
    pub correct: usize,
    /// Total model calls for the correction loop in this invocation.
    pub generations: usize,
    /// Accuracy over every recorded verdict of the selected libraries.
    pub accuracy: Vec<LibraryAccuracy>,
}

/// Sequential batch driver.
pub struct BatchRunner {
    correction: Arc<SelfCorrectionLoop>,
    store: Arc<dyn CheckpointStore>,
    libraries: Vec<Library>,
    limit: Option<usize>,
    throttle: Throttle,
}

impl BatchRunner {
    pub fn new(correction: Arc<SelfCorrectionLoop>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            correction,
            store,
            libraries: Library::ALL.to_vec(),
            limit: None,
            throttle: Throttle::new(Duration::ZERO),
        }
    }

    pub fn with_libraries(mut self, libraries: Vec<Library>) -> Self {
        self.libraries = libraries;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Run every selected problem that has no verdict yet.
    pub async fn run(&self, dataset: &Dataset) -> Result<RunSummary, RunError> {
        let mut summary = RunSummary::default();

        for &library in &self.libraries {
            let problems = dataset.problems(library);
            let take = self.limit.unwrap_or(problems.len()).min(problems.len());
            tracing::info!(library = %library, problems = take, "Starting library");

            for problem in &problems[..take] {
                if self.store.is_resolved(&problem.id).await? {
                    tracing::debug!(problem = %problem.id, "Already resolved, skipping");
                    summary.skipped += 1;
                    continue;
                }

                let report = self.correction.run(problem).await.map_err(|source| {
                    RunError::Generation {
                        problem_id: problem.id.clone(),
                        source,
                    }
                })?;
                self.store.record(&report).await?;

                summary.processed += 1;
                summary.generations += report.generations();
                if report.verdict() == Verdict::Correct {
                    summary.correct += 1;
                }

                self.throttle.pause().await;
            }
        }

        let selected: Vec<&str> = self.libraries.iter().map(|l| l.as_str()).collect();
        let verdicts: Vec<_> = self
            .store
            .verdicts()
            .await?
            .into_iter()
            .filter(|(id, _)| {
                id.split('_')
                    .next()
                    .is_some_and(|prefix| selected.contains(&prefix))
            })
            .collect();
        summary.accuracy = accuracy_by_library(&verdicts);

        tracing::info!(
            processed = summary.processed,
            skipped = summary.skipped,
            correct = summary.correct,
            "Batch finished"
        );
        Ok(summary)
    }
}
