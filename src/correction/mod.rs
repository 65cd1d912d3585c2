//! Bounded self-correction loop.
//!
//! For one problem the loop generates a candidate, tests it, and on a
//! retryable failure feeds the candidate and its outcome into the next
//! generation, up to `budget` corrections after the initial attempt.
//!
//! ```text
//! Init -> Generating -> Testing -> Done(Passed)
//!             ^            |
//!             +- Retrying -+-> Done(Exhausted)
//!                          +-> Done(Unrecoverable)
//! ```
//!
//! Invariants:
//! - at most `budget + 1` generations per problem
//! - the attempt index strictly increases, so every run terminates
//! - an indeterminate test report ends the run without a retry
//! - an unusable response consumes an attempt; the next attempt reuses the
//!   last feedback

pub mod feedback;
pub mod generator;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::dataset::Problem;
use crate::error::GenerationError;
use crate::execution::Tester;

pub use feedback::{Feedback, FeedbackClassifier, Outcome, TestReport};
pub use generator::{
    CodeGenerator, Generation, GeneratorConfig, Strategy, PLACEHOLDER_CANDIDATE,
};

/// Default number of corrections after the initial attempt.
pub const DEFAULT_BUDGET: u32 = 5;

/// How a loop run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Termination {
    /// A candidate passed.
    Passed,
    /// Every attempt failed with a retryable outcome.
    Exhausted,
    /// The run stopped without a retryable outcome to act on.
    Unrecoverable { reason: String },
}

/// Final verdict persisted for a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verdict {
    Correct,
    Incorrect,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Correct => "Correct",
            Verdict::Incorrect => "Incorrect",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Correct" => Ok(Verdict::Correct),
            "Incorrect" => Ok(Verdict::Incorrect),
            other => Err(format!("unknown verdict '{}'", other)),
        }
    }
}

/// What happened to one attempt's candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptResult {
    /// The candidate was tested.
    Tested { outcome: Outcome },
    /// The response carried no usable code.
    Unusable { reason: String },
    /// The tester could not run the candidate.
    Untested { reason: String },
}

/// One iteration of the loop. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    /// 0-based attempt index.
    pub index: u32,
    pub strategy: Strategy,
    /// Tested code, absent when extraction failed.
    pub candidate: Option<String>,
    /// Whether `candidate` is the placeholder.
    pub placeholder: bool,
    pub result: AttemptResult,
}

/// Full record of one loop run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub problem_id: String,
    pub budget: u32,
    pub attempts: Vec<Attempt>,
    pub termination: Termination,
}

impl CorrectionReport {
    pub fn verdict(&self) -> Verdict {
        match self.termination {
            Termination::Passed => Verdict::Correct,
            _ => Verdict::Incorrect,
        }
    }

    /// Number of generation calls made, one per attempt.
    pub fn generations(&self) -> usize {
        self.attempts.len()
    }

    /// Candidate of the first attempt.
    pub fn initial_candidate(&self) -> Option<&str> {
        self.attempts.first().and_then(|a| a.candidate.as_deref())
    }

    /// Last candidate produced, which is the passing one on success.
    pub fn final_candidate(&self) -> Option<&str> {
        self.attempts
            .iter()
            .rev()
            .find_map(|a| a.candidate.as_deref())
    }
}

/// Loop policy.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Corrections allowed after the initial attempt.
    pub budget: u32,
    pub initial_strategy: Strategy,
    pub correction_strategy: Strategy,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            budget: DEFAULT_BUDGET,
            initial_strategy: Strategy::ZeroShot,
            correction_strategy: Strategy::ZeroShot,
        }
    }
}

/// Drives generation and testing for one problem at a time.
pub struct SelfCorrectionLoop {
    generator: Arc<CodeGenerator>,
    tester: Arc<dyn Tester>,
    classifier: FeedbackClassifier,
    config: LoopConfig,
}

impl SelfCorrectionLoop {
    pub fn new(generator: Arc<CodeGenerator>, tester: Arc<dyn Tester>, config: LoopConfig) -> Self {
        Self {
            generator,
            tester,
            classifier: FeedbackClassifier,
            config,
        }
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Run the loop to a terminal state.
    ///
    /// Only generation errors that would fail every problem the same way
    /// escape; everything else ends in a [`Termination`].
    pub async fn run(&self, problem: &Problem) -> Result<CorrectionReport, GenerationError> {
        let budget = self.config.budget;
        let mut attempts = Vec::new();
        let mut feedback: Option<Feedback> = None;
        let mut index = 0u32;

        let termination = loop {
            let strategy = if index == 0 {
                self.config.initial_strategy
            } else {
                self.config.correction_strategy
            };

            tracing::debug!(
                problem = %problem.id,
                attempt = index,
                strategy = %strategy,
                with_feedback = feedback.is_some(),
                "Generating candidate"
            );
            let generation = self
                .generator
                .generate(problem, strategy, feedback.as_ref())
                .await?;
            let placeholder = generation.is_placeholder();

            let code = match generation {
                Generation::Unusable(failure) => {
                    attempts.push(Attempt {
                        index,
                        strategy,
                        candidate: None,
                        placeholder,
                        result: AttemptResult::Unusable {
                            reason: failure.to_string(),
                        },
                    });
                    if index < budget {
                        index += 1;
                        continue;
                    }
                    break Termination::Unrecoverable {
                        reason: failure.to_string(),
                    };
                }
                other => other.candidate().unwrap_or(PLACEHOLDER_CANDIDATE).to_string(),
            };

            let report = match self.tester.test(problem, &code).await {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(problem = %problem.id, error = %err, "Tester failed");
                    attempts.push(Attempt {
                        index,
                        strategy,
                        candidate: Some(code),
                        placeholder,
                        result: AttemptResult::Untested {
                            reason: err.to_string(),
                        },
                    });
                    break Termination::Unrecoverable {
                        reason: err.to_string(),
                    };
                }
            };

            let outcome = self.classifier.classify(&report);
            tracing::info!(
                problem = %problem.id,
                attempt = index,
                outcome = %outcome,
                "Candidate tested"
            );
            attempts.push(Attempt {
                index,
                strategy,
                candidate: Some(code.clone()),
                placeholder,
                result: AttemptResult::Tested {
                    outcome: outcome.clone(),
                },
            });

            match outcome {
                Outcome::Pass => break Termination::Passed,
                Outcome::Indeterminate { detail } => {
                    break Termination::Unrecoverable {
                        reason: format!("indeterminate test report: {}", detail),
                    }
                }
                retryable if index < budget => {
                    feedback = Feedback::new(code, retryable);
                    index += 1;
                }
                _ => break Termination::Exhausted,
            }
        };

        let report = CorrectionReport {
            problem_id: problem.id.clone(),
            budget,
            attempts,
            termination,
        };
        tracing::info!(
            problem = %problem.id,
            attempts = report.generations(),
            verdict = %report.verdict(),
            "Self-correction finished"
        );
        Ok(report)
    }
}
