//! Outcome classification and feedback between attempts.
//!
//! The tester reports one of three raw shapes ([`TestReport`]). The
//! classifier turns that report into a closed [`Outcome`] right after the
//! test call, so the loop and the prompt composer only ever match over
//! outcome variants.
//!
//! Classification is a text heuristic over the failure transcript:
//! 1. No prior report (first attempt): no feedback at all
//! 2. Transcript mentions a traceback: [`Outcome::RuntimeFailure`]
//! 3. Transcript mentions both "executed" and "expected": [`Outcome::ResultMismatch`]
//! 4. Passing report: [`Outcome::Pass`]; anything else is [`Outcome::Indeterminate`]
//!
//! All marker checks are case-insensitive.

use serde::{Deserialize, Serialize};

/// Marker for an unhandled exception transcript.
const TRACEBACK_MARKER: &str = "traceback";
/// Markers for an executed-vs-expected description.
const EXECUTED_MARKER: &str = "executed";
const EXPECTED_MARKER: &str = "expected";

/// Raw result of running a candidate against its test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "report", rename_all = "snake_case")]
pub enum TestReport {
    /// The candidate satisfied the test.
    Passed,
    /// The candidate failed without any detail.
    Failed,
    /// The candidate failed with a transcript describing why.
    Detailed { candidate: String, detail: String },
}

/// Classified result of testing one candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// The candidate satisfied the test.
    Pass,
    /// Execution raised an error; `detail` holds the error transcript.
    RuntimeFailure { detail: String },
    /// Execution completed with a wrong value; `detail` describes executed vs expected.
    ResultMismatch { detail: String },
    /// The report matched no known shape. Terminal and never retried.
    Indeterminate { detail: String },
}

impl Outcome {
    /// Returns true for [`Outcome::Pass`].
    pub fn is_pass(&self) -> bool {
        matches!(self, Outcome::Pass)
    }

    /// Returns true for the two outcomes that feed another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Outcome::RuntimeFailure { .. } | Outcome::ResultMismatch { .. }
        )
    }

    /// Short label used in logs and attempt records.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Pass => "pass",
            Outcome::RuntimeFailure { .. } => "runtime_failure",
            Outcome::ResultMismatch { .. } => "result_mismatch",
            Outcome::Indeterminate { .. } => "indeterminate",
        }
    }

    /// Failure transcript, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Outcome::Pass => None,
            Outcome::RuntimeFailure { detail }
            | Outcome::ResultMismatch { detail }
            | Outcome::Indeterminate { detail } => Some(detail),
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// The previous attempt's code and failed outcome, carried into the next
/// prompt.
///
/// Only runtime failures and result mismatches can become feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    code: String,
    outcome: Outcome,
}

impl Feedback {
    /// Build feedback from a tested candidate. Returns `None` unless the
    /// outcome is retryable.
    pub fn new(code: impl Into<String>, outcome: Outcome) -> Option<Self> {
        if outcome.is_retryable() {
            Some(Self {
                code: code.into(),
                outcome,
            })
        } else {
            None
        }
    }

    /// Code produced by the previous attempt.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Outcome of testing that code.
    pub fn outcome(&self) -> &Outcome {
        &self.outcome
    }
}

/// Classifies tester reports into outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedbackClassifier;

impl FeedbackClassifier {
    /// Classify the report of a previous attempt, if there was one.
    ///
    /// The first attempt has no prior report and therefore no outcome; that
    /// is distinct from an empty failure.
    pub fn classify_prior(&self, prior: Option<&TestReport>) -> Option<Outcome> {
        prior.map(|report| self.classify(report))
    }

    /// Classify one tester report.
    ///
    /// An untyped failure becomes a result mismatch without detail.
    pub fn classify(&self, report: &TestReport) -> Outcome {
        match report {
            TestReport::Passed => Outcome::Pass,
            TestReport::Failed => Outcome::ResultMismatch {
                detail: String::new(),
            },
            TestReport::Detailed { detail, .. } => self.classify_detail(detail),
        }
    }

    /// Classify a failure transcript.
    pub fn classify_detail(&self, detail: &str) -> Outcome {
        let lowered = detail.to_lowercase();
        if lowered.contains(TRACEBACK_MARKER) {
            Outcome::RuntimeFailure {
                detail: detail.to_string(),
            }
        } else if lowered.contains(EXECUTED_MARKER) && lowered.contains(EXPECTED_MARKER) {
            Outcome::ResultMismatch {
                detail: detail.to_string(),
            }
        } else {
            Outcome::Indeterminate {
                detail: detail.to_string(),
            }
        }
    }
}
