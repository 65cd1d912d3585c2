//! Candidate generation: prompt, model call, extraction.
//!
//! One call to [`CodeGenerator::generate`] produces one candidate. With the
//! chain-of-thought strategy it first retrieves Stack Overflow threads and
//! asks the model for step-by-step suggestions; that suggestion call is part
//! of the same generation.
//!
//! Failure policy for the model call:
//! - the endpoint rejected this request (content policy, context length,
//!   empty completion) or a transient failure outlived the client's own
//!   retries: the placeholder candidate is returned and tested like any other
//! - anything else (missing key, auth, malformed response): returned as an
//!   error, since every later problem would fail the same way
//!
//! A syntax validator that cannot start is likewise returned as an error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::correction::feedback::Feedback;
use crate::dataset::Problem;
use crate::error::{GenerationError, LlmError};
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{compose, compose_suggestions};
use crate::retrieval::Retriever;
use crate::utils::{truncate, try_extract_code, ExtractionFailure};
use crate::validation::{PythonSyntaxValidator, SyntaxValidator};

/// Candidate tested in place of a refused or failed generation.
pub const PLACEHOLDER_CANDIDATE: &str =
    "assert True # I am sorry, I am unable to generate the code. Please try again later.";

/// Default number of threads retrieved for chain-of-thought suggestions.
pub const DEFAULT_RETRIEVAL_K: usize = 1;

/// How a candidate is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Solve prompt only.
    ZeroShot,
    /// Retrieval-backed suggestions, then the solve prompt.
    ChainOfThought,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ZeroShot => "zero-shot",
            Strategy::ChainOfThought => "chain-of-thought",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "zero-shot" | "zero_shot" | "zeroshot" => Ok(Strategy::ZeroShot),
            "chain-of-thought" | "chain_of_thought" | "cot" => Ok(Strategy::ChainOfThought),
            other => Err(format!(
                "unknown strategy '{}': expected zero-shot or chain-of-thought",
                other
            )),
        }
    }
}

/// Model call settings.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Model identifier. Empty selects the provider default.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    /// Threads retrieved for chain-of-thought suggestions.
    pub retrieval_k: usize,
    /// Log full prompts and responses.
    pub verbose: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.0,
            max_tokens: None,
            retrieval_k: DEFAULT_RETRIEVAL_K,
            verbose: false,
        }
    }
}

/// Result of one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generation {
    /// Extracted, syntactically valid code.
    Code(String),
    /// The model call was refused or kept failing.
    Placeholder { reason: String },
    /// The response carried no usable code.
    Unusable(ExtractionFailure),
}

impl Generation {
    /// Code to hand to the tester, if any.
    pub fn candidate(&self) -> Option<&str> {
        match self {
            Generation::Code(code) => Some(code),
            Generation::Placeholder { .. } => Some(PLACEHOLDER_CANDIDATE),
            Generation::Unusable(_) => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Generation::Placeholder { .. })
    }
}

/// Generates candidates for problems.
pub struct CodeGenerator {
    llm: Arc<dyn LlmProvider>,
    retriever: Option<Arc<dyn Retriever>>,
    validator: Arc<dyn SyntaxValidator>,
    config: GeneratorConfig,
}

impl CodeGenerator {
    /// Generator checking candidates with the default interpreter.
    pub fn new(llm: Arc<dyn LlmProvider>, config: GeneratorConfig) -> Self {
        Self {
            llm,
            retriever: None,
            validator: Arc::new(PythonSyntaxValidator::default()),
            config,
        }
    }

    /// Replace the syntax validator used to accept extracted code.
    pub fn with_validator(mut self, validator: Arc<dyn SyntaxValidator>) -> Self {
        self.validator = validator;
        self
    }

    /// Attach a retriever for the chain-of-thought strategy.
    pub fn with_retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Whether chain-of-thought generation can retrieve threads.
    pub fn has_retriever(&self) -> bool {
        self.retriever.is_some()
    }

    /// Generate one candidate.
    pub async fn generate(
        &self,
        problem: &Problem,
        strategy: Strategy,
        feedback: Option<&Feedback>,
    ) -> Result<Generation, GenerationError> {
        let suggestions = match strategy {
            Strategy::ZeroShot => None,
            Strategy::ChainOfThought => self.suggestions(problem).await?,
        };

        let prompt = compose(
            &problem.prompt,
            &problem.code_context,
            feedback,
            suggestions.as_deref(),
        )?;

        let answer = match self.complete(prompt.into_messages()).await {
            Ok(answer) => answer,
            Err(err) if placeholder_eligible(&err) => {
                tracing::warn!(
                    problem = %problem.id,
                    error = %err,
                    "Generation refused or failed, using placeholder candidate"
                );
                return Ok(Generation::Placeholder {
                    reason: err.to_string(),
                });
            }
            Err(err) => return Err(err.into()),
        };

        match try_extract_code(&answer, self.validator.as_ref()).await {
            Ok(code) => Ok(Generation::Code(code)),
            Err(ExtractionFailure::ValidatorUnavailable { reason }) => {
                Err(GenerationError::ValidatorUnavailable(reason))
            }
            Err(failure) => {
                tracing::warn!(
                    problem = %problem.id,
                    reason = %failure,
                    "No usable code in response"
                );
                Ok(Generation::Unusable(failure))
            }
        }
    }

    /// Retrieve threads and ask for step-by-step suggestions.
    ///
    /// Missing retriever, retrieval errors, empty results, and refused
    /// suggestion calls all fall back to generating without suggestions.
    async fn suggestions(&self, problem: &Problem) -> Result<Option<String>, GenerationError> {
        let Some(retriever) = &self.retriever else {
            tracing::debug!(problem = %problem.id, "No retriever configured, skipping suggestions");
            return Ok(None);
        };

        let posts = match retriever.retrieve(&problem.prompt, self.config.retrieval_k).await {
            Ok(docs) if !docs.is_empty() => docs.into_iter().map(|d| d.content).collect::<Vec<_>>(),
            Ok(_) => {
                tracing::debug!(problem = %problem.id, "Retriever returned no threads");
                return Ok(None);
            }
            Err(err) => {
                tracing::warn!(problem = %problem.id, error = %err, "Retrieval failed");
                return Ok(None);
            }
        };

        let prompt = compose_suggestions(&problem.prompt, &posts)?;
        match self.complete(prompt.into_messages()).await {
            Ok(suggestions) => Ok(Some(suggestions)),
            Err(err) if placeholder_eligible(&err) => {
                tracing::warn!(problem = %problem.id, error = %err, "Suggestion call failed");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn complete(&self, messages: Vec<Message>) -> Result<String, LlmError> {
        if self.config.verbose {
            if let Some(last) = messages.last() {
                tracing::info!(prompt = %last.content, "Sending prompt");
            }
        }

        let mut request = GenerationRequest::new(self.config.model.clone(), messages)
            .with_temperature(self.config.temperature);
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = self.llm.generate(request).await?;
        let content = response
            .first_content()
            .ok_or(LlmError::EmptyResponse)?
            .to_string();

        tracing::debug!(
            tokens = response.usage.total_tokens,
            chars = content.len(),
            "Received completion"
        );
        if self.config.verbose {
            tracing::info!(response = %truncate(&content, 4000), "Received response");
        }
        Ok(content)
    }
}

fn placeholder_eligible(err: &LlmError) -> bool {
    err.is_request_rejection() || err.is_transient()
}
