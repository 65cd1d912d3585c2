//! Batch run configuration.
//!
//! Covers the generation client, the correction budget, which problems to
//! run, throttling between problems, the tester, output locations and
//! retrieval for chain-of-thought prompting.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::correction::generator::DEFAULT_RETRIEVAL_K;
use crate::correction::{Strategy, DEFAULT_BUDGET};
use crate::dataset::Library;
use crate::execution::{DEFAULT_PYTHON, DEFAULT_TEST_TIMEOUT_SECS};
use crate::llm::providers::DEFAULT_MAX_RETRIES;

/// Default pause between processed problems.
pub const DEFAULT_THROTTLE_SECS: u64 = 5;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for a batch self-correction run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    // Generation settings
    /// Model identifier. Empty selects the client default.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Retries on transient generation failures.
    pub max_retries: u32,
    /// Log full prompts and responses at info level.
    pub verbose: bool,

    // Loop settings
    /// Corrections allowed after the initial attempt.
    pub budget: u32,
    /// Strategy of the first attempt. `None` picks chain-of-thought when a
    /// retrieval database is configured and zero-shot otherwise.
    pub initial_strategy: Option<Strategy>,
    /// Strategy of correction attempts.
    pub correction_strategy: Strategy,

    // Selection settings
    /// DS-1000 JSON-lines file.
    pub dataset_path: PathBuf,
    /// Libraries to run, in order.
    pub libraries: Vec<Library>,
    /// Maximum problems per library.
    pub limit: Option<usize>,
    /// Pause after each processed problem. Zero disables throttling.
    pub throttle: Duration,

    // Tester settings
    /// Python interpreter used to run candidates.
    pub python: String,
    /// Wall-clock limit for one test run.
    pub test_timeout: Duration,

    // Output settings
    /// Root directory for run outputs.
    pub output_dir: PathBuf,
    /// Run name; artifacts go to `{output_dir}/{run_name}`.
    pub run_name: String,

    // Retrieval settings
    /// SQLite vector store of rendered Stack Overflow threads.
    pub retrieval_db: Option<PathBuf>,
    /// Threads retrieved per problem.
    pub retrieval_k: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            temperature: 0.0,
            max_retries: DEFAULT_MAX_RETRIES,
            verbose: false,

            budget: DEFAULT_BUDGET,
            initial_strategy: None,
            correction_strategy: Strategy::ZeroShot,

            dataset_path: PathBuf::from("data/ds1000.jsonl"),
            libraries: Library::ALL.to_vec(),
            limit: None,
            throttle: Duration::from_secs(DEFAULT_THROTTLE_SECS),

            python: DEFAULT_PYTHON.to_string(),
            test_timeout: Duration::from_secs(DEFAULT_TEST_TIMEOUT_SECS),

            output_dir: PathBuf::from("output"),
            run_name: "default".to_string(),

            retrieval_db: None,
            retrieval_k: DEFAULT_RETRIEVAL_K,
        }
    }
}

impl PipelineConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SELF_DEBUG_MODEL`: Model identifier
    /// - `SELF_DEBUG_TEMPERATURE`: Sampling temperature (default: 0.0)
    /// - `SELF_DEBUG_MAX_RETRIES`: Generation retries (default: 10)
    /// - `SELF_DEBUG_VERBOSE`: Log prompts and responses (default: false)
    /// - `SELF_DEBUG_BUDGET`: Corrections per problem (default: 5)
    /// - `SELF_DEBUG_INITIAL_STRATEGY`: `zero-shot` or `chain-of-thought`
    /// - `SELF_DEBUG_CORRECTION_STRATEGY`: `zero-shot` or `chain-of-thought`
    /// - `SELF_DEBUG_DATASET`: DS-1000 JSON-lines path
    /// - `SELF_DEBUG_LIBRARIES`: Comma-separated library names
    /// - `SELF_DEBUG_LIMIT`: Maximum problems per library
    /// - `SELF_DEBUG_THROTTLE_SECS`: Pause between problems (default: 5)
    /// - `SELF_DEBUG_PYTHON`: Python interpreter (default: python3)
    /// - `SELF_DEBUG_TEST_TIMEOUT_SECS`: Test timeout (default: 120)
    /// - `SELF_DEBUG_OUTPUT_DIR`: Output root (default: output)
    /// - `SELF_DEBUG_RUN_NAME`: Run name (default: default)
    /// - `SELF_DEBUG_RETRIEVAL_DB`: Vector store path
    /// - `SELF_DEBUG_RETRIEVAL_K`: Threads per problem (default: 1)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("SELF_DEBUG_MODEL") {
            config.model = val;
        }
        if let Some(val) = lookup("SELF_DEBUG_TEMPERATURE") {
            config.temperature = parse_env_value(&val, "SELF_DEBUG_TEMPERATURE")?;
        }
        if let Some(val) = lookup("SELF_DEBUG_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "SELF_DEBUG_MAX_RETRIES")?;
        }
        if let Some(val) = lookup("SELF_DEBUG_VERBOSE") {
            config.verbose = parse_env_bool(&val, "SELF_DEBUG_VERBOSE")?;
        }

        if let Some(val) = lookup("SELF_DEBUG_BUDGET") {
            config.budget = parse_env_value(&val, "SELF_DEBUG_BUDGET")?;
        }
        if let Some(val) = lookup("SELF_DEBUG_INITIAL_STRATEGY") {
            config.initial_strategy = Some(parse_env_value(&val, "SELF_DEBUG_INITIAL_STRATEGY")?);
        }
        if let Some(val) = lookup("SELF_DEBUG_CORRECTION_STRATEGY") {
            config.correction_strategy = parse_env_value(&val, "SELF_DEBUG_CORRECTION_STRATEGY")?;
        }

        if let Some(val) = lookup("SELF_DEBUG_DATASET") {
            config.dataset_path = PathBuf::from(val);
        }
        if let Some(val) = lookup("SELF_DEBUG_LIBRARIES") {
            config.libraries = parse_libraries(&val, "SELF_DEBUG_LIBRARIES")?;
        }
        if let Some(val) = lookup("SELF_DEBUG_LIMIT") {
            config.limit = Some(parse_env_value(&val, "SELF_DEBUG_LIMIT")?);
        }
        if let Some(val) = lookup("SELF_DEBUG_THROTTLE_SECS") {
            let secs: u64 = parse_env_value(&val, "SELF_DEBUG_THROTTLE_SECS")?;
            config.throttle = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("SELF_DEBUG_PYTHON") {
            config.python = val;
        }
        if let Some(val) = lookup("SELF_DEBUG_TEST_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "SELF_DEBUG_TEST_TIMEOUT_SECS")?;
            config.test_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("SELF_DEBUG_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(val);
        }
        if let Some(val) = lookup("SELF_DEBUG_RUN_NAME") {
            config.run_name = val;
        }

        if let Some(val) = lookup("SELF_DEBUG_RETRIEVAL_DB") {
            config.retrieval_db = Some(PathBuf::from(val));
        }
        if let Some(val) = lookup("SELF_DEBUG_RETRIEVAL_K") {
            config.retrieval_k = parse_env_value(&val, "SELF_DEBUG_RETRIEVAL_K")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.libraries.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "libraries cannot be empty".to_string(),
            ));
        }

        if self.limit == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "limit must be greater than 0".to_string(),
            ));
        }

        if self.python.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "python cannot be empty".to_string(),
            ));
        }

        if self.test_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "test_timeout must be greater than 0".to_string(),
            ));
        }

        if self.run_name.is_empty()
            || self.run_name.contains(['/', '\\'])
            || self.run_name == ".."
        {
            return Err(ConfigError::ValidationFailed(format!(
                "run_name '{}' must be a single path component",
                self.run_name
            )));
        }

        if self.retrieval_k == 0 {
            return Err(ConfigError::ValidationFailed(
                "retrieval_k must be greater than 0".to_string(),
            ));
        }

        if self.initial_strategy == Some(Strategy::ChainOfThought) && self.retrieval_db.is_none()
        {
            return Err(ConfigError::ValidationFailed(
                "chain-of-thought initial strategy requires retrieval_db".to_string(),
            ));
        }

        Ok(())
    }

    /// Strategy of the first attempt after resolving the default.
    pub fn resolved_initial_strategy(&self) -> Strategy {
        match (self.initial_strategy, &self.retrieval_db) {
            (Some(strategy), _) => strategy,
            (None, Some(_)) => Strategy::ChainOfThought,
            (None, None) => Strategy::ZeroShot,
        }
    }

    /// Directory receiving this run's artifacts.
    pub fn run_dir(&self) -> PathBuf {
        self.output_dir.join(&self.run_name)
    }

    /// Builder method to set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder method to set temperature.
    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    /// Builder method to set generation retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method to enable prompt logging.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builder method to set the correction budget.
    pub fn with_budget(mut self, budget: u32) -> Self {
        self.budget = budget;
        self
    }

    /// Builder method to set the first attempt's strategy.
    pub fn with_initial_strategy(mut self, strategy: Strategy) -> Self {
        self.initial_strategy = Some(strategy);
        self
    }

    /// Builder method to set the correction strategy.
    pub fn with_correction_strategy(mut self, strategy: Strategy) -> Self {
        self.correction_strategy = strategy;
        self
    }

    /// Builder method to set the dataset path.
    pub fn with_dataset_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_path = path.into();
        self
    }

    /// Builder method to set the libraries to run.
    pub fn with_libraries(mut self, libraries: Vec<Library>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Builder method to cap problems per library.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Builder method to set the throttle delay.
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Builder method to set the Python interpreter.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Builder method to set the test timeout.
    pub fn with_test_timeout(mut self, timeout: Duration) -> Self {
        self.test_timeout = timeout;
        self
    }

    /// Builder method to set the output directory.
    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    /// Builder method to set the run name.
    pub fn with_run_name(mut self, name: impl Into<String>) -> Self {
        self.run_name = name.into();
        self
    }

    /// Builder method to set the retrieval database.
    pub fn with_retrieval_db(mut self, path: impl Into<PathBuf>) -> Self {
        self.retrieval_db = Some(path.into());
        self
    }

    /// Builder method to set retrieved threads per problem.
    pub fn with_retrieval_k(mut self, k: usize) -> Self {
        self.retrieval_k = k;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a comma-separated library list.
pub fn parse_libraries(value: &str, key: &str) -> Result<Vec<Library>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            name.parse::<Library>().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .collect()
}
