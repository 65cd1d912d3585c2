//! Batch self-correction over DS-1000.
//!
//! - **Config**: run settings with environment overrides
//! - **Runner**: sequential driver with checkpoint-based resume and throttling
//!
//! # Example
//!
//! ```rust,ignore
//! use self_debug::pipeline::{BatchRunner, PipelineConfig, Throttle};
//!
//! let config = PipelineConfig::from_env()?.with_budget(3);
//! let runner = BatchRunner::new(correction, store)
//!     .with_libraries(config.libraries.clone())
//!     .with_limit(config.limit)
//!     .with_throttle(Throttle::new(config.throttle));
//!
//! let summary = runner.run(&dataset).await?;
//! for row in &summary.accuracy {
//!     println!("{}", row);
//! }
//! ```

pub mod config;
pub mod runner;

pub use config::{ConfigError, PipelineConfig, DEFAULT_THROTTLE_SECS};
pub use runner::{BatchRunner, RunError, RunSummary, Throttle};
