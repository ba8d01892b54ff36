//! # tandem-runtime
//!
//! Model-backed execution for Tandem comparison suites.
//!
//! `tandem-core` decides what a judgment, a constraint violation or a
//! suite looks like; this crate talks to models. It provides:
//!
//! - **Providers**: the [`LlmProvider`] trait, a factory registry, a
//!   deterministic mock and an OpenAI-compatible HTTP client (feature
//!   `http`)
//! - **Execution**: one timed, non-retried call per step
//! - **Validation**: priority-ordered stage sequences with abort and
//!   weighted scoring
//! - **Runner**: the four-run protocol over every test case and model
//!   combination, producing [`RunRecord`]s and a [`SuiteSummary`]
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tandem_core::{TemplateStore, TestSuite};
//! use tandem_runtime::{MemorySink, RunnerBuilder, RuntimeConfig};
//!
//! let suite = TestSuite::from_file("suite.yaml")?;
//! let mut templates = TemplateStore::new();
//! templates.load_dir("templates")?;
//! templates.extend(suite.templates.clone());
//!
//! let runner = RunnerBuilder::new()
//!     .config(RuntimeConfig::mock())
//!     .templates(Arc::new(templates))
//!     .build()?;
//!
//! let mut sink = MemorySink::new();
//! let summary = runner.run_suite(&suite, &mut sink).await?;
//! ```

pub mod config;
pub mod executor;
pub mod models;
pub mod orchestrator;
pub mod providers;
pub mod run;
pub mod validation;

pub use config::{GenerationParams, ModelSpec, RuntimeConfig, RuntimeConfigError, StepParams};
pub use executor::{ExecutionError, Generation, ModelExecutor};
pub use models::{ModelCache, ModelHandle, ModelInitError};
pub use orchestrator::{parse_scored_judgment, run_id, Runner, RunnerBuilder, RunnerError, StepError};
pub use providers::{LlmProvider, ProviderError, ProviderRegistry};
pub use run::{
    FinalDecision, MemorySink, RecordStatus, RunKind, RunOutcome, RunPhase, RunRecord, RunSink,
    RunStatus, SuiteSummary,
};
pub use validation::{
    ModelStageExecutor, StageExecutor, StageOutput, StageResult, ValidationEngine,
    ValidationError, ValidationResult,
};
