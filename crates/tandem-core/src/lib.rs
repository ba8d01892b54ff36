//! # tandem-core
//!
//! Deterministic building blocks for guided-vs-baseline comparison runs.
//!
//! This crate never calls a model. It provides:
//! - **Judgment extraction**: free text to `{passed, score, feedback}`
//! - **Constraint enforcement**: word counts, prohibited keywords, topic
//!   coverage and gross format checks
//! - **Metrics**: per-operation timers and mergeable snapshots
//! - **Templates**: `[name]` placeholder rendering
//! - **Suite configuration**: schema-checked YAML/JSON suites
//!
//! ## Key Guarantees
//!
//! 1. **Loud failure**: an unrecoverable judgment is an error, never a
//!    fabricated verdict
//! 2. **Complete reporting**: every violated constraint is reported
//! 3. **No shared collectors**: metrics live in per-operation values
//!
//! ## Example
//!
//! ```rust,ignore
//! use tandem_core::{extract_judgment, ConstraintEnforcer, ConstraintSpec};
//!
//! let judgment = extract_judgment(model_text)?;
//! let result = ConstraintEnforcer::new().enforce(answer, &ConstraintSpec {
//!     min_words: Some(50),
//!     ..Default::default()
//! });
//! ```

pub mod constraints;
pub mod judgment;
pub mod metrics;
pub mod suite;
pub mod template;

// Re-export main types at crate root
pub use constraints::{ConstraintEnforcer, ConstraintResult, ConstraintSpec, ContentFormat};
pub use judgment::{
    extract_judgment, extract_object, normalize_unit_score, ExtractionError, ExtractionMethod,
    JsonMap, StructuredJudgment,
};
pub use metrics::{Metrics, MetricsTimer};
pub use suite::{
    ConfigError, ContextError, ModelRoles, RunParameters, SharedRequestContext, StepTemplates,
    TestCase, TestSuite, ValidationSequence, ValidationStage,
};
pub use template::{render_value, TemplateError, TemplateResolver, TemplateStore, Variables};
