//! Test suite configuration.
//!
//! A suite names the models in each role, the validation sequences guided
//! runs use, the templates for each step and the test cases. Suites are
//! loaded once, schema-checked, validated and then treated as read-only.
//! The only later write is the per-case shared context, which is
//! write-once.

mod context;
mod parser;
mod schema;
mod sequence;

pub use context::{ContextError, SharedRequestContext};
pub use parser::{
    ConfigError, GuidedRunSettings, ModelRoles, RunParameters, StepTemplateOverrides,
    StepTemplates, TestCase, TestSuite, DEFAULT_HARDWARE_PROFILE, DEFAULT_VALIDATION_SEQUENCE,
};
pub use schema::{validate_suite_schema, SchemaError};
pub use sequence::{ValidationSequence, ValidationStage};
