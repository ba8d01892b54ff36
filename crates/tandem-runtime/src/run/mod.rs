//! Records produced by the runner.
//!
//! Each test case x hardware profile x edge model combination yields one
//! [`RunRecord`] holding the four [`RunOutcome`]s of the protocol:
//!
//! | Run | Kind            | Model | Guidance                      |
//! |-----|-----------------|-------|-------------------------------|
//! | 1   | `BaselineLarge` | large | none                          |
//! | 2   | `GuidedLarge`   | large | shared context + validation   |
//! | 3   | `BaselineEdge`  | edge  | none                          |
//! | 4   | `GuidedEdge`    | edge  | shared context + validation   |

mod record;
mod sink;
mod summary;

pub use record::{
    FinalDecision, ModelRole, RecordStatus, RunKind, RunOutcome, RunPhase, RunRecord, RunStatus,
    ScoredJudgment,
};
pub use sink::{MemorySink, RunSink};
pub use summary::{RunError, RunKindStats, SuiteSummary};
