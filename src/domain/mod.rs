//! Domain types for the orchestrator.
//!
//! Core data model: [`Task`], [`ExecutionStep`], [`ExecutionGraph`],
//! [`RiskScore`], [`RecoveryAttempt`], [`ConcurrencySlot`]. Timestamps
//! throughout are genuine ISO-8601 (`chrono`), never ad-hoc string surgery.

mod graph;
mod priority;
mod recovery;
mod risk;
mod slot;
mod step;
mod task;

pub use graph::ExecutionGraph;
pub use priority::Priority;
pub use recovery::{RecoveryAttempt, RecoveryOutcome, RecoveryStrategy};
pub use risk::RiskScore;
pub use slot::{ConcurrencySlot, SlotStatus};
pub use step::{ExecutionStep, StepStatus};
pub use task::{Complexity, Task, TaskStatus, TaskType};

/// Current timestamp as RFC 3339 with millisecond precision.
pub fn now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
