//! Execution step: one node of an [`super::ExecutionGraph`].

use serde::{Deserialize, Serialize};

/// Status of a single execution step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single node in an execution graph.
///
/// Invariant: `priority >= 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_id: String,
    pub name: String,
    pub priority: u32,
    pub status: StepStatus,
    pub estimated_duration_minutes: Option<f64>,
    pub alternative_step: Option<String>,
}

impl ExecutionStep {
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, priority: u32) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            priority,
            status: StepStatus::Pending,
            estimated_duration_minutes: None,
            alternative_step: None,
        }
    }

    pub fn with_alternative(mut self, alt: impl Into<String>) -> Self {
        self.alternative_step = Some(alt.into());
        self
    }

    pub fn with_estimated_duration(mut self, minutes: f64) -> Self {
        self.estimated_duration_minutes = Some(minutes);
        self
    }
}
