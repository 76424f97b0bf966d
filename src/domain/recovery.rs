//! Recovery attempt record, emitted by the Self-Healing Engine's cascade.

use serde::{Deserialize, Serialize};

use super::now_iso;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStrategy {
    Retry,
    Alternative,
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    pub task_id: String,
    pub step_id: String,
    pub attempt_ordinal: u32,
    pub strategy: RecoveryStrategy,
    pub outcome: RecoveryOutcome,
    pub duration_ms: u64,
    pub timestamp: String,
    pub error_detail: Option<String>,
}

impl RecoveryAttempt {
    pub fn new(
        task_id: impl Into<String>,
        step_id: impl Into<String>,
        attempt_ordinal: u32,
        strategy: RecoveryStrategy,
        outcome: RecoveryOutcome,
        duration_ms: u64,
        error_detail: Option<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            step_id: step_id.into(),
            attempt_ordinal,
            strategy,
            outcome,
            duration_ms,
            timestamp: now_iso(),
            error_detail,
        }
    }
}
