//! Task: the unit of work the orchestrator ingests, classifies, plans,
//! schedules, executes and learns from.

use serde::{Deserialize, Serialize};

use super::{now_iso, Priority};

/// Task type, chosen either explicitly or inferred by the planner's keyword
/// scoring over five fixed templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Document,
    Email,
    Data,
    Code,
    Report,
    General,
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Document => "document",
            Self::Email => "email",
            Self::Data => "data",
            Self::Code => "code",
            Self::Report => "report",
            Self::General => "general",
        };
        write!(f, "{s}")
    }
}

/// Complexity class assigned by the classifier's six-gate filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Complex,
    ManualReview,
    Unknown,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Simple => "simple",
            Self::Complex => "complex",
            Self::ManualReview => "manual_review",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Task lifecycle status. Terminal on `Done`/`Failed`/`FailedRollback`/`Blocked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
    FailedRollback,
    Blocked,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::FailedRollback | Self::Blocked
        )
    }
}

/// A task known to the orchestrator. The task identifier is an opaque string
/// assigned by the external task store; this type never generates its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    pub priority: Priority,
    pub complexity: Complexity,
    /// SLA-risk scalar in [0,1].
    pub sla_risk: f64,
    pub status: TaskStatus,
    pub version: u64,
    pub created_at: String,
    pub terminal_at: Option<String>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            task_id: task_id.into(),
            task_type,
            priority: Priority::Normal,
            complexity: Complexity::Unknown,
            sla_risk: 0.0,
            status: TaskStatus::Pending,
            version: 1,
            created_at: now_iso(),
            terminal_at: None,
        }
    }

    /// Advance to a new status, bumping the version counter and, if the new
    /// status is terminal, stamping `terminal_at`.
    pub fn transition(&mut self, status: TaskStatus) {
        self.status = status;
        self.version += 1;
        if status.is_terminal() {
            self.terminal_at = Some(now_iso());
        }
    }
}
