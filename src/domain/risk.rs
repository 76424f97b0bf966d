//! Risk score: a composite, recomputed on every scheduling decision and
//! never persisted long-term.

use serde::{Deserialize, Serialize};

use super::now_iso;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskScore {
    pub task_id: String,
    pub sla_risk: f64,
    pub complexity: f64,
    pub impact: f64,
    pub failure_rate: f64,
    pub composite: f64,
    pub computed_at: String,
}

impl RiskScore {
    pub fn new(task_id: impl Into<String>, sla_risk: f64, complexity: f64, impact: f64, failure_rate: f64, composite: f64) -> Self {
        Self {
            task_id: task_id.into(),
            sla_risk,
            complexity,
            impact,
            failure_rate,
            composite,
            computed_at: now_iso(),
        }
    }
}
