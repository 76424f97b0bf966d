//! Risk scorer: composite weighted score over four components, and a
//! stable descending reorder of a task list.
//!
//! Grounded on the original `risk_engine.py`: fixed complexity/impact
//! lookup tables, weighted sum clamped to `[0,1]`, stable sort descending.

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::config::RiskWeights;
use crate::domain::{Complexity, Priority, RiskScore};
use crate::learning::Historical;

const COMPONENT_SRC: &str = "risk_scorer";

/// Metadata consumed when scoring a task, mirroring the fields the planner
/// and classifier attach to a task.
#[derive(Debug, Clone)]
pub struct RiskInput {
    pub classification: Complexity,
    pub priority: Priority,
    pub sla_risk: f64,
}

fn complexity_component(c: Complexity) -> f64 {
    match c {
        Complexity::Simple => 0.33,
        Complexity::Complex => 0.67,
        Complexity::ManualReview => 1.0,
        Complexity::Unknown => 0.33,
    }
}

fn impact_component(p: Priority) -> f64 {
    match p {
        Priority::Low => 0.25,
        Priority::Normal => 0.50,
        Priority::High => 0.75,
        Priority::Critical => 1.0,
    }
}

/// Composite weighted risk scorer.
pub struct RiskScorer {
    weights: RiskWeights,
}

impl RiskScorer {
    pub fn new(weights: RiskWeights) -> Self {
        Self { weights }
    }

    /// Compute a clamped composite score for one task and emit `risk_scored`.
    pub fn score(&self, task_id: &str, input: &RiskInput, historical: Option<&Historical>, audit: &AuditLog) -> RiskScore {
        let sla_risk = input.sla_risk.clamp(0.0, 1.0);
        let complexity = complexity_component(input.classification);
        let impact = impact_component(input.priority);
        let failure_rate = historical.map(|h| h.failure_rate).unwrap_or(0.0).clamp(0.0, 1.0);

        let raw = sla_risk * self.weights.sla
            + complexity * self.weights.complexity
            + impact * self.weights.impact
            + failure_rate * self.weights.failure;
        let composite = raw.clamp(0.0, 1.0);

        let score = RiskScore::new(task_id, sla_risk, complexity, impact, failure_rate, composite);

        audit.append(
            &AuditEntry::new(Op::RiskScored, task_id, COMPONENT_SRC, Outcome::Success).with_detail(format!(
                "sla={sla_risk:.2} complexity={complexity:.2} impact={impact:.2} failure={failure_rate:.2} composite={composite:.3}"
            )),
        );

        score
    }

    /// Reorder tasks by composite score descending. Ties preserve input
    /// order (`Vec::sort_by` is a stable sort).
    pub fn reorder<T: Clone>(
        &self,
        tasks: Vec<(String, RiskInput, T)>,
        historical_by_type: impl Fn(&T) -> Option<Historical>,
        audit: &AuditLog,
    ) -> Vec<(String, RiskInput, T, RiskScore)> {
        let mut scored: Vec<(String, RiskInput, T, RiskScore)> = tasks
            .into_iter()
            .map(|(task_id, input, extra)| {
                let historical = historical_by_type(&extra);
                let score = self.score(&task_id, &input, historical.as_ref(), audit);
                (task_id, input, extra, score)
            })
            .collect();

        scored.sort_by(|a, b| b.3.composite.partial_cmp(&a.3.composite).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((first_id, ..)) = scored.first() {
            let order: Vec<&str> = scored.iter().take(5).map(|s| s.0.as_str()).collect();
            audit.append(
                &AuditEntry::new(Op::PriorityAdjusted, first_id.clone(), COMPONENT_SRC, Outcome::Success)
                    .with_detail(format!("execution_order={:?} total={}", order, scored.len())),
            );
        }

        scored
    }
}
