//! Self-healing engine: a three-stage recovery cascade attempted before a
//! failed step escalates to rollback.
//!
//! Grounded on the original `self_healing.py`. The alternative stage does
//! not consume `max_recovery_attempts` here — it is bounded solely by
//! whether the failed step names an alternative present in the graph.

use std::time::Instant;

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::domain::{ExecutionGraph, ExecutionStep, RecoveryAttempt, RecoveryOutcome, RecoveryStrategy, StepStatus};

const COMPONENT_SRC: &str = "self_heal";

/// A step executor: returns `Ok(true)` on success, `Ok(false)` on a clean
/// failure, `Err(detail)` on an exceptional failure.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, step: &ExecutionStep) -> Result<bool, String>;
}

impl<F> StepExecutor for F
where
    F: Fn(&ExecutionStep) -> Result<bool, String> + Send + Sync,
{
    fn execute(&self, step: &ExecutionStep) -> Result<bool, String> {
        self(step)
    }
}

pub struct SelfHealingEngine {
    max_attempts: u32,
}

impl SelfHealingEngine {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }

    /// Run the recovery cascade for `failed_step`. Returns the full attempt
    /// history; an all-failed (or empty) history means the caller should
    /// escalate to rollback.
    pub fn recover(
        &self,
        task_id: &str,
        failed_step: &mut ExecutionStep,
        graph: Option<&ExecutionGraph>,
        executor: &dyn StepExecutor,
        audit: &AuditLog,
    ) -> Vec<RecoveryAttempt> {
        let mut attempts = Vec::new();
        let mut attempt_ordinal = 0u32;

        // Stage 1: retry.
        if attempt_ordinal < self.max_attempts {
            attempt_ordinal += 1;
            let attempt = self.run_stage(task_id, failed_step, RecoveryStrategy::Retry, attempt_ordinal, executor);
            self.log_attempt(&attempt, audit);
            let success = attempt.outcome == RecoveryOutcome::Success;
            attempts.push(attempt);
            if success {
                return attempts;
            }
        }

        // Stage 2: alternative. Does not consume the attempt budget.
        if let Some(graph) = graph {
            if let Some(alt_step) = Self::find_alternative(failed_step, graph) {
                let attempt = self.run_stage(task_id, &alt_step, RecoveryStrategy::Alternative, attempt_ordinal + 1, executor);
                self.log_attempt(&attempt, audit);
                let success = attempt.outcome == RecoveryOutcome::Success;
                attempts.push(attempt);
                if success {
                    return attempts;
                }
            }
        }

        // Stage 3: partial recovery.
        if attempt_ordinal < self.max_attempts {
            attempt_ordinal += 1;
            let attempt = self.attempt_partial(task_id, failed_step, attempt_ordinal, graph);
            self.log_attempt(&attempt, audit);
            attempts.push(attempt);
        }

        attempts
    }

    fn run_stage(&self, task_id: &str, step: &ExecutionStep, strategy: RecoveryStrategy, ordinal: u32, executor: &dyn StepExecutor) -> RecoveryAttempt {
        let start = Instant::now();
        match executor.execute(step) {
            Ok(true) => RecoveryAttempt::new(task_id, &step.step_id, ordinal, strategy, RecoveryOutcome::Success, elapsed_ms(start), None),
            Ok(false) => RecoveryAttempt::new(task_id, &step.step_id, ordinal, strategy, RecoveryOutcome::Failed, elapsed_ms(start), None),
            Err(detail) => RecoveryAttempt::new(task_id, &step.step_id, ordinal, strategy, RecoveryOutcome::Failed, elapsed_ms(start), Some(detail)),
        }
    }

    fn find_alternative(failed_step: &ExecutionStep, graph: &ExecutionGraph) -> Option<ExecutionStep> {
        let alt_id = failed_step.alternative_step.as_ref()?;
        graph.steps.iter().find(|s| &s.step_id == alt_id).cloned()
    }

    /// Partial recovery succeeds when at least one step in the graph has
    /// already completed; the failed step is marked failed and isolated.
    fn attempt_partial(&self, task_id: &str, failed_step: &mut ExecutionStep, ordinal: u32, graph: Option<&ExecutionGraph>) -> RecoveryAttempt {
        let start = Instant::now();
        let has_completed = graph.map(|g| g.steps.iter().any(|s| s.status == StepStatus::Completed)).unwrap_or(false);

        if has_completed {
            failed_step.status = StepStatus::Failed;
            RecoveryAttempt::new(task_id, &failed_step.step_id, ordinal, RecoveryStrategy::Partial, RecoveryOutcome::Success, elapsed_ms(start), None)
        } else {
            RecoveryAttempt::new(task_id, &failed_step.step_id, ordinal, RecoveryStrategy::Partial, RecoveryOutcome::Failed, elapsed_ms(start), None)
        }
    }

    fn log_attempt(&self, attempt: &RecoveryAttempt, audit: &AuditLog) {
        let op = match attempt.strategy {
            RecoveryStrategy::Retry => Op::SelfHealRetry,
            RecoveryStrategy::Alternative => Op::SelfHealAlternative,
            RecoveryStrategy::Partial => Op::SelfHealPartial,
        };
        let outcome = match attempt.outcome {
            RecoveryOutcome::Success => Outcome::Success,
            RecoveryOutcome::Failed => Outcome::Failed,
        };
        let mut detail = format!("strategy={:?} outcome={:?} duration_ms={}", attempt.strategy, attempt.outcome, attempt.duration_ms);
        if let Some(err) = &attempt.error_detail {
            detail.push_str(&format!(" error={err}"));
        }
        audit.append(&AuditEntry::new(op, &attempt.task_id, COMPONENT_SRC, outcome).with_detail(detail));
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
