//! Orchestrator loop: wires every component together on a configurable
//! polling cadence.
//!
//! Grounded on the original `main.py`'s tick sequence (credential scan,
//! rollback purge, task move, classify/plan/score, admission, execution,
//! learning) and the teacher's daemon wiring style for the async loop
//! itself: component handles built once at startup, a `tokio::select!`
//! over the tick interval and a shutdown signal, per-tick errors caught
//! and turned into audit entries rather than propagated.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::interval;

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::classifier::{ClassifyMetadata, Classifier};
use crate::collaborators::{CredentialScanner, Notifier, NotificationEvent, RollbackSystem, TaskStore};
use crate::concurrency::ConcurrencyController;
use crate::config::Config;
use crate::domain::{Complexity, TaskStatus};
use crate::healing::{SelfHealingEngine, StepExecutor};
use crate::learning::{Historical, LearningStore, RecordOutcome};
use crate::planner::Planner;
use crate::risk_scorer::{RiskInput, RiskScorer};
use crate::sla_predictor::SlaPredictor;

const COMPONENT_SRC: &str = "orchestrator";

/// Everything the loop needs, constructed once at startup.
pub struct Orchestrator {
    config: Config,
    audit: Arc<AuditLog>,
    learning: Arc<LearningStore>,
    planner: Planner,
    classifier: Classifier,
    risk_scorer: RiskScorer,
    sla_predictor: SlaPredictor,
    concurrency: Arc<ConcurrencyController>,
    healing: SelfHealingEngine,
    task_store: Arc<dyn TaskStore>,
    rollback: Arc<dyn RollbackSystem>,
    notifier: Arc<dyn Notifier>,
    credential_scanner: Arc<dyn CredentialScanner>,
    executor: Arc<dyn StepExecutor>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        audit: Arc<AuditLog>,
        learning: Arc<LearningStore>,
        task_store: Arc<dyn TaskStore>,
        rollback: Arc<dyn RollbackSystem>,
        notifier: Arc<dyn Notifier>,
        credential_scanner: Arc<dyn CredentialScanner>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        let concurrency = Arc::new(ConcurrencyController::new(config.concurrency.max_parallel_tasks, config.concurrency.task_timeout_minutes));
        let classifier = Classifier::new(
            config.classifier.clone(),
            config.storage.vault_root.to_string_lossy().to_string(),
            config.storage.rollback_archive_dir.exists(),
            config.sla.sla_simple_minutes,
            config.sla.sla_complex_minutes,
        );
        let risk_scorer = RiskScorer::new(config.risk);
        let sla_predictor = SlaPredictor::new(config.sla.prediction_threshold);
        let healing = SelfHealingEngine::new(config.recovery.max_recovery_attempts);

        Self {
            config,
            audit,
            learning,
            planner: Planner::new(),
            classifier,
            risk_scorer,
            sla_predictor,
            concurrency,
            healing,
            task_store,
            rollback,
            notifier,
            credential_scanner,
            executor,
        }
    }

    /// Run the loop until `shutdown` fires, ticking at `poll_interval_ms`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(StdDuration::from_millis(self.config.concurrency.poll_interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick_guarded().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("shutdown signal received, exiting orchestrator loop");
                        return;
                    }
                }
            }
        }
    }

    /// Run one tick, catching any component failure so it never aborts
    /// the loop.
    async fn tick_guarded(&self) {
        if let Err(e) = self.tick().await {
            tracing::error!(error = %e, "orchestrator tick failed");
            self.audit.append(&AuditEntry::new(Op::Error, "orchestrator", COMPONENT_SRC, Outcome::Failed).with_detail(e.clone()));
            self.audit.append(&AuditEntry::new(Op::HeartbeatFail, "orchestrator", COMPONENT_SRC, Outcome::Failed).with_detail(e));
        }
    }

    async fn tick(&self) -> Result<(), String> {
        self.run_credential_scan();
        self.rollback.purge_expired();
        // Task movement between status-keyed folders is an external
        // vault-layout concern; this core has no folder structure of its
        // own to move tasks between.

        self.plan_unclassified_tasks();
        self.admit_and_execute_pending();
        self.check_slot_timeouts();

        Ok(())
    }

    fn run_credential_scan(&self) {
        let root = self.config.storage.vault_root.to_string_lossy().to_string();
        for finding in self.credential_scanner.scan(&root) {
            self.audit.append(
                &AuditEntry::new(Op::CredentialFlagged, finding.path.clone(), COMPONENT_SRC, Outcome::Flagged)
                    .with_detail(finding.reason),
            );
        }
    }

    fn plan_unclassified_tasks(&self) {
        for mut task in self.task_store.list_pending() {
            if task.complexity != Complexity::Unknown {
                continue;
            }
            let Some((content, _metadata)) = self.task_store.read(&task.task_id) else { continue };

            let task_type_str = task.task_type.to_string();
            let graph = match self.planner.decompose(&content, Some(&task_type_str), &task.task_id, &self.learning, &self.audit) {
                Ok(g) => g,
                Err(e) => {
                    self.audit.append(&AuditEntry::new(Op::Error, &task.task_id, COMPONENT_SRC, Outcome::Failed).with_detail(e.to_string()));
                    continue;
                }
            };
            self.persist_graph(&graph);

            let plan_steps: Vec<String> = graph.steps.iter().map(|s| s.name.clone()).collect();
            let (complexity, _gates) = self.classifier.classify(&content, &plan_steps, &ClassifyMetadata::default(), &self.learning, &self.audit, &task.task_id, &task_type_str);

            task.complexity = complexity;

            if self.config.features.enable_risk_scoring {
                let historical: Option<Historical> = self.learning.query(&task.task_type.to_string()).map(|m| (&m).into());
                let risk_input = RiskInput {
                    classification: complexity,
                    priority: task.priority,
                    sla_risk: task.sla_risk,
                };
                let score = self.risk_scorer.score(&task.task_id, &risk_input, historical.as_ref(), &self.audit);
                task.sla_risk = score.composite;
            }

            let new_status = if complexity == Complexity::ManualReview { TaskStatus::Blocked } else { TaskStatus::Pending };
            self.audit.append(
                &AuditEntry::new(Op::TaskClassified, &task.task_id, COMPONENT_SRC, Outcome::Success)
                    .with_detail(format!("complexity={complexity}")),
            );
            if self.task_store.update_classification(&task.task_id, complexity, task.sla_risk, task.version) {
                self.task_store.update_status(&task.task_id, new_status, task.version + 1);
            }
        }
    }

    fn persist_graph(&self, graph: &crate::domain::ExecutionGraph) {
        let Ok(json) = graph.to_json() else { return };
        let dir = &self.config.storage.plans_dir;
        if std::fs::create_dir_all(dir).is_err() {
            return;
        }
        let path = dir.join(format!("{}.graph.json", graph.task_id));
        if let Err(e) = std::fs::write(&path, json) {
            tracing::warn!(error = %e, path = %path.display(), "failed to persist execution graph");
        }
    }

    fn admit_and_execute_pending(&self) {
        let mut admissible: Vec<_> = self
            .task_store
            .list_pending()
            .into_iter()
            .filter(|t| self.is_auto_executable(t.complexity))
            .collect();

        // Risk-priority admission order; disabling reordering degrades to
        // plain ingestion order (a stable sort over an unchanged key is a
        // no-op).
        if self.config.features.enable_risk_scoring {
            admissible.sort_by(|a, b| b.sla_risk.partial_cmp(&a.sla_risk).unwrap_or(std::cmp::Ordering::Equal));
        }

        for task in admissible {
            match self.concurrency.acquire(&task.task_id) {
                Some(slot) => {
                    self.execute_task(&task.task_id, task.version, task.task_type);
                    self.concurrency.complete(slot.slot_id);
                }
                None => {
                    self.concurrency.enqueue(&task.task_id, task.sla_risk, &self.audit);
                }
            }
        }
    }

    /// Whether the orchestrator should admit and run this task's graph
    /// itself, rather than leaving it pending for an external executor.
    fn is_auto_executable(&self, complexity: Complexity) -> bool {
        match complexity {
            Complexity::Simple => self.config.features.auto_execute_simple,
            Complexity::Complex => self.config.features.auto_execute_complex,
            Complexity::ManualReview | Complexity::Unknown => false,
        }
    }

    fn execute_task(&self, task_id: &str, version: u64, task_type: crate::domain::TaskType) {
        let plans_path = self.config.storage.plans_dir.join(format!("{task_id}.graph.json"));
        let Ok(raw) = std::fs::read_to_string(&plans_path) else {
            return;
        };
        let Ok(mut graph) = crate::domain::ExecutionGraph::from_json(&raw) else {
            return;
        };
        let Ok(order) = graph.execution_order() else {
            return;
        };

        self.task_store.update_status(task_id, TaskStatus::InProgress, version);
        let started_at = Utc::now();
        let current_version = version + 1;
        let mut failed = false;

        for mut step in order {
            let outcome = self.executor.execute(&step);
            let succeeded = matches!(outcome, Ok(true));

            if succeeded {
                step.status = crate::domain::StepStatus::Completed;
            } else {
                step.status = crate::domain::StepStatus::Failed;
            }
            self.audit.append(
                &AuditEntry::new(Op::StepExecuted, task_id, COMPONENT_SRC, if succeeded { Outcome::Success } else { Outcome::Failed })
                    .with_detail(format!("step={}", step.step_id)),
            );

            if let Some(idx) = graph.steps.iter().position(|s| s.step_id == step.step_id) {
                graph.steps[idx] = step.clone();
            }

            if !succeeded {
                if self.config.features.enable_self_healing {
                    let attempts = self.healing.recover(task_id, &mut step, Some(&graph), self.executor.as_ref(), &self.audit);
                    let recovered = attempts.iter().any(|a| a.outcome == crate::domain::RecoveryOutcome::Success);
                    if !recovered {
                        failed = true;
                        break;
                    }
                } else {
                    failed = true;
                    break;
                }
            }
        }

        let final_status = if failed {
            if let Some(handle) = self.rollback.snapshot(task_id) {
                self.audit.append(&AuditEntry::new(Op::RollbackTriggered, task_id, COMPONENT_SRC, Outcome::Flagged));
                let restored = self.rollback.restore(&handle, task_id);
                self.audit.append(&AuditEntry::new(
                    Op::RollbackRestored,
                    task_id,
                    COMPONENT_SRC,
                    if restored { Outcome::Success } else { Outcome::Failed },
                ));
            }
            TaskStatus::FailedRollback
        } else {
            TaskStatus::Done
        };

        self.task_store.update_status(task_id, final_status, current_version);
        self.audit.append(
            &AuditEntry::new(Op::TaskExecuted, task_id, COMPONENT_SRC, if failed { Outcome::Failed } else { Outcome::Success })
                .with_detail(format!("final_status={final_status:?}")),
        );

        self.record_terminal_outcome(task_id, task_type, started_at, final_status);

        let sent = self.notifier.send(&NotificationEvent {
            task_id: task_id.to_string(),
            message: format!("task reached status {final_status:?}"),
        });
        let notify_op = if sent { Op::NotificationSent } else { Op::NotificationFailed };
        let notify_outcome = if sent { Outcome::Success } else { Outcome::Failed };
        self.audit.append(&AuditEntry::new(notify_op, task_id, COMPONENT_SRC, notify_outcome));
    }

    fn record_terminal_outcome(&self, task_id: &str, task_type: crate::domain::TaskType, started_at: DateTime<Utc>, final_status: TaskStatus) {
        let elapsed_ms = (Utc::now() - started_at).num_milliseconds().max(0) as f64;
        let outcome = if final_status == TaskStatus::Done { RecordOutcome::Success } else { RecordOutcome::Failed };

        let task_type = task_type.to_string();
        let sla_minutes = self.config.sla.sla_complex_minutes;
        let elapsed_minutes = elapsed_ms / 60_000.0;
        let sla_breached = elapsed_minutes > sla_minutes;

        self.learning.record(&task_type, elapsed_ms, outcome, 0, false, sla_breached);
        self.audit.append(&AuditEntry::new(Op::LearningUpdate, task_id, COMPONENT_SRC, Outcome::Success).with_detail(format!("task_type={task_type} duration_ms={elapsed_ms:.0}")));

        if sla_breached {
            self.audit.append(&AuditEntry::new(Op::SlaBreach, task_id, COMPONENT_SRC, Outcome::Flagged).with_detail(format!("elapsed_minutes={elapsed_minutes:.1} threshold={sla_minutes:.1}")));
        }

        if self.config.features.enable_predictive_sla {
            let historical: Option<Historical> = self.learning.query(&task_type).map(|m| (&m).into());
            self.sla_predictor.predict(task_id, &task_type, elapsed_minutes, sla_minutes, historical.as_ref(), &self.audit);
        }
    }

    fn check_slot_timeouts(&self) {
        for task_id in self.concurrency.check_timeouts() {
            self.audit.append(&AuditEntry::new(Op::HeartbeatFail, &task_id, COMPONENT_SRC, Outcome::Failed).with_detail("slot timed out"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{InMemoryTaskStore, NoopCredentialScanner, NoopRollbackSystem, RecordingNotifier};
    use crate::domain::{Task, TaskType};
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct AlwaysSucceed;
    impl StepExecutor for AlwaysSucceed {
        fn execute(&self, _step: &crate::domain::ExecutionStep) -> Result<bool, String> {
            Ok(true)
        }
    }

    fn fixture() -> (Orchestrator, Arc<InMemoryTaskStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let mut config = Config::default();
        config.storage.audit_log_path = dir.path().join("audit.jsonl");
        config.storage.learning_store_dir = dir.path().join("learning");
        config.storage.plans_dir = dir.path().join("plans");
        config.storage.rollback_archive_dir = dir.path().join("rollback_archive");
        config.storage.vault_root = dir.path().to_path_buf();
        config.features.auto_execute_simple = true;
        config.features.auto_execute_complex = true;

        let audit = Arc::new(AuditLog::open(config.storage.audit_log_path.clone()).unwrap());
        let learning = Arc::new(LearningStore::open(config.storage.learning_store_dir.clone(), config.learning.learning_window_days).unwrap());
        let task_store = Arc::new(InMemoryTaskStore::new());

        let orchestrator = Orchestrator::new(
            config,
            audit,
            learning,
            task_store.clone(),
            Arc::new(NoopRollbackSystem),
            Arc::new(RecordingNotifier::new()),
            Arc::new(NoopCredentialScanner),
            Arc::new(AlwaysSucceed),
        );
        (orchestrator, task_store, dir)
    }

    #[tokio::test]
    async fn tick_classifies_and_plans_a_fresh_task() {
        let (orchestrator, task_store, _dir) = fixture();
        let task = Task::new("t1", TaskType::Document);
        task_store.insert(task, "Please read and edit this document", HashMap::new());

        orchestrator.tick().await.unwrap();

        let pending = task_store.list_pending();
        assert!(pending.is_empty() || pending[0].complexity != Complexity::Unknown);
    }

    #[tokio::test]
    async fn full_tick_cycle_executes_a_simple_task_to_completion() {
        let (orchestrator, task_store, _dir) = fixture();
        let task = Task::new("t1", TaskType::Document);
        task_store.insert(task, "Please read and edit this document", HashMap::new());

        orchestrator.tick().await.unwrap();
        orchestrator.tick().await.unwrap();

        assert!(task_store.list_pending().is_empty());
    }

    #[tokio::test]
    async fn auto_execute_disabled_leaves_classified_task_pending() {
        let (mut orchestrator, task_store, _dir) = fixture();
        orchestrator.config.features.auto_execute_simple = false;
        let task = Task::new("t1", TaskType::Document);
        task_store.insert(task, "Please read and edit this document", HashMap::new());

        orchestrator.tick().await.unwrap();
        orchestrator.tick().await.unwrap();

        let pending = task_store.list_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].complexity, Complexity::Simple);
    }
}
