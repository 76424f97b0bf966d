//! Orchestrator entry point.
//!
//! The core exposes only programmatic interfaces; this binary is a thin
//! process wrapper that loads configuration, wires the in-memory
//! collaborator defaults, and runs the orchestrator loop until `Ctrl-C`.
//! A real deployment would supply its own `TaskStore`/`RollbackSystem`/
//! `Notifier`/`CredentialScanner` backed by a vault and executor.

use std::sync::Arc;

use eyre::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use taskorch::audit::AuditLog;
use taskorch::collaborators::{InMemoryTaskStore, NoopCredentialScanner, NoopRollbackSystem, RecordingNotifier};
use taskorch::config::Config;
use taskorch::healing::StepExecutor;
use taskorch::learning::LearningStore;
use taskorch::Orchestrator;

struct LoggingStepExecutor;

impl StepExecutor for LoggingStepExecutor {
    fn execute(&self, step: &taskorch::domain::ExecutionStep) -> std::result::Result<bool, String> {
        info!(step = %step.step_id, "executing step (no-op placeholder executor)");
        Ok(true)
    }
}

fn setup_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("failed to set up logging")?;

    let config = Config::load(None).context("failed to load configuration")?;
    info!(
        max_parallel_tasks = config.concurrency.max_parallel_tasks,
        poll_interval_ms = config.concurrency.poll_interval_ms,
        "orchestrator starting"
    );

    let audit = Arc::new(AuditLog::open(config.storage.audit_log_path.clone()).context("failed to open audit log")?);
    let learning = Arc::new(
        LearningStore::open(config.storage.learning_store_dir.clone(), config.learning.learning_window_days)
            .context("failed to open learning store")?,
    );

    let orchestrator = Arc::new(Orchestrator::new(
        config,
        audit,
        learning,
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(NoopRollbackSystem),
        Arc::new(RecordingNotifier::new()),
        Arc::new(NoopCredentialScanner),
        Arc::new(LoggingStepExecutor),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("received ctrl-c, shutting down");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;

    Ok(())
}
