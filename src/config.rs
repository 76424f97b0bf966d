//! Layered configuration for the orchestrator.
//!
//! Loaded from, in order of precedence: an explicit path, a project-local
//! `.orchestrator.yml`, `$XDG_CONFIG_HOME/orchestrator/orchestrator.yml`, or
//! compiled-in defaults. YAML keys are kebab-case; Rust fields stay
//! snake_case. Every nested struct carries `#[serde(default)]` so a partial
//! document merges field-by-field against defaults.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub concurrency: ConcurrencyConfig,
    pub risk: RiskWeights,
    pub sla: SlaConfig,
    pub learning: LearningConfig,
    pub recovery: RecoveryConfig,
    pub features: FeatureFlags,
    pub storage: StorageConfig,
    pub classifier: ClassifierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: ConcurrencyConfig::default(),
            risk: RiskWeights::default(),
            sla: SlaConfig::default(),
            learning: LearningConfig::default(),
            recovery: RecoveryConfig::default(),
            features: FeatureFlags::default(),
            storage: StorageConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the standard fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".orchestrator.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => tracing::warn!("failed to load config from {}: {e}", local_config.display()),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("orchestrator").join("orchestrator.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => tracing::warn!("failed to load config from {}: {e}", user_config.display()),
                }
            }
        }

        tracing::info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("failed to parse config file")?;
        tracing::info!("loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Bounded-concurrency admission and the orchestrator loop's tick cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    #[serde(rename = "max-parallel-tasks")]
    pub max_parallel_tasks: usize,
    #[serde(rename = "task-timeout-minutes")]
    pub task_timeout_minutes: i64,
    #[serde(rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_parallel_tasks: 3,
            task_timeout_minutes: 15,
            poll_interval_ms: 1000,
        }
    }
}

/// Composite risk-score weights. Not required to sum to 1; the composite
/// is clamped to `[0,1]` regardless.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    #[serde(rename = "risk-weight-sla")]
    pub sla: f64,
    #[serde(rename = "risk-weight-complexity")]
    pub complexity: f64,
    #[serde(rename = "risk-weight-impact")]
    pub impact: f64,
    #[serde(rename = "risk-weight-failure")]
    pub failure: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            sla: 0.3,
            complexity: 0.2,
            impact: 0.3,
            failure: 0.2,
        }
    }
}

/// SLA bands and predictor alert threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SlaConfig {
    #[serde(rename = "prediction-threshold")]
    pub prediction_threshold: f64,
    #[serde(rename = "sla-simple-minutes")]
    pub sla_simple_minutes: f64,
    #[serde(rename = "sla-complex-minutes")]
    pub sla_complex_minutes: f64,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            prediction_threshold: 0.7,
            sla_simple_minutes: 2.0,
            sla_complex_minutes: 10.0,
        }
    }
}

/// Learning-store retention.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    #[serde(rename = "learning-window-days")]
    pub learning_window_days: i64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_window_days: 30,
        }
    }
}

/// Self-healing cascade bound.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    #[serde(rename = "max-recovery-attempts")]
    pub max_recovery_attempts: u32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_recovery_attempts: 3,
        }
    }
}

/// Feature flags. Disabling any degrades the system to its "foundation"
/// behavior per the propagation policy: no prediction emitted, no healing
/// (any failure escalates directly to rollback), no reordering (tasks
/// execute in ingestion order).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    #[serde(rename = "enable-predictive-sla")]
    pub enable_predictive_sla: bool,
    #[serde(rename = "enable-self-healing")]
    pub enable_self_healing: bool,
    #[serde(rename = "enable-risk-scoring")]
    pub enable_risk_scoring: bool,
    #[serde(rename = "auto-execute-simple")]
    pub auto_execute_simple: bool,
    #[serde(rename = "auto-execute-complex")]
    pub auto_execute_complex: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_predictive_sla: true,
            enable_self_healing: true,
            enable_risk_scoring: true,
            auto_execute_simple: false,
            auto_execute_complex: false,
        }
    }
}

/// On-disk locations for the audit log, learning store, and plans directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "audit-log-path")]
    pub audit_log_path: PathBuf,
    #[serde(rename = "learning-store-dir")]
    pub learning_store_dir: PathBuf,
    #[serde(rename = "plans-dir")]
    pub plans_dir: PathBuf,
    #[serde(rename = "rollback-archive-dir")]
    pub rollback_archive_dir: PathBuf,
    #[serde(rename = "vault-root")]
    pub vault_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            audit_log_path: PathBuf::from(".orchestrator/audit.jsonl"),
            learning_store_dir: PathBuf::from(".orchestrator/learning"),
            plans_dir: PathBuf::from(".orchestrator/plans"),
            rollback_archive_dir: PathBuf::from(".orchestrator/rollback_archive"),
            vault_root: PathBuf::from("."),
        }
    }
}

/// Classifier gate thresholds and the external-service allowlist consumed
/// by gate 4 (permissions).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    #[serde(rename = "max-simple-steps")]
    pub max_simple_steps: usize,
    #[serde(rename = "max-complex-steps")]
    pub max_complex_steps: usize,
    #[serde(rename = "allowed-external-services")]
    pub allowed_external_services: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_simple_steps: 5,
            max_complex_steps: 15,
            allowed_external_services: Vec::new(),
        }
    }
}
