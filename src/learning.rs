//! Learning store: per-task-type running aggregates maintained by Welford's
//! online algorithm, with JSONL-record retention.
//!
//! Grounded on the teacher's JSONL-append idiom ([`crate::audit`]) and the
//! original `learning_engine.py`: one raw-record log plus one aggregate
//! snapshot per task type, under a configured directory.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::now_iso;

/// Outcome of a recorded task execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Success,
    Failed,
}

/// One raw execution outcome, appended to `<task_type>.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LearningRecord {
    ts: String,
    task_type: String,
    duration_ms: f64,
    outcome: RecordOutcome,
    retry_count: u32,
    retry_succeeded: bool,
    sla_breached: bool,
}

/// Running aggregates for one task type, persisted as `<task_type>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningMetrics {
    pub task_type: String,
    pub total_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_total: u64,
    pub retry_success: u64,
    pub sla_breach_count: u64,
    pub mean_duration_ms: f64,
    pub variance_duration_ms2: f64,
    pub last_updated: String,
}

impl LearningMetrics {
    fn new(task_type: impl Into<String>) -> Self {
        Self {
            task_type: task_type.into(),
            total_count: 0,
            success_count: 0,
            failure_count: 0,
            retry_total: 0,
            retry_success: 0,
            sla_breach_count: 0,
            mean_duration_ms: 0.0,
            variance_duration_ms2: 0.0,
            last_updated: now_iso(),
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_count == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_count as f64
        }
    }

    pub fn sla_compliance(&self) -> f64 {
        if self.total_count == 0 {
            1.0
        } else {
            1.0 - (self.sla_breach_count as f64 / self.total_count as f64)
        }
    }

    pub fn stdev_ms(&self) -> f64 {
        self.variance_duration_ms2.max(0.0).sqrt()
    }

    /// Fold one sample into the running aggregates via Welford's algorithm.
    /// Population variance; a single sample yields variance 0 by convention.
    fn fold(&mut self, duration_ms: f64, outcome: RecordOutcome, retry_count: u32, retry_succeeded: bool, sla_breached: bool) {
        let n = self.total_count + 1;
        let old_mean = self.mean_duration_ms;
        let new_mean = old_mean + (duration_ms - old_mean) / n as f64;
        let m2 = self.variance_duration_ms2 * self.total_count as f64;
        let new_m2 = m2 + (duration_ms - old_mean) * (duration_ms - new_mean);

        self.total_count = n;
        self.mean_duration_ms = new_mean;
        self.variance_duration_ms2 = if n > 1 { new_m2 / n as f64 } else { 0.0 };

        match outcome {
            RecordOutcome::Success => self.success_count += 1,
            RecordOutcome::Failed => self.failure_count += 1,
        }
        if retry_count > 0 {
            self.retry_total += 1;
            if retry_succeeded {
                self.retry_success += 1;
            }
        }
        if sla_breached {
            self.sla_breach_count += 1;
        }
        self.last_updated = now_iso();
    }
}

/// Per-task-type running aggregates with JSONL-backed retention.
///
/// Serializes concurrent `record` calls through a single mutex — equivalent
/// to the spec's "per-task-type file-level locking" requirement, since a
/// single process holds all task-type files behind one guard.
pub struct LearningStore {
    dir: PathBuf,
    retention: Duration,
    lock: Mutex<()>,
}

impl LearningStore {
    pub fn open(dir: impl Into<PathBuf>, retention_days: i64) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            retention: Duration::days(retention_days.max(0)),
            lock: Mutex::new(()),
        })
    }

    fn jsonl_path(&self, task_type: &str) -> PathBuf {
        self.dir.join(format!("{task_type}.jsonl"))
    }

    fn meta_path(&self, task_type: &str) -> PathBuf {
        self.dir.join(format!("{task_type}.meta.json"))
    }

    /// Persist an execution outcome and update aggregates. Best-effort:
    /// I/O failures are logged and swallowed, returning `false`.
    pub fn record(
        &self,
        task_type: &str,
        duration_ms: f64,
        outcome: RecordOutcome,
        retry_count: u32,
        retry_succeeded: bool,
        sla_breached: bool,
    ) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());

        let record = LearningRecord {
            ts: now_iso(),
            task_type: task_type.to_string(),
            duration_ms,
            outcome,
            retry_count,
            retry_succeeded,
            sla_breached,
        };

        if let Err(e) = self.append_record(&record) {
            error!(error = %e, task_type, "failed to append learning record");
            return false;
        }

        let mut metrics = self.read_meta(task_type).unwrap_or_else(|| LearningMetrics::new(task_type));
        metrics.fold(duration_ms, outcome, retry_count, retry_succeeded, sla_breached);

        if let Err(e) = self.write_meta(&metrics) {
            error!(error = %e, task_type, "failed to write learning aggregate");
            return false;
        }

        true
    }

    fn append_record(&self, record: &LearningRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.jsonl_path(&record.task_type))?;
        writeln!(file, "{line}")
    }

    fn write_meta(&self, metrics: &LearningMetrics) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(metrics)?;
        std::fs::write(self.meta_path(&metrics.task_type), json)
    }

    fn read_meta(&self, task_type: &str) -> Option<LearningMetrics> {
        let path = self.meta_path(task_type);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, task_type, "corrupted learning aggregate, treating as cold start");
                None
            }
        }
    }

    /// Snapshot of aggregates for `task_type`, or `None` on cold start or a
    /// corrupted aggregate file.
    pub fn query(&self, task_type: &str) -> Option<LearningMetrics> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        self.read_meta(task_type)
    }

    /// Purge records older than the retention window and recompute
    /// aggregates from survivors with a two-pass variance calculation.
    pub fn maintenance(&self) {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let cutoff = Utc::now() - self.retention;

        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return;
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let Some(task_type) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if let Err(e) = self.recompute_one(&task_type, &path, cutoff) {
                error!(error = %e, task_type, "learning store maintenance failed");
            }
        }
    }

    fn recompute_one(&self, task_type: &str, path: &Path, cutoff: DateTime<Utc>) -> std::io::Result<()> {
        let file = std::fs::File::open(path)?;
        let records: Vec<LearningRecord> = BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<LearningRecord>(&l).ok())
            .filter(|r| {
                DateTime::parse_from_rfc3339(&r.ts)
                    .map(|ts| ts.with_timezone(&Utc) >= cutoff)
                    .unwrap_or(false)
            })
            .collect();

        let rewritten: String = records
            .iter()
            .map(|r| serde_json::to_string(r).unwrap_or_default())
            .map(|l| l + "\n")
            .collect();
        std::fs::write(path, rewritten)?;

        let mut metrics = LearningMetrics::new(task_type);
        let n = records.len();
        if n > 0 {
            let durations: Vec<f64> = records.iter().map(|r| r.duration_ms).collect();
            let mean = durations.iter().sum::<f64>() / n as f64;
            let variance = if n > 1 {
                durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64
            } else {
                0.0
            };
            metrics.total_count = n as u64;
            metrics.mean_duration_ms = mean;
            metrics.variance_duration_ms2 = variance;
            for r in &records {
                match r.outcome {
                    RecordOutcome::Success => metrics.success_count += 1,
                    RecordOutcome::Failed => metrics.failure_count += 1,
                }
                if r.retry_count > 0 {
                    metrics.retry_total += 1;
                    if r.retry_succeeded {
                        metrics.retry_success += 1;
                    }
                }
                if r.sla_breached {
                    metrics.sla_breach_count += 1;
                }
            }
        }
        self.write_meta(&metrics)
    }
}

/// Historical snapshot as consumed by the risk scorer and SLA predictor:
/// a minimal read-only view so those components don't depend on the store
/// directly.
#[derive(Debug, Clone, Default)]
pub struct Historical {
    pub total_count: u64,
    pub failure_rate: f64,
    pub mean_duration_ms: f64,
    pub variance_duration_ms2: f64,
}

impl From<&LearningMetrics> for Historical {
    fn from(m: &LearningMetrics) -> Self {
        Self {
            total_count: m.total_count,
            failure_rate: m.failure_rate(),
            mean_duration_ms: m.mean_duration_ms,
            variance_duration_ms2: m.variance_duration_ms2,
        }
    }
}

/// Historical data keyed by task type, as passed to `RiskScorer::reorder`.
pub type HistoricalMap = HashMap<String, Historical>;
