//! Append-only structured audit log.
//!
//! One JSON object per line, newest-last on disk. Concurrent appends are
//! serialized through a single mutex-guarded `BufWriter`; reads reopen the
//! file independently and skip-and-warn on malformed lines rather than
//! aborting. Grounded on the teacher's JSONL event-logging idiom.

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::domain::now_iso;

/// Closed vocabulary of audit operation tags. Writers must not invent new
/// tags; this is enforced structurally (only this module emits entries).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    TaskCreated,
    TaskMoved,
    PlanGenerated,
    TaskClassified,
    TaskExecuted,
    StepExecuted,
    CredentialFlagged,
    Error,
    SlaBreach,
    SlaPrediction,
    RollbackTriggered,
    RollbackRestored,
    GateBlocked,
    OverrideApplied,
    NotificationSent,
    NotificationFailed,
    HeartbeatFail,
    RiskScored,
    SelfHealRetry,
    SelfHealAlternative,
    SelfHealPartial,
    LearningUpdate,
    PriorityAdjusted,
    ConcurrencyQueued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
    Flagged,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub ts: String,
    pub op: Op,
    pub file: String,
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<String>,
    pub outcome: Outcome,
    #[serde(default)]
    pub detail: String,
}

impl AuditEntry {
    pub fn new(op: Op, file: impl Into<String>, src: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            ts: now_iso(),
            op,
            file: file.into(),
            src: src.into(),
            dst: None,
            outcome,
            detail: String::new(),
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_dst(mut self, dst: impl Into<String>) -> Self {
        self.dst = Some(dst.into());
        self
    }
}

/// Append-only audit log sink backed by a single JSONL file.
pub struct AuditLog {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<std::fs::File>>>,
}

impl AuditLog {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
        })
    }

    /// Append an entry. Best-effort: on failure, logs via `tracing::error!`
    /// and returns `false`. The caller never retries.
    pub fn append(&self, entry: &AuditEntry) -> bool {
        let line = match serde_json::to_string(entry) {
            Ok(l) => l,
            Err(e) => {
                error!(error = %e, "failed to serialize audit entry");
                return false;
            }
        };

        let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let Some(writer) = guard.as_mut() else {
            error!("audit log writer unavailable");
            return false;
        };

        if let Err(e) = writeln!(writer, "{line}").and_then(|_| writer.flush()) {
            error!(error = %e, path = %self.path.display(), "failed to append audit entry");
            return false;
        }
        true
    }

    /// Last `n` entries, newest first. Malformed lines are skipped with a
    /// warning rather than aborting the read.
    pub fn tail(&self, n: usize) -> Vec<AuditEntry> {
        let mut entries = self.read_all();
        entries.reverse();
        entries.truncate(n);
        entries
    }

    /// Entries matching `op` (if given) and at or after `since` (if given,
    /// an RFC 3339 timestamp compared lexicographically since all
    /// timestamps share the same fixed-width millisecond format).
    pub fn filter(&self, op: Option<Op>, since: Option<&str>) -> Vec<AuditEntry> {
        self.read_all()
            .into_iter()
            .filter(|e| op.map(|o| o == e.op).unwrap_or(true))
            .filter(|e| since.map(|s| e.ts.as_str() >= s).unwrap_or(true))
            .collect()
    }

    fn read_all(&self) -> Vec<AuditEntry> {
        let file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "audit log unreadable");
                return Vec::new();
            }
        };

        BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(|(i, line)| {
                let line = line.ok()?;
                if line.trim().is_empty() {
                    return None;
                }
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!(line = i, error = %e, "skipping malformed audit log line");
                        None
                    }
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_then_tail_round_trips() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        for i in 0..3 {
            let entry = AuditEntry::new(Op::TaskCreated, format!("task-{i}"), "test", Outcome::Success);
            assert!(log.append(&entry));
        }

        let tail = log.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].file, "task-2");
        assert_eq!(tail[1].file, "task-1");
    }

    #[test]
    fn filter_by_op() {
        let dir = tempdir().unwrap();
        let log = AuditLog::open(dir.path().join("audit.jsonl")).unwrap();

        log.append(&AuditEntry::new(Op::TaskCreated, "t1", "test", Outcome::Success));
        log.append(&AuditEntry::new(Op::GateBlocked, "t1", "test", Outcome::Flagged));

        let matches = log.filter(Some(Op::GateBlocked), None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].op, Op::GateBlocked);
    }

    #[test]
    fn malformed_line_is_skipped_not_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        std::fs::write(&path, "not json\n{\"also\":\"bad\"}\n").unwrap();

        let log = AuditLog::open(&path).unwrap();
        log.append(&AuditEntry::new(Op::TaskCreated, "t1", "test", Outcome::Success));

        let all = log.tail(10);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file, "t1");
    }
}
