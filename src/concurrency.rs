//! Concurrency controller: bounded admission with a risk-ordered wait
//! queue and per-slot timeout tracking.
//!
//! Grounded on the original `concurrency_controller.py`'s
//! semaphore+lock+queue shape, adapted to `tokio::sync::Semaphore` per
//! this crate's async stack. `try_acquire` permits are forgotten on
//! success and manually restored on release, since slot release happens
//! from an arbitrary call site rather than via RAII guard drop.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Semaphore;

use crate::audit::{AuditEntry, AuditLog, Op, Outcome};
use crate::domain::{now_iso, ConcurrencySlot, SlotStatus};

const COMPONENT_SRC: &str = "concurrency_controller";

struct Inner {
    active: HashMap<u64, ConcurrencySlot>,
    queue: Vec<(f64, String)>,
    next_slot_id: u64,
}

/// Bounded-concurrency admission control over `max_parallel` slots.
pub struct ConcurrencyController {
    semaphore: Semaphore,
    timeout: Duration,
    inner: Mutex<Inner>,
}

impl ConcurrencyController {
    pub fn new(max_parallel: usize, timeout_minutes: i64) -> Self {
        Self {
            semaphore: Semaphore::new(max_parallel),
            timeout: Duration::minutes(timeout_minutes),
            inner: Mutex::new(Inner {
                active: HashMap::new(),
                queue: Vec::new(),
                next_slot_id: 0,
            }),
        }
    }

    /// Attempt to admit `task_id` immediately. Returns `None` if the
    /// concurrency limit is already saturated; the caller should `enqueue`
    /// in that case.
    pub fn acquire(&self, task_id: &str) -> Option<ConcurrencySlot> {
        let permit = self.semaphore.try_acquire().ok()?;
        permit.forget();

        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let slot_id = inner.next_slot_id;
        inner.next_slot_id += 1;

        let timeout_at = (Utc::now() + self.timeout).to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        let slot = ConcurrencySlot {
            slot_id,
            task_id: task_id.to_string(),
            started_at: now_iso(),
            timeout_at,
            status: SlotStatus::Active,
        };
        inner.active.insert(slot_id, slot.clone());
        Some(slot)
    }

    /// Release a slot without marking it completed (e.g. a timeout or a
    /// cancellation).
    pub fn release(&self, slot_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut slot) = inner.active.remove(&slot_id) {
            slot.status = SlotStatus::Released;
        }
        drop(inner);
        self.semaphore.add_permits(1);
    }

    /// Mark a slot completed, then release it.
    pub fn complete(&self, slot_id: u64) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(slot) = inner.active.get_mut(&slot_id) {
                slot.status = SlotStatus::Completed;
            }
        }
        self.release(slot_id);
    }

    /// Add a task to the wait queue, ordered by risk score descending.
    /// Ties preserve insertion order (stable sort).
    pub fn enqueue(&self, task_id: &str, risk_score: f64, audit: &AuditLog) {
        let position = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner.queue.push((risk_score, task_id.to_string()));
            inner.queue.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            inner.queue.iter().position(|(_, id)| id == task_id).map(|p| p + 1).unwrap_or(0)
        };

        audit.append(
            &AuditEntry::new(Op::ConcurrencyQueued, task_id, COMPONENT_SRC, Outcome::Success)
                .with_detail(format!("risk_score={risk_score:.3} queue_position={position}")),
        );
    }

    /// Remove and return the highest-risk queued task, if any.
    pub fn dequeue(&self) -> Option<String> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if inner.queue.is_empty() {
            None
        } else {
            Some(inner.queue.remove(0).1)
        }
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).active.len()
    }

    /// Queued tasks in risk-score order, as `(task_id, risk_score)`.
    pub fn queued(&self) -> Vec<(String, f64)> {
        self.inner
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .queue
            .iter()
            .map(|(score, id)| (id.clone(), *score))
            .collect()
    }

    /// Release every slot whose timeout has elapsed and return their task ids.
    pub fn check_timeouts(&self) -> Vec<String> {
        let now = Utc::now();
        let timed_out: Vec<(u64, String)> = {
            let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            inner
                .active
                .iter()
                .filter_map(|(id, slot)| {
                    let timeout_at = DateTime::parse_from_rfc3339(&slot.timeout_at).ok()?.with_timezone(&Utc);
                    (now >= timeout_at).then(|| (*id, slot.task_id.clone()))
                })
                .collect()
        };

        for (slot_id, task_id) in &timed_out {
            {
                let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(slot) = inner.active.get_mut(slot_id) {
                    slot.status = SlotStatus::TimedOut;
                }
            }
            self.release(*slot_id);
            tracing::warn!(task_id, slot_id, "task timed out, slot released");
        }

        timed_out.into_iter().map(|(_, task_id)| task_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn log() -> AuditLog {
        let dir = tempdir().unwrap();
        AuditLog::open(dir.path().join("audit.jsonl")).unwrap()
    }

    #[test]
    fn acquire_respects_max_parallel_then_saturates() {
        let controller = ConcurrencyController::new(2, 15);
        assert!(controller.acquire("a").is_some());
        assert!(controller.acquire("b").is_some());
        assert!(controller.acquire("c").is_none());
        assert_eq!(controller.active_count(), 2);
    }

    #[test]
    fn release_frees_a_slot_for_reuse() {
        let controller = ConcurrencyController::new(1, 15);
        let slot = controller.acquire("a").unwrap();
        assert!(controller.acquire("b").is_none());
        controller.release(slot.slot_id);
        assert!(controller.acquire("b").is_some());
    }

    #[test]
    fn dequeue_returns_highest_risk_task_first() {
        let controller = ConcurrencyController::new(2, 15);
        let audit = log();
        controller.enqueue("d", 0.3, &audit);
        controller.enqueue("e", 0.9, &audit);
        assert_eq!(controller.dequeue(), Some("e".to_string()));
        assert_eq!(controller.dequeue(), Some("d".to_string()));
        assert_eq!(controller.dequeue(), None);
    }

    #[test]
    fn saturated_controller_scenario_matches_dequeue_order() {
        // max_parallel=2: acquire(a)/acquire(b) succeed, acquire(c) fails,
        // enqueue(d, 0.3) and enqueue(e, 0.9), dequeue() returns e.
        let controller = ConcurrencyController::new(2, 15);
        let audit = log();
        assert!(controller.acquire("a").is_some());
        assert!(controller.acquire("b").is_some());
        assert!(controller.acquire("c").is_none());
        controller.enqueue("d", 0.3, &audit);
        controller.enqueue("e", 0.9, &audit);
        assert_eq!(controller.dequeue(), Some("e".to_string()));
    }

    #[test]
    fn complete_marks_and_releases() {
        let controller = ConcurrencyController::new(1, 15);
        let slot = controller.acquire("a").unwrap();
        controller.complete(slot.slot_id);
        assert_eq!(controller.active_count(), 0);
        assert!(controller.acquire("b").is_some());
    }

    #[test]
    fn check_timeouts_releases_expired_slots() {
        let controller = ConcurrencyController::new(1, -1); // already-past timeout
        let slot = controller.acquire("a").unwrap();
        let timed_out = controller.check_timeouts();
        assert_eq!(timed_out, vec!["a".to_string()]);
        assert_eq!(controller.active_count(), 0);
        let _ = slot;
    }

    use proptest::prelude::*;

    proptest! {
        /// Whatever order tasks are enqueued in, dequeue always drains them
        /// highest-risk-first, and the queue is always empty afterward.
        #[test]
        fn dequeue_drains_in_descending_risk_order(scores in proptest::collection::vec(0.0f64..1.0, 1..20)) {
            let controller = ConcurrencyController::new(1, 15);
            let audit = log();
            for (i, s) in scores.iter().enumerate() {
                controller.enqueue(&format!("t{i}"), *s, &audit);
            }

            let mut drained = Vec::new();
            while let Some(id) = controller.dequeue() {
                drained.push(id);
            }
            prop_assert_eq!(drained.len(), scores.len());

            let mut sorted_scores = scores.clone();
            sorted_scores.sort_by(|a, b| b.partial_cmp(a).unwrap());
            let drained_scores: Vec<f64> = drained
                .iter()
                .map(|id| scores[id.trim_start_matches('t').parse::<usize>().unwrap()])
                .collect();
            prop_assert_eq!(drained_scores, sorted_scores);
            prop_assert!(controller.dequeue().is_none());
        }
    }
}
