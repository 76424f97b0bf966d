//! Concurrency slot: an admission token held by an executing task.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Active,
    Completed,
    TimedOut,
    Released,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySlot {
    pub slot_id: u64,
    pub task_id: String,
    pub started_at: String,
    pub timeout_at: String,
    pub status: SlotStatus,
}
