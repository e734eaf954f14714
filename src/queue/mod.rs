//! The persistent sync queue (spec.md §3 "SyncQueueItem", §4.4). Two
//! interchangeable embedded backends live under this module: `kv` (sled)
//! and `sql` (rusqlite), both implementing the same `SyncQueue` contract.

pub mod kv;
pub mod sql;

use crate::error::Result;
use crate::outpoint::{Outpoint, Txid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncQueueItem {
    pub id: String,
    pub outpoint: Outpoint,
    pub score: f64,
    pub spend_txid: Option<Txid>,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub outpoint: Outpoint,
    pub score: f64,
    pub spend_txid: Option<Txid>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub done: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub last_queued_score: f64,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub(crate) fn item_id(outpoint: &Outpoint, score: f64) -> String {
    format!("{outpoint}:{score}")
}

/// The queue contract (spec.md §4.4). Every operation must be serializable
/// with respect to the rows it touches; concurrent `claim`s from the same
/// process are not required to be supported (the orchestrator serializes
/// them itself).
#[async_trait]
pub trait SyncQueue: Send + Sync {
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> Result<()>;

    /// Claims up to `count` pending rows as seeds, then returns every
    /// pending row sharing a seed's txid, grouped by txid — no group is
    /// ever returned partially (spec.md §4.4 `claim`).
    async fn claim(&self, count: usize) -> Result<HashMap<Txid, Vec<SyncQueueItem>>>;

    async fn complete(&self, id: &str) -> Result<()>;
    async fn complete_many(&self, ids: &[String]) -> Result<()>;
    async fn fail(&self, id: &str, error: &str) -> Result<()>;
    async fn get_by_txid(&self, txid: &Txid) -> Result<Vec<SyncQueueItem>>;
    async fn get_by_status(&self, status: QueueStatus, limit: usize) -> Result<Vec<SyncQueueItem>>;

    /// Per-status counts, one vote per distinct txid (spec.md §4.4
    /// `getStats`).
    async fn get_stats(&self) -> Result<QueueStats>;

    async fn get_state(&self) -> Result<SyncState>;
    async fn set_state(&self, state: SyncState) -> Result<()>;

    /// Flips every `processing` row back to `pending`; called once at
    /// startup to recover from a crash between `claim` and `complete`.
    async fn reset_processing(&self) -> Result<u64>;

    async fn clear(&self) -> Result<()>;
    async fn close(&self) -> Result<()>;
}
