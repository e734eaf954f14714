//! The sled-backed embedded key-value queue. Grounded on the teacher's
//! `db.rs` connection-wrapper pattern, rebuilt around sled's tree API
//! instead of a diesel pool. sled's calls are synchronous; at the row
//! counts this queue deals with they complete fast enough to call directly
//! from async methods rather than routing through `spawn_blocking`.

use super::{item_id, NewQueueItem, QueueStats, QueueStatus, SyncQueue, SyncQueueItem, SyncState};
use crate::error::Result;
use crate::outpoint::Txid;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

const STATE_KEY: &str = "syncState";

pub struct SledSyncQueue {
    db: sled::Db,
    queue: sled::Tree,
    state: sled::Tree,
    lock: Mutex<()>,
}

impl SledSyncQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        let queue = db.open_tree("queue")?;
        let state = db.open_tree("state")?;
        Ok(SledSyncQueue { db, queue, state, lock: Mutex::new(()) })
    }

    fn load_item(&self, id: &str) -> Result<Option<SyncQueueItem>> {
        match self.queue.get(id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store_item(&self, item: &SyncQueueItem) -> Result<()> {
        let bytes = serde_json::to_vec(item)?;
        self.queue.insert(item.id.as_bytes(), bytes)?;
        Ok(())
    }

    fn all_items(&self) -> Result<Vec<SyncQueueItem>> {
        self.queue
            .iter()
            .values()
            .map(|res| res.map_err(Into::into).and_then(|v| Ok(serde_json::from_slice(&v)?)))
            .collect()
    }
}

#[async_trait]
impl SyncQueue for SledSyncQueue {
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> Result<()> {
        let _guard = self.lock.lock();
        for new_item in items {
            let id = item_id(&new_item.outpoint, new_item.score);
            if let Some(mut existing) = self.load_item(&id)? {
                if existing.status == QueueStatus::Done {
                    continue;
                }
                existing.status = QueueStatus::Pending;
                existing.spend_txid = new_item.spend_txid;
                existing.updated_at = Utc::now();
                self.store_item(&existing)?;
            } else {
                let now = Utc::now();
                self.store_item(&SyncQueueItem {
                    id,
                    outpoint: new_item.outpoint,
                    score: new_item.score,
                    spend_txid: new_item.spend_txid,
                    status: QueueStatus::Pending,
                    attempts: 0,
                    last_error: None,
                    created_at: now,
                    updated_at: now,
                })?;
            }
        }
        Ok(())
    }

    async fn claim(&self, count: usize) -> Result<HashMap<Txid, Vec<SyncQueueItem>>> {
        let _guard = self.lock.lock();
        let mut pending: Vec<SyncQueueItem> =
            self.all_items()?.into_iter().filter(|i| i.status == QueueStatus::Pending).collect();
        pending.sort_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal));

        let seed_txids: HashSet<Txid> = pending.iter().take(count).map(|i| i.outpoint.txid).collect();

        let mut groups: HashMap<Txid, Vec<SyncQueueItem>> = HashMap::new();
        for mut item in pending.into_iter().filter(|i| seed_txids.contains(&i.outpoint.txid)) {
            item.status = QueueStatus::Processing;
            item.attempts += 1;
            item.updated_at = Utc::now();
            self.store_item(&item)?;
            groups.entry(item.outpoint.txid).or_default().push(item);
        }
        Ok(groups)
    }

    async fn complete(&self, id: &str) -> Result<()> {
        self.complete_many(std::slice::from_ref(&id.to_owned())).await
    }

    async fn complete_many(&self, ids: &[String]) -> Result<()> {
        let _guard = self.lock.lock();
        for id in ids {
            if let Some(mut item) = self.load_item(id)? {
                item.status = QueueStatus::Done;
                item.updated_at = Utc::now();
                self.store_item(&item)?;
            }
        }
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock();
        if let Some(mut item) = self.load_item(id)? {
            item.status = QueueStatus::Failed;
            item.last_error = Some(error.to_owned());
            item.updated_at = Utc::now();
            self.store_item(&item)?;
        }
        Ok(())
    }

    async fn get_by_txid(&self, txid: &Txid) -> Result<Vec<SyncQueueItem>> {
        Ok(self.all_items()?.into_iter().filter(|i| &i.outpoint.txid == txid).collect())
    }

    async fn get_by_status(&self, status: QueueStatus, limit: usize) -> Result<Vec<SyncQueueItem>> {
        Ok(self.all_items()?.into_iter().filter(|i| i.status == status).take(limit).collect())
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let mut by_txid: HashMap<Txid, QueueStatus> = HashMap::new();
        for item in self.all_items()? {
            by_txid.insert(item.outpoint.txid, item.status);
        }
        let mut stats = QueueStats::default();
        for status in by_txid.values() {
            match status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Done => stats.done += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn get_state(&self) -> Result<SyncState> {
        match self.state.get(STATE_KEY)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(SyncState::default()),
        }
    }

    async fn set_state(&self, state: SyncState) -> Result<()> {
        let bytes = serde_json::to_vec(&state)?;
        self.state.insert(STATE_KEY, bytes)?;
        Ok(())
    }

    async fn reset_processing(&self) -> Result<u64> {
        let _guard = self.lock.lock();
        let mut count = 0u64;
        for mut item in self.all_items()? {
            if item.status == QueueStatus::Processing {
                item.status = QueueStatus::Pending;
                item.updated_at = Utc::now();
                self.store_item(&item)?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock();
        self.queue.clear()?;
        self.state.clear()?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outpoint::Outpoint;

    fn queue() -> SledSyncQueue {
        SledSyncQueue::open(tempfile::tempdir().unwrap().into_path()).unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_claim_marks_processing() {
        let q = queue();
        let outpoint = Outpoint::from_pair([1u8; 32], 0);
        q.enqueue(vec![NewQueueItem { outpoint, score: 10.0, spend_txid: None }]).await.unwrap();
        let claimed = q.claim(10).await.unwrap();
        let items = claimed.get(&outpoint.txid).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Processing);
        assert_eq!(items[0].attempts, 1);
    }

    #[tokio::test]
    async fn done_rows_are_skipped_on_reenqueue() {
        let q = queue();
        let outpoint = Outpoint::from_pair([2u8; 32], 0);
        let item = NewQueueItem { outpoint, score: 5.0, spend_txid: None };
        q.enqueue(vec![item.clone()]).await.unwrap();
        let claimed = q.claim(10).await.unwrap();
        let id = claimed.get(&outpoint.txid).unwrap()[0].id.clone();
        q.complete(&id).await.unwrap();
        q.enqueue(vec![item]).await.unwrap();
        let row = q.get_by_txid(&outpoint.txid).await.unwrap();
        assert_eq!(row[0].status, QueueStatus::Done);
    }

    #[tokio::test]
    async fn reset_processing_recovers_crashed_rows() {
        let q = queue();
        let outpoint = Outpoint::from_pair([3u8; 32], 0);
        q.enqueue(vec![NewQueueItem { outpoint, score: 1.0, spend_txid: None }]).await.unwrap();
        q.claim(10).await.unwrap();
        let reset = q.reset_processing().await.unwrap();
        assert_eq!(reset, 1);
        let rows = q.get_by_status(QueueStatus::Pending, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
