//! The rusqlite-backed embedded SQL queue, the second of the two
//! interchangeable backends spec.md §4.4 calls for.

use super::{item_id, NewQueueItem, QueueStats, QueueStatus, SyncQueue, SyncQueueItem, SyncState};
use crate::error::Result;
use crate::outpoint::{Outpoint, Txid};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

pub struct SqliteSyncQueue {
    conn: Mutex<Connection>,
}

impl SqliteSyncQueue {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(&conn)?;
        Ok(SqliteSyncQueue { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(SqliteSyncQueue { conn: Mutex::new(conn) })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS queue (
                id TEXT PRIMARY KEY,
                txid TEXT NOT NULL,
                vout INTEGER NOT NULL,
                score REAL NOT NULL,
                spend_txid TEXT,
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL,
                last_error TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS queue_status ON queue(status);
            CREATE INDEX IF NOT EXISTS queue_txid ON queue(txid);
            CREATE TABLE IF NOT EXISTS state (key TEXT PRIMARY KEY, value TEXT NOT NULL);",
        )?;
        Ok(())
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<SyncQueueItem> {
        let txid_hex: String = row.get("txid")?;
        let vout: u32 = row.get("vout")?;
        let spend_txid_hex: Option<String> = row.get("spend_txid")?;
        let status: String = row.get("status")?;
        Ok(SyncQueueItem {
            id: row.get("id")?,
            outpoint: Outpoint::from_pair(hex_to_txid(&txid_hex), vout),
            score: row.get("score")?,
            spend_txid: spend_txid_hex.map(|s| hex_to_txid(&s)),
            status: QueueStatus::from_str(&status).unwrap_or(QueueStatus::Pending),
            attempts: row.get::<_, i64>("attempts")? as u32,
            last_error: row.get("last_error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

fn hex_to_txid(s: &str) -> Txid {
    let bytes = hex::decode(s).unwrap_or_default();
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

#[async_trait]
impl SyncQueue for SqliteSyncQueue {
    async fn enqueue(&self, items: Vec<NewQueueItem>) -> Result<()> {
        let conn = self.conn.lock();
        for new_item in items {
            let id = item_id(&new_item.outpoint, new_item.score);
            let existing_status: Option<String> = conn
                .query_row("SELECT status FROM queue WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            match existing_status.as_deref() {
                Some("done") => continue,
                Some(_) => {
                    conn.execute(
                        "UPDATE queue SET status = 'pending', spend_txid = ?2, updated_at = ?3 WHERE id = ?1",
                        params![id, new_item.spend_txid.map(hex::encode), Utc::now()],
                    )?;
                }
                None => {
                    let now = Utc::now();
                    conn.execute(
                        "INSERT INTO queue (id, txid, vout, score, spend_txid, status, attempts, last_error, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', 0, NULL, ?6, ?6)",
                        params![
                            id,
                            hex::encode(new_item.outpoint.txid),
                            new_item.outpoint.vout,
                            new_item.score,
                            new_item.spend_txid.map(hex::encode),
                            now,
                        ],
                    )?;
                }
            }
        }
        Ok(())
    }

    async fn claim(&self, count: usize) -> Result<HashMap<Txid, Vec<SyncQueueItem>>> {
        let conn = self.conn.lock();
        let seed_txids: Vec<String> = {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT txid FROM queue WHERE status = 'pending' ORDER BY score ASC LIMIT ?1",
            )?;
            stmt.query_map(params![count as i64], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?
        };

        let mut groups: HashMap<Txid, Vec<SyncQueueItem>> = HashMap::new();
        for txid_hex in seed_txids {
            let ids: Vec<String> = {
                let mut stmt =
                    conn.prepare("SELECT id FROM queue WHERE status = 'pending' AND txid = ?1")?;
                stmt.query_map(params![txid_hex], |row| row.get(0))?.collect::<rusqlite::Result<_>>()?
            };
            let now = Utc::now();
            for id in &ids {
                conn.execute(
                    "UPDATE queue SET status = 'processing', attempts = attempts + 1, updated_at = ?2 WHERE id = ?1",
                    params![id, now],
                )?;
            }
            let mut stmt = conn.prepare("SELECT * FROM queue WHERE txid = ?1 AND status = 'processing'")?;
            let items: Vec<SyncQueueItem> =
                stmt.query_map(params![txid_hex], Self::row_to_item)?.collect::<rusqlite::Result<_>>()?;
            if let Some(first) = items.first() {
                groups.insert(first.outpoint.txid, items);
            }
        }
        Ok(groups)
    }

    async fn complete(&self, id: &str) -> Result<()> {
        self.complete_many(std::slice::from_ref(&id.to_owned())).await
    }

    async fn complete_many(&self, ids: &[String]) -> Result<()> {
        let conn = self.conn.lock();
        let now = Utc::now();
        for id in ids {
            conn.execute("UPDATE queue SET status = 'done', updated_at = ?2 WHERE id = ?1", params![id, now])?;
        }
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE queue SET status = 'failed', last_error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, Utc::now()],
        )?;
        Ok(())
    }

    async fn get_by_txid(&self, txid: &Txid) -> Result<Vec<SyncQueueItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM queue WHERE txid = ?1")?;
        let items = stmt
            .query_map(params![hex::encode(txid)], Self::row_to_item)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    async fn get_by_status(&self, status: QueueStatus, limit: usize) -> Result<Vec<SyncQueueItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM queue WHERE status = ?1 LIMIT ?2")?;
        let items = stmt
            .query_map(params![status.to_string(), limit as i64], Self::row_to_item)?
            .collect::<rusqlite::Result<_>>()?;
        Ok(items)
    }

    async fn get_stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(DISTINCT txid) FROM (
                SELECT txid, status, MAX(updated_at) FROM queue GROUP BY txid
             ) GROUP BY status",
        )?;
        let rows: Vec<(String, i64)> = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?.collect::<rusqlite::Result<_>>()?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            match QueueStatus::from_str(&status) {
                Ok(QueueStatus::Pending) => stats.pending = count as u64,
                Ok(QueueStatus::Processing) => stats.processing = count as u64,
                Ok(QueueStatus::Done) => stats.done = count as u64,
                Ok(QueueStatus::Failed) => stats.failed = count as u64,
                Err(_) => {}
            }
        }
        Ok(stats)
    }

    async fn get_state(&self) -> Result<SyncState> {
        let conn = self.conn.lock();
        let value: Option<String> =
            conn.query_row("SELECT value FROM state WHERE key = 'syncState'", [], |row| row.get(0)).optional()?;
        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(SyncState::default()),
        }
    }

    async fn set_state(&self, state: SyncState) -> Result<()> {
        let conn = self.conn.lock();
        let json = serde_json::to_string(&state)?;
        conn.execute(
            "INSERT INTO state (key, value) VALUES ('syncState', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![json],
        )?;
        Ok(())
    }

    async fn reset_processing(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let changed = conn.execute("UPDATE queue SET status = 'pending' WHERE status = 'processing'", [])?;
        Ok(changed as u64)
    }

    async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM queue", [])?;
        conn.execute("DELETE FROM state", [])?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> SqliteSyncQueue {
        SqliteSyncQueue::open_in_memory().unwrap()
    }

    #[tokio::test]
    async fn enqueue_then_claim_marks_processing() {
        let q = queue();
        let outpoint = Outpoint::from_pair([7u8; 32], 2);
        q.enqueue(vec![NewQueueItem { outpoint, score: 42.0, spend_txid: None }]).await.unwrap();
        let claimed = q.claim(10).await.unwrap();
        let items = claimed.get(&outpoint.txid).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].status, QueueStatus::Processing);
    }

    #[tokio::test]
    async fn stats_count_distinct_by_txid() {
        let q = queue();
        let txid = [8u8; 32];
        q.enqueue(vec![
            NewQueueItem { outpoint: Outpoint::from_pair(txid, 0), score: 1.0, spend_txid: None },
            NewQueueItem { outpoint: Outpoint::from_pair(txid, 1), score: 1.0, spend_txid: None },
        ])
        .await
        .unwrap();
        let stats = q.get_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }
}
