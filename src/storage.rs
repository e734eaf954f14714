//! The external wallet storage contract (spec.md §3, "Wallet records").
//!
//! This crate never implements a production backend for this trait — the
//! host wallet's general UTXO/transaction store is explicitly out of scope
//! (spec.md §1). What lives here is the *shape* of the operations the
//! writer (`crate::writer`) calls, plus an in-memory reference
//! implementation used by this crate's own tests.

use crate::outpoint::Txid;
use async_trait::async_trait;
use strum_macros::{Display, EnumString};

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub txid: Txid,
    pub status: TxStatus,
    pub is_outgoing: bool,
    pub satoshis_spent: i64,
    pub satoshis_received: i64,
    pub satoshis: i64,
    pub raw_tx: Vec<u8>,
    pub reference: String,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TxStatus {
    Unproven,
    Completed,
}

#[derive(Debug, Clone)]
pub struct NewOutput {
    pub txid: Txid,
    pub vout: u32,
    pub satoshis: u64,
    pub locking_script: Vec<u8>,
    pub basket: String,
    pub change: bool,
    pub purpose: String,
    pub custom_instructions: Option<String>,
    pub tags: Vec<String>,
    /// Always `"custom"` — every output this crate inserts came from
    /// decoding a script itself, not a BRC-100 `createAction` call
    /// (spec.md §4.6 step 6).
    pub output_type: String,
    /// Always `"you"` — the wallet itself produced this row; it was never
    /// handed an output descriptor by a counterparty (spec.md §4.6 step 6).
    pub provided_by: String,
}

#[derive(Debug, Clone)]
pub struct OutputRow {
    pub id: i64,
    pub txid: Txid,
    pub vout: u32,
    pub spendable: bool,
    pub spent_by: Option<i64>,
}

/// A single storage transaction, scoped: dropping it without `commit`
/// rolls back (design note §9, "scoped resources").
#[async_trait]
pub trait StorageTransaction: Send {
    async fn find_transaction_id(&mut self, txid: &Txid) -> crate::error::Result<Option<i64>>;
    async fn insert_transaction(&mut self, record: NewTransaction) -> crate::error::Result<i64>;
    async fn find_output(&mut self, txid: &Txid, vout: u32) -> crate::error::Result<Option<OutputRow>>;
    async fn insert_output(&mut self, user_id: &str, record: NewOutput) -> crate::error::Result<i64>;
    async fn mark_output_unspendable(
        &mut self,
        txid: &Txid,
        vout: u32,
        spent_by: i64,
    ) -> crate::error::Result<bool>;
    async fn commit(self: Box<Self>) -> crate::error::Result<()>;
}

/// The wallet's general storage engine, treated abstractly per spec.md §3.
#[async_trait]
pub trait WalletStorage: Send + Sync {
    /// Raw transaction bytes for `txid`, if already persisted — the
    /// storage-first half of "load transaction" (spec.md §4.3 step 1).
    async fn find_raw_transaction(&self, txid: &Txid) -> crate::error::Result<Option<Vec<u8>>>;

    async fn find_output(&self, txid: &Txid, vout: u32) -> crate::error::Result<Option<OutputRow>>;

    /// Opens one serializable unit of work (spec.md §3 `transaction(fn)`).
    async fn begin(&self) -> crate::error::Result<Box<dyn StorageTransaction>>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod memory {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Clone)]
    struct StoredTx {
        id: i64,
        raw: Vec<u8>,
    }

    #[derive(Debug, Clone)]
    struct StoredOutput {
        id: i64,
        spendable: bool,
        spent_by: Option<i64>,
    }

    #[derive(Default)]
    struct Inner {
        txs: HashMap<Txid, StoredTx>,
        outputs: HashMap<(Txid, u32), StoredOutput>,
        next_tx_id: i64,
        next_output_id: i64,
        pub inserted_outputs: Vec<NewOutput>,
        pub inserted_transactions: Vec<NewTransaction>,
    }

    /// A trivial in-memory `WalletStorage`, used by this crate's own
    /// integration tests to exercise the writer and orchestrator without a
    /// real wallet backend attached.
    #[derive(Clone, Default)]
    pub struct MemoryWalletStorage {
        inner: Arc<Mutex<Inner>>,
    }

    impl MemoryWalletStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn output_spendable(&self, txid: &Txid, vout: u32) -> Option<bool> {
            self.inner.lock().outputs.get(&(*txid, vout)).map(|o| o.spendable)
        }

        pub fn has_output(&self, txid: &Txid, vout: u32) -> bool {
            self.inner.lock().outputs.contains_key(&(*txid, vout))
        }

        pub fn has_transaction(&self, txid: &Txid) -> bool {
            self.inner.lock().txs.contains_key(txid)
        }

        pub fn seed_output(&self, txid: Txid, vout: u32, spendable: bool) {
            let mut inner = self.inner.lock();
            let id = inner.next_output_id;
            inner.next_output_id += 1;
            inner.outputs.insert((txid, vout), StoredOutput { id, spendable, spent_by: None });
        }

        pub fn inserted_output_count(&self) -> usize {
            self.inner.lock().inserted_outputs.len()
        }

        pub fn inserted_outputs(&self) -> Vec<NewOutput> {
            self.inner.lock().inserted_outputs.clone()
        }
    }

    #[async_trait]
    impl WalletStorage for MemoryWalletStorage {
        async fn find_raw_transaction(&self, txid: &Txid) -> crate::error::Result<Option<Vec<u8>>> {
            Ok(self.inner.lock().txs.get(txid).map(|t| t.raw.clone()))
        }

        async fn find_output(&self, txid: &Txid, vout: u32) -> crate::error::Result<Option<OutputRow>> {
            Ok(self.inner.lock().outputs.get(&(*txid, vout)).map(|o| OutputRow {
                id: o.id,
                txid: *txid,
                vout,
                spendable: o.spendable,
                spent_by: o.spent_by,
            }))
        }

        async fn begin(&self) -> crate::error::Result<Box<dyn StorageTransaction>> {
            Ok(Box::new(MemoryTx {
                inner: self.inner.clone(),
            }))
        }
    }

    struct MemoryTx {
        inner: Arc<Mutex<Inner>>,
    }

    #[async_trait]
    impl StorageTransaction for MemoryTx {
        async fn find_transaction_id(&mut self, txid: &Txid) -> crate::error::Result<Option<i64>> {
            Ok(self.inner.lock().txs.get(txid).map(|t| t.id))
        }

        async fn insert_transaction(&mut self, record: NewTransaction) -> crate::error::Result<i64> {
            let mut inner = self.inner.lock();
            let id = inner.next_tx_id;
            inner.next_tx_id += 1;
            let txid = record.txid;
            let raw = record.raw_tx.clone();
            inner.inserted_transactions.push(record);
            inner.txs.insert(txid, StoredTx { id, raw });
            Ok(id)
        }

        async fn find_output(&mut self, txid: &Txid, vout: u32) -> crate::error::Result<Option<OutputRow>> {
            Ok(self.inner.lock().outputs.get(&(*txid, vout)).map(|o| OutputRow {
                id: o.id,
                txid: *txid,
                vout,
                spendable: o.spendable,
                spent_by: o.spent_by,
            }))
        }

        async fn insert_output(&mut self, _user_id: &str, record: NewOutput) -> crate::error::Result<i64> {
            let mut inner = self.inner.lock();
            let id = inner.next_output_id;
            inner.next_output_id += 1;
            let key = (record.txid, record.vout);
            inner.outputs.insert(key, StoredOutput { id, spendable: true, spent_by: None });
            inner.inserted_outputs.push(record);
            Ok(id)
        }

        async fn mark_output_unspendable(
            &mut self,
            txid: &Txid,
            vout: u32,
            spent_by: i64,
        ) -> crate::error::Result<bool> {
            let mut inner = self.inner.lock();
            if let Some(o) = inner.outputs.get_mut(&(*txid, vout)) {
                if o.spendable {
                    o.spendable = false;
                    o.spent_by = Some(spent_by);
                    return Ok(true);
                }
            }
            Ok(false)
        }

        async fn commit(self: Box<Self>) -> crate::error::Result<()> {
            Ok(())
        }
    }
}
