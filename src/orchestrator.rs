//! The sync orchestrator (spec.md §4.5): a stream loop draining the owner
//! SSE subscription into the queue, and a processor loop draining the queue
//! into wallet storage. Grounded on the teacher's `cron.rs` interval-driven
//! background tasks and `join_all` batch fan-out, rebuilt on
//! `tokio::task::JoinSet`.

use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::indexer::{IndexerClient, StreamMessage};
use crate::outpoint::Txid;
use crate::owners::OwnerSet;
use crate::queue::{NewQueueItem, SyncQueue, SyncState};
use crate::storage::{NewTransaction, TxStatus, WalletStorage};
use crate::writer::ingest_transaction;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Outputs older than this many blocks behind the chain tip are considered
/// outside the re-org danger zone (spec.md §4.5 step 4).
const REORG_SAFE_DEPTH: u32 = 6;
const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct SyncOrchestrator {
    indexer: IndexerClient,
    storage: Arc<dyn WalletStorage>,
    queue: Arc<dyn SyncQueue>,
    owners: OwnerSet,
    events: EventBus,
    batch_size: usize,

    stream_active: Arc<AtomicBool>,
    stream_done: Arc<AtomicBool>,
    processor_active: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,

    stream_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    processor_handle: AsyncMutex<Option<tokio::task::JoinHandle<()>>>,
    stream_subscription_stop: Arc<tokio::sync::Notify>,
}

impl SyncOrchestrator {
    pub fn new(
        indexer: IndexerClient,
        storage: Arc<dyn WalletStorage>,
        queue: Arc<dyn SyncQueue>,
        owners: OwnerSet,
        events: EventBus,
        batch_size: usize,
    ) -> Self {
        SyncOrchestrator {
            indexer,
            storage,
            queue,
            owners,
            events,
            batch_size,
            stream_active: Arc::new(AtomicBool::new(false)),
            stream_done: Arc::new(AtomicBool::new(false)),
            processor_active: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            stream_handle: AsyncMutex::new(None),
            processor_handle: AsyncMutex::new(None),
            stream_subscription_stop: Arc::new(tokio::sync::Notify::new()),
        }
    }

    pub fn is_stream_active(&self) -> bool {
        self.stream_active.load(Ordering::SeqCst)
    }

    pub fn is_stream_done(&self) -> bool {
        self.stream_done.load(Ordering::SeqCst)
    }

    pub fn is_processor_active(&self) -> bool {
        self.processor_active.load(Ordering::SeqCst)
    }

    /// Starts both loops and emits `sync:start` (spec.md §4.7).
    pub async fn sync(&self) -> Result<()> {
        self.stop_requested.store(false, Ordering::SeqCst);
        self.events.emit(SyncEvent::Start);
        self.start_processor().await?;
        self.start_stream().await?;
        Ok(())
    }

    /// Cooperatively stops both loops (spec.md §4.5 "Cancellation"):
    /// flips `stopRequested`, closes the SSE subscription, and returns
    /// without waiting for in-flight batch work — callers that need to
    /// block until settled should await the join handles directly.
    pub async fn stop_sync(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stream_subscription_stop.notify_waiters();
    }

    pub async fn start_stream(&self) -> Result<()> {
        let indexer = self.indexer.clone();
        let queue = self.queue.clone();
        let owners = self.owners.clone();
        let events = self.events.clone();
        let stream_active = self.stream_active.clone();
        let stream_done = self.stream_done.clone();
        let stop_requested = self.stop_requested.clone();
        let stop_notify = self.stream_subscription_stop.clone();

        stream_active.store(true, Ordering::SeqCst);
        stream_done.store(false, Ordering::SeqCst);

        let handle = tokio::spawn(async move {
            if let Err(e) = run_stream_loop(indexer, queue, owners, &events, stop_requested, stop_notify).await {
                events.emit(SyncEvent::Error { message: e.to_string() });
            }
            stream_active.store(false, Ordering::SeqCst);
            stream_done.store(true, Ordering::SeqCst);
        });
        *self.stream_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop_stream(&self) {
        self.stream_subscription_stop.notify_waiters();
        if let Some(handle) = self.stream_handle.lock().await.take() {
            handle.abort();
        }
        self.stream_active.store(false, Ordering::SeqCst);
    }

    pub async fn start_processor(&self) -> Result<()> {
        self.queue.reset_processing().await?;

        let storage = self.storage.clone();
        let queue = self.queue.clone();
        let owners = self.owners.clone();
        let indexer = self.indexer.clone();
        let events = self.events.clone();
        let batch_size = self.batch_size;
        let stream_done = self.stream_done.clone();
        let stop_requested = self.stop_requested.clone();
        let processor_active = self.processor_active.clone();

        processor_active.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(async move {
            run_processor_loop(storage, queue, owners, indexer, &events, batch_size, stream_done, stop_requested)
                .await;
            processor_active.store(false, Ordering::SeqCst);
        });
        *self.processor_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop_processor(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        if let Some(handle) = self.processor_handle.lock().await.take() {
            handle.abort();
        }
        self.processor_active.store(false, Ordering::SeqCst);
    }
}

async fn run_stream_loop(
    indexer: IndexerClient,
    queue: Arc<dyn SyncQueue>,
    owners: OwnerSet,
    events: &EventBus,
    stop_requested: Arc<AtomicBool>,
    stop_notify: Arc<tokio::sync::Notify>,
) -> Result<()> {
    queue.reset_processing().await?;

    let state = queue.get_state().await?;
    let from_score = state.last_queued_score;
    let current_height = indexer.chaintracks_tip().await?.height;

    let mut subscription = indexer.owner_sync(&owners.snapshot(), from_score)?;
    let mut last_queued_score = from_score;

    loop {
        if stop_requested.load(Ordering::SeqCst) {
            subscription.close().await;
            return Ok(());
        }

        let message = tokio::select! {
            msg = subscription.next() => msg,
            _ = stop_notify.notified() => {
                subscription.close().await;
                return Ok(());
            }
        };

        match message {
            Some(StreamMessage::Output(event)) => {
                let outpoint = event.parsed_outpoint()?;
                let spend_txid = match event.spend_txid.as_deref() {
                    Some(hex_txid) => Some(hex_to_txid(hex_txid)?),
                    None => None,
                };
                queue
                    .enqueue(vec![NewQueueItem { outpoint, score: event.score, spend_txid }])
                    .await?;

                let block_height = event.score.floor() as i64;
                if block_height <= current_height as i64 - REORG_SAFE_DEPTH as i64 {
                    last_queued_score = event.score;
                    queue
                        .set_state(SyncState {
                            last_queued_score,
                            last_synced_at: Some(chrono::Utc::now()),
                        })
                        .await?;
                }
            }
            Some(StreamMessage::Done) | None => {
                return Ok(());
            }
            Some(StreamMessage::Error(e)) => {
                events.emit(SyncEvent::Error { message: e.to_string() });
                return Ok(());
            }
        }
    }
}

fn hex_to_txid(s: &str) -> Result<Txid> {
    let bytes = hex::decode(s).map_err(|_| crate::error::Error::MalformedOutpoint(s.to_owned()))?;
    if bytes.len() != 32 {
        return Err(crate::error::Error::MalformedOutpoint(s.to_owned()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

#[allow(clippy::too_many_arguments)]
async fn run_processor_loop(
    storage: Arc<dyn WalletStorage>,
    queue: Arc<dyn SyncQueue>,
    owners: OwnerSet,
    indexer: IndexerClient,
    events: &EventBus,
    batch_size: usize,
    stream_done: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
) {
    loop {
        if stop_requested.load(Ordering::SeqCst) {
            return;
        }

        let by_txid = match queue.claim(batch_size).await {
            Ok(groups) => groups,
            Err(e) => {
                events.emit(SyncEvent::Error { message: e.to_string() });
                tokio::time::sleep(IDLE_POLL).await;
                continue;
            }
        };

        if by_txid.is_empty() {
            if stream_done.load(Ordering::SeqCst) {
                events.emit(SyncEvent::Complete);
                return;
            }
            tokio::time::sleep(IDLE_POLL).await;
            continue;
        }

        let mut join_set = tokio::task::JoinSet::new();
        for (txid, items) in by_txid {
            let storage = storage.clone();
            let owners = owners.clone();
            let indexer = indexer.clone();
            let queue = queue.clone();
            join_set.spawn(async move { process_group(txid, items, storage, owners, indexer, queue).await });
        }

        while let Some(joined) = join_set.join_next().await {
            if let Ok(Err(e)) = joined {
                events.emit(SyncEvent::Error { message: e.to_string() });
            }
        }

        match queue.get_stats().await {
            Ok(stats) => events.emit(stats.into()),
            Err(e) => events.emit(SyncEvent::Error { message: e.to_string() }),
        }
    }
}

async fn process_group(
    txid: Txid,
    items: Vec<crate::queue::SyncQueueItem>,
    storage: Arc<dyn WalletStorage>,
    owners: OwnerSet,
    indexer: IndexerClient,
    queue: Arc<dyn SyncQueue>,
) -> Result<()> {
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    let spend_map: HashMap<u32, Txid> = items
        .iter()
        .filter_map(|i| i.spend_txid.map(|spend| (i.outpoint.vout, spend)))
        .collect();
    let all_spend_only = items.iter().all(|i| i.spend_txid.is_some());

    let result = if all_spend_only {
        spend_only(&txid, &spend_map, storage.as_ref()).await
    } else {
        ingest_with_spend_info(&txid, &spend_map, &owners, storage.as_ref(), &indexer).await
    };

    match result {
        Ok(()) => queue.complete_many(&ids).await,
        Err(e) => {
            for id in &ids {
                let _ = queue.fail(id, &e.to_string()).await;
            }
            Err(e)
        }
    }
}

/// Flips each owned, still-spendable `(txid, vout)` in `spend_map` to
/// unspendable, without fetching or parsing the spending transaction
/// (spec.md §4.5 processor loop step 3, "no transaction ingest needed"). A
/// minimal stub row for the spending txid is inserted on demand so
/// `mark_output_unspendable`'s `spent_by` foreign key has something to
/// reference — the spending tx itself is ingested later, if ever, when it
/// arrives as its own queue group.
async fn spend_only(txid: &Txid, spend_map: &HashMap<u32, Txid>, storage: &dyn WalletStorage) -> Result<()> {
    for (&vout, &spend_txid) in spend_map {
        if let Some(row) = storage.find_output(txid, vout).await? {
            if row.spendable {
                let mut storage_tx = storage.begin().await?;
                let spend_id = match storage_tx.find_transaction_id(&spend_txid).await? {
                    Some(id) => id,
                    None => {
                        storage_tx
                            .insert_transaction(NewTransaction {
                                txid: spend_txid,
                                status: TxStatus::Unproven,
                                is_outgoing: false,
                                satoshis_spent: 0,
                                satoshis_received: 0,
                                satoshis: 0,
                                raw_tx: Vec::new(),
                                reference: random_reference(),
                                labels: Vec::new(),
                            })
                            .await?
                    }
                };
                storage_tx.mark_output_unspendable(txid, vout, spend_id).await?;
                storage_tx.commit().await?;
            }
        }
    }
    Ok(())
}

fn random_reference() -> String {
    use base64::Engine;
    let bytes: [u8; 12] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

async fn ingest_with_spend_info(
    txid: &Txid,
    spend_map: &HashMap<u32, Txid>,
    owners: &OwnerSet,
    storage: &dyn WalletStorage,
    indexer: &IndexerClient,
) -> Result<()> {
    let raw = match storage.find_raw_transaction(txid).await? {
        Some(bytes) => bytes,
        None => indexer.beef_raw(txid).await?,
    };
    let tx: bitcoin::Transaction = bitcoin::consensus::deserialize(&raw)
        .map_err(|e| crate::error::Error::MalformedScript(format!("queued tx decode: {e}")))?;

    ingest_transaction(&tx, false, owners, storage, indexer, Vec::new()).await?;
    spend_only(txid, spend_map, storage).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::kv::SledSyncQueue;
    use crate::storage::memory::MemoryWalletStorage;

    #[tokio::test]
    async fn start_processor_completes_immediately_when_queue_is_empty_and_stream_is_done() {
        let storage = Arc::new(MemoryWalletStorage::new());
        let queue: Arc<dyn SyncQueue> =
            Arc::new(SledSyncQueue::open(tempfile::tempdir().unwrap().into_path()).unwrap());
        let indexer = IndexerClient::new("http://localhost:0").unwrap();
        let orchestrator = SyncOrchestrator::new(
            indexer,
            storage,
            queue,
            OwnerSet::new(),
            EventBus::new(),
            20,
        );
        orchestrator.stream_done.store(true, Ordering::SeqCst);
        orchestrator.start_processor().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        orchestrator.stop_processor().await;
        assert!(!orchestrator.is_processor_active());
    }

    /// spec.md §8 scenario 2: the storage layer never heard of the spent
    /// output, so the spend-only group is a pure no-op.
    #[tokio::test]
    async fn spend_only_skips_an_output_we_never_stored() {
        let storage = MemoryWalletStorage::new();
        let txid = [0xbbu8; 32];
        let spend_map: HashMap<u32, Txid> = [(0u32, [0xccu8; 32])].into_iter().collect();

        spend_only(&txid, &spend_map, &storage).await.unwrap();

        assert!(!storage.has_output(&txid, 0));
    }

    /// spec.md §8 scenario 3: a spendable output we do track flips to
    /// unspendable without ever fetching the spending transaction.
    #[tokio::test]
    async fn spend_only_flips_a_tracked_output_unspendable() {
        let storage = MemoryWalletStorage::new();
        let txid = [0xbbu8; 32];
        let spend_txid = [0xccu8; 32];
        storage.seed_output(txid, 0, true);
        let spend_map: HashMap<u32, Txid> = [(0u32, spend_txid)].into_iter().collect();

        spend_only(&txid, &spend_map, &storage).await.unwrap();

        assert_eq!(storage.output_spendable(&txid, 0), Some(false));
    }
}
