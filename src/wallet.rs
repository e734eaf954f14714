//! The `Wallet` facade (spec.md §2 "Wallet facade" row): the single entry
//! point a host application embeds. Wires together the indexer client,
//! owner set, queue backend, and sync orchestrator behind a small surface:
//! `parse_transaction`, `ingest_transaction`, `sync`, the stream/processor
//! start/stop controls, and `close`.

use crate::config::{Config, QueueBackend};
use crate::decoders::decoders;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::indexer::IndexerClient;
use crate::orchestrator::SyncOrchestrator;
use crate::owners::OwnerSet;
use crate::parser::{parse_transaction as run_parser, ParseContext};
use crate::queue::kv::SledSyncQueue;
use crate::queue::sql::SqliteSyncQueue;
use crate::queue::SyncQueue;
use crate::storage::WalletStorage;
use crate::txo::Address;
use crate::writer::{ingest_transaction as run_writer, IngestOutcome};
use std::sync::Arc;

pub struct Wallet {
    indexer: IndexerClient,
    storage: Arc<dyn WalletStorage>,
    queue: Arc<dyn SyncQueue>,
    owners: OwnerSet,
    events: EventBus,
    orchestrator: SyncOrchestrator,
}

impl Wallet {
    /// Builds a wallet from an explicit storage backend and `Config`,
    /// opening whichever queue backend the config selects.
    pub fn new(config: Config, storage: Arc<dyn WalletStorage>) -> Result<Self> {
        let indexer = IndexerClient::new(config.indexer_url.clone())?;
        let queue: Arc<dyn SyncQueue> = match config.queue_backend {
            QueueBackend::Sled => Arc::new(SledSyncQueue::open(&config.queue_path)?),
            QueueBackend::Sqlite => Arc::new(SqliteSyncQueue::open(&config.queue_path)?),
        };
        let owners = OwnerSet::new();
        let events = EventBus::new();
        let orchestrator = SyncOrchestrator::new(
            indexer.clone(),
            storage.clone(),
            queue.clone(),
            owners.clone(),
            events.clone(),
            config.sync_batch_size,
        );
        Ok(Wallet { indexer, storage, queue, owners, events, orchestrator })
    }

    pub fn add_owner(&self, address: Address) {
        self.owners.add(address);
    }

    pub fn subscribe(&self, listener: impl Fn(&SyncEvent) + Send + Sync + 'static) {
        self.events.subscribe(listener);
    }

    /// Runs the decoder pipeline against `tx` without touching storage
    /// (spec.md §4.3).
    pub async fn parse_transaction(&self, tx: &bitcoin::Transaction, is_broadcast: bool) -> Result<ParseContext> {
        let decoder_set = decoders();
        run_parser(tx, is_broadcast, &self.owners, self.storage.as_ref(), &self.indexer, &decoder_set).await
    }

    /// Parses `tx` and folds owned outputs/spends into wallet storage
    /// (spec.md §4.6).
    pub async fn ingest_transaction(
        &self,
        tx: &bitcoin::Transaction,
        is_broadcast: bool,
        labels: Vec<String>,
    ) -> Result<IngestOutcome> {
        run_writer(tx, is_broadcast, &self.owners, self.storage.as_ref(), &self.indexer, labels).await
    }

    /// Starts both the stream and processor loops (spec.md §4.5).
    pub async fn sync(&self) -> Result<()> {
        self.orchestrator.sync().await
    }

    pub async fn stop_sync(&self) {
        self.orchestrator.stop_sync().await
    }

    pub async fn start_stream(&self) -> Result<()> {
        self.orchestrator.start_stream().await
    }

    pub async fn stop_stream(&self) {
        self.orchestrator.stop_stream().await
    }

    pub async fn start_processor(&self) -> Result<()> {
        self.orchestrator.start_processor().await
    }

    pub async fn stop_processor(&self) {
        self.orchestrator.stop_processor().await
    }

    pub fn is_stream_active(&self) -> bool {
        self.orchestrator.is_stream_active()
    }

    pub fn is_stream_done(&self) -> bool {
        self.orchestrator.is_stream_done()
    }

    pub fn is_processor_active(&self) -> bool {
        self.orchestrator.is_processor_active()
    }

    /// Stops both loops and flushes the queue backend to disk.
    pub async fn close(&self) -> Result<()> {
        self.stop_sync().await;
        self.queue.close().await
    }
}
