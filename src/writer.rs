//! The storage writer (spec.md §4.6): `ingest_transaction` runs the parser
//! pipeline and folds its result into wallet storage inside one storage
//! transaction, so external observers never see a partially ingested
//! transaction (spec.md §5 "ordering guarantees").

use crate::decoders::decoders as default_decoders;
use crate::error::Result;
use crate::indexer::IndexerClient;
use crate::outpoint::Txid;
use crate::owners::OwnerSet;
use crate::parser::{parse_transaction, ParseContext};
use crate::storage::{NewOutput, NewTransaction, TxStatus, WalletStorage};
use crate::txo::Txo;
use base64::Engine;
use std::collections::VecDeque;

/// Result of a single `ingest_transaction` call (spec.md §4.6 step 7).
pub struct IngestOutcome {
    pub parse_context: ParseContext,
    pub internalized_count: usize,
}

fn owned_txo<'a>(txo: &'a Txo, owners: &OwnerSet) -> bool {
    txo.owner.as_ref().is_some_and(|o| owners.contains(o))
}

fn random_reference() -> String {
    let bytes: [u8; 12] = rand::random();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Persists `tx`'s direct sources one level deep, then recurses from each
/// newly-inserted source into *its* sources — a breadth-first walk that
/// stops the moment storage already has a row for a txid (spec.md §4.6
/// step 4, design note §9 "acyclic source-tx BFS").
async fn persist_sources(
    tx: &bitcoin::Transaction,
    storage_tx: &mut dyn crate::storage::StorageTransaction,
    indexer: &IndexerClient,
) -> Result<()> {
    let mut queue: VecDeque<Txid> = tx
        .input
        .iter()
        .map(|i| {
            let mut bytes: Txid = *AsRef::<[u8; 32]>::as_ref(&i.previous_output.txid);
            bytes.reverse();
            bytes
        })
        .collect();

    let mut seen = std::collections::HashSet::new();
    while let Some(txid) = queue.pop_front() {
        if !seen.insert(txid) {
            continue;
        }
        if storage_tx.find_transaction_id(&txid).await?.is_some() {
            continue;
        }
        let raw = indexer.beef_raw(&txid).await?;
        let source: bitcoin::Transaction = bitcoin::consensus::deserialize(&raw)
            .map_err(|e| crate::error::Error::MalformedScript(format!("source tx decode: {e}")))?;
        storage_tx
            .insert_transaction(NewTransaction {
                txid,
                status: TxStatus::Completed,
                is_outgoing: false,
                satoshis_spent: 0,
                satoshis_received: 0,
                satoshis: 0,
                raw_tx: raw,
                reference: random_reference(),
                labels: Vec::new(),
            })
            .await?;
        for input in &source.input {
            let mut bytes: Txid = *AsRef::<[u8; 32]>::as_ref(&input.previous_output.txid);
            bytes.reverse();
            queue.push_back(bytes);
        }
    }
    Ok(())
}

/// Runs the parser pipeline against `tx` and folds the result into wallet
/// storage (spec.md §4.6). `is_broadcast` distinguishes a transaction we
/// just broadcast ourselves (status `completed`) from one observed on the
/// wire (status `unproven`).
pub async fn ingest_transaction(
    tx: &bitcoin::Transaction,
    is_broadcast: bool,
    owners: &OwnerSet,
    storage: &dyn WalletStorage,
    indexer: &IndexerClient,
    labels: Vec<String>,
) -> Result<IngestOutcome> {
    let decoders = default_decoders();
    let ctx = parse_transaction(tx, is_broadcast, owners, storage, indexer, &decoders).await?;

    let mut storage_tx = storage.begin().await?;

    let existing_id = storage_tx.find_transaction_id(&ctx.txid).await?;
    let (tx_id, inserted) = match existing_id {
        Some(id) => (id, false),
        None => {
            let mut satoshis_spent: i64 = 0;
            let mut is_outgoing = false;
            for input in &tx.input {
                let mut source_txid: Txid = *AsRef::<[u8; 32]>::as_ref(&input.previous_output.txid);
                source_txid.reverse();
                let vout = input.previous_output.vout;
                if let Some(row) = storage_tx.find_output(&source_txid, vout).await? {
                    is_outgoing = true;
                    let spend = ctx.spends.iter().find(|s| s.outpoint.txid == source_txid && s.outpoint.vout == vout);
                    satoshis_spent += spend.map(|s| s.satoshis as i64).unwrap_or(0);
                    let _ = row.id;
                }
            }
            let satoshis_received: i64 =
                ctx.txos.iter().filter(|t| owned_txo(t, owners)).map(|t| t.satoshis as i64).sum();

            let raw_tx = bitcoin::consensus::serialize(tx);
            let record = NewTransaction {
                txid: ctx.txid,
                status: if is_broadcast { TxStatus::Completed } else { TxStatus::Unproven },
                is_outgoing,
                satoshis_spent,
                satoshis_received,
                satoshis: satoshis_received - satoshis_spent,
                raw_tx,
                reference: random_reference(),
                labels,
            };
            persist_sources(tx, storage_tx.as_mut(), indexer).await?;
            let id = storage_tx.insert_transaction(record).await?;
            (id, true)
        }
    };

    if inserted {
        for input in &tx.input {
            let mut source_txid: Txid = *AsRef::<[u8; 32]>::as_ref(&input.previous_output.txid);
            source_txid.reverse();
            let vout = input.previous_output.vout;
            if let Some(row) = storage_tx.find_output(&source_txid, vout).await? {
                if row.spendable {
                    storage_tx.mark_output_unspendable(&source_txid, vout, tx_id).await?;
                }
            }
        }
    }

    let mut internalized_count = 0usize;
    for txo in ctx.txos.iter().filter(|t| owned_txo(t, owners)) {
        if storage_tx.find_output(&txo.outpoint.txid, txo.outpoint.vout).await?.is_some() {
            continue;
        }
        let owner = txo.owner.clone().expect("owned_txo guarantees Some");
        let basket = txo.basket.clone().unwrap_or_else(|| "default".to_owned());
        let change = basket == "default";
        let mut tags: Vec<String> = vec![format!("own:{owner}")];
        tags.extend(txo.tags().map(str::to_owned));
        let content = txo.data.values().find_map(|d| d.content.clone());

        storage_tx
            .insert_output(
                &owner.0,
                NewOutput {
                    txid: txo.outpoint.txid,
                    vout: txo.outpoint.vout,
                    satoshis: txo.satoshis,
                    locking_script: txo.locking_script.clone(),
                    basket,
                    change,
                    purpose: if change { "change".to_owned() } else { String::new() },
                    custom_instructions: content.map(|c| c.chars().take(1000).collect()),
                    tags,
                    output_type: "custom".to_owned(),
                    provided_by: "you".to_owned(),
                },
            )
            .await?;
        internalized_count += 1;
    }

    storage_tx.commit().await?;
    Ok(IngestOutcome { parse_context: ctx, internalized_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryWalletStorage;
    use bitcoin::{Amount, ScriptBuf, Transaction};

    fn p2pkh_script(hash160: [u8; 20]) -> ScriptBuf {
        let mut bytes = vec![0x76, 0xa9, 0x14];
        bytes.extend_from_slice(&hash160);
        bytes.extend_from_slice(&[0x88, 0xac]);
        ScriptBuf::from_bytes(bytes)
    }

    fn simple_tx(value: u64, hash160: [u8; 20]) -> Transaction {
        Transaction {
            version: bitcoin::transaction::Version(1),
            lock_time: bitcoin::absolute::LockTime::ZERO,
            input: vec![],
            output: vec![bitcoin::TxOut {
                value: Amount::from_sat(value),
                script_pubkey: p2pkh_script(hash160),
            }],
        }
    }

    #[tokio::test]
    async fn ingesting_an_owned_output_inserts_transaction_and_output() {
        let hash160 = [9u8; 20];
        let owner = crate::decoders::common::hash160_address(hash160);
        let owners = OwnerSet::from_iter(vec![owner]);
        let storage = MemoryWalletStorage::new();
        let indexer = IndexerClient::new("http://localhost:0").unwrap();
        let tx = simple_tx(5000, hash160);

        let outcome = ingest_transaction(&tx, false, &owners, &storage, &indexer, vec![])
            .await
            .unwrap();

        assert_eq!(outcome.internalized_count, 1);
        assert!(storage.has_transaction(&outcome.parse_context.txid));
        assert_eq!(storage.inserted_output_count(), 1);
    }

    #[tokio::test]
    async fn reingesting_the_same_transaction_is_idempotent() {
        let hash160 = [3u8; 20];
        let owner = crate::decoders::common::hash160_address(hash160);
        let owners = OwnerSet::from_iter(vec![owner]);
        let storage = MemoryWalletStorage::new();
        let indexer = IndexerClient::new("http://localhost:0").unwrap();
        let tx = simple_tx(1000, hash160);

        ingest_transaction(&tx, false, &owners, &storage, &indexer, vec![]).await.unwrap();
        let second = ingest_transaction(&tx, false, &owners, &storage, &indexer, vec![]).await.unwrap();

        assert_eq!(second.internalized_count, 0);
        assert_eq!(storage.inserted_output_count(), 1);
    }
}
