//! The parser pipeline (spec.md §4.3): a fixed, ordered set of decoders run
//! against every output and input of a transaction, followed by a
//! cross-cutting summarize phase.

use crate::error::Result;
use crate::indexer::IndexerClient;
use crate::outpoint::{Outpoint, Txid};
use crate::owners::OwnerSet;
use crate::storage::WalletStorage;
use crate::txo::{IndexSummary, Txo};
use async_trait::async_trait;
use std::collections::HashMap;

/// A protocol decoder (spec.md §4.2). `parse` is pure and synchronous —
/// decoders never perform I/O while classifying a single output. `summarize`
/// runs once per transaction, after every output has been parsed, and may
/// perform indexer I/O to resolve cross-output questions (chain of
/// ownership, token balances, signature validity).
#[async_trait]
pub trait Decoder: Send + Sync {
    fn tag(&self) -> &'static str;

    fn parse(&self, script: &[u8], satoshis: u64, owners: &OwnerSet) -> Option<crate::txo::ParseResult>;

    async fn summarize(
        &self,
        _ctx: &mut ParseContext,
        _is_broadcast: bool,
        _indexer: &IndexerClient,
        _owners: &OwnerSet,
    ) -> Result<Option<IndexSummary>> {
        Ok(None)
    }
}

/// Per-transaction working set threaded through the pipeline (spec.md §3).
pub struct ParseContext {
    pub tx: bitcoin::Transaction,
    pub txid: Txid,
    pub txos: Vec<Txo>,
    pub spends: Vec<Txo>,
    pub summary: HashMap<String, IndexSummary>,
}

impl ParseContext {
    pub fn txo_at(&self, vout: u32) -> Option<&Txo> {
        self.txos.get(vout as usize)
    }

    pub fn txo_at_mut(&mut self, vout: u32) -> Option<&mut Txo> {
        self.txos.get_mut(vout as usize)
    }
}

fn bitcoin_txid_bytes(txid: &bitcoin::Txid) -> Txid {
    let mut bytes: Txid = *AsRef::<[u8; 32]>::as_ref(txid);
    bytes.reverse();
    bytes
}

/// Loads the transaction a source outpoint belongs to: storage first, then
/// the `beef` endpoint — one level deep only (spec.md §4.3 step 1).
async fn load_source_transaction(
    txid: &Txid,
    storage: &dyn WalletStorage,
    indexer: &IndexerClient,
) -> Result<bitcoin::Transaction> {
    let raw = match storage.find_raw_transaction(txid).await? {
        Some(bytes) => bytes,
        None => indexer.beef_raw(txid).await?,
    };
    bitcoin::consensus::deserialize(&raw)
        .map_err(|e| crate::error::Error::MalformedScript(format!("source tx decode: {e}")))
}

/// Runs every decoder's `parse` against a single fresh output, as used both
/// for a transaction's own outputs and for the outputs its inputs spend.
fn parse_output(decoders: &[Box<dyn Decoder>], mut txo: Txo, owners: &OwnerSet) -> Txo {
    for decoder in decoders {
        if let Some(result) = decoder.parse(&txo.locking_script, txo.satoshis, owners) {
            if let Some((extra_tag, extra_data)) = result.extra.clone() {
                txo.data.insert(extra_tag, extra_data);
            }
            txo.apply(decoder.tag(), result);
        }
    }
    txo
}

/// Runs the full pipeline against `tx` (spec.md §4.3).
pub async fn parse_transaction(
    tx: &bitcoin::Transaction,
    is_broadcast: bool,
    owners: &OwnerSet,
    storage: &dyn WalletStorage,
    indexer: &IndexerClient,
    decoders: &[Box<dyn Decoder>],
) -> Result<ParseContext> {
    let txid = bitcoin_txid_bytes(&tx.compute_txid());

    // Step 1 + 3: hydrate each input's source output and run parse on it.
    let mut source_cache: HashMap<Txid, bitcoin::Transaction> = HashMap::new();
    let mut spends = Vec::with_capacity(tx.input.len());
    for input in &tx.input {
        let source_txid = bitcoin_txid_bytes(&input.previous_output.txid);
        if !source_cache.contains_key(&source_txid) {
            let source_tx = load_source_transaction(&source_txid, storage, indexer).await?;
            source_cache.insert(source_txid, source_tx);
        }
        let source_tx = &source_cache[&source_txid];
        let vout = input.previous_output.vout;
        let source_output = source_tx
            .output
            .get(vout as usize)
            .ok_or_else(|| crate::error::Error::MalformedScript("input points past source outputs".into()))?;
        let outpoint = Outpoint::from_pair(source_txid, vout);
        let fresh = Txo::new(outpoint, source_output.script_pubkey.to_bytes(), source_output.value.to_sat());
        spends.push(parse_output(decoders, fresh, owners));
    }

    // Step 2 + 4: build and parse this transaction's own outputs.
    let mut txos = Vec::with_capacity(tx.output.len());
    for (vout, output) in tx.output.iter().enumerate() {
        let outpoint = Outpoint::from_pair(txid, vout as u32);
        let fresh = Txo::new(outpoint, output.script_pubkey.to_bytes(), output.value.to_sat());
        txos.push(parse_output(decoders, fresh, owners));
    }

    let mut ctx = ParseContext { tx: tx.clone(), txid, txos, spends, summary: HashMap::new() };

    // Step 5: cross-cutting summarize, strictly after all parse calls.
    for decoder in decoders {
        if let Some(summary) = decoder.summarize(&mut ctx, is_broadcast, indexer, owners).await? {
            ctx.summary.insert(decoder.tag().to_owned(), summary);
        }
    }

    Ok(ctx)
}
