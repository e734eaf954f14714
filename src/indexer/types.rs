use crate::outpoint::Outpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct ChainTip {
    pub height: u32,
    pub hash: String,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdfsMetadata {
    pub outpoint: String,
    pub origin: Option<String>,
    pub sequence: u64,
    #[serde(rename = "contentType")]
    pub content_type: Option<String>,
    #[serde(rename = "contentLength")]
    pub content_length: Option<u64>,
    pub parent: Option<String>,
    pub map: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone)]
pub struct ContentResponse {
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    pub origin: Option<String>,
    pub ord_seq: Option<u64>,
    pub map: Option<HashMap<String, String>>,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bsv21TxInput {
    pub outpoint: String,
    pub amt: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bsv21TxOutput {
    pub vout: u32,
    pub amt: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bsv21TxData {
    #[serde(default)]
    pub inputs: Vec<Bsv21TxInput>,
    #[serde(default)]
    pub outputs: Vec<Bsv21TxOutput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Bsv21TokenDetails {
    pub sym: Option<String>,
    pub icon: Option<String>,
    pub dec: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxStatus {
    Unknown,
    Received,
    SentToNetwork,
    AcceptedByNetwork,
    SeenOnNetwork,
    DoubleSpendAttempted,
    Rejected,
    Mined,
    Immutable,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResponse {
    pub txid: String,
    #[serde(rename = "txStatus")]
    pub tx_status: TxStatus,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<String>,
    #[serde(rename = "blockHeight")]
    pub block_height: Option<u32>,
    #[serde(rename = "merklePath")]
    pub merkle_path: Option<String>,
    #[serde(rename = "extraInfo")]
    pub extra_info: Option<String>,
}

/// One event delivered over the owner SSE subscription (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
pub struct SyncOutputEvent {
    pub outpoint: String,
    pub score: f64,
    #[serde(rename = "spendTxid")]
    pub spend_txid: Option<String>,
}

impl SyncOutputEvent {
    pub fn parsed_outpoint(&self) -> crate::error::Result<Outpoint> {
        Outpoint::from_string(&self.outpoint)
    }
}
