use crate::outpoint::Outpoint;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

/// An owner address, opaque beyond equality/hashing — the decoders compare
/// it against the configured owner set but never interpret its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(pub String);

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-decoder opaque payload, tagged by decoder name (spec.md §9 design
/// note: "heterogeneous per-output data bag").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum DecoderOutput {
    Fund,
    Lock { until_height: Option<u32> },
    Inscription {
        file_hash: Option<String>,
        file_size: u64,
        file_type: Option<String>,
        fields: HashMap<String, String>,
        parent: Option<Outpoint>,
        content: Option<Vec<u8>>,
    },
    Sigma {
        address: Address,
        signature: Vec<u8>,
        vin: u32,
        valid: bool,
    },
    Map { data: HashMap<String, String> },
    Origin {
        outpoint: Outpoint,
        sequence: u64,
        nonce: u64,
        map: HashMap<String, String>,
        parent: Option<Outpoint>,
    },
    Bsv21 {
        token_id: String,
        op: Bsv21Op,
        amt: u64,
        status: Bsv21Status,
        sym: Option<String>,
        icon: Option<String>,
        dec: Option<u8>,
    },
    OrdLock { seller: Address },
    Opns { name: Option<String> },
    Cosign { primary: Address },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Bsv21Op {
    Deploy,
    Mint,
    Transfer,
    Burn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Bsv21Status {
    Valid,
    Invalid,
    Pending,
}

/// One decoder's per-output contribution, stored under `Txo.data[tag]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexData {
    pub data: DecoderOutput,
    pub tags: Vec<String>,
    pub content: Option<String>,
}

/// Everything a decoder's `parse` call can hand back and have merged into
/// the shared `Txo` (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ParseResult {
    pub data: DecoderOutput,
    pub tags: Vec<String>,
    pub owner: Option<Address>,
    pub basket: Option<String>,
    pub content: Option<String>,
    /// A second `(tag, data)` slot written directly, bypassing the
    /// owner/basket merge. The only user is Inscription, which eagerly
    /// parses an embedded MAP field and deposits it under the `map` tag
    /// (spec.md §4.2 #3 and the design note in §9) — an explicit write via
    /// the return value rather than the pipeline reaching into another
    /// decoder.
    pub extra: Option<(String, IndexData)>,
}

impl ParseResult {
    pub fn new(data: DecoderOutput) -> Self {
        ParseResult {
            data,
            tags: Vec::new(),
            owner: None,
            basket: None,
            content: None,
            extra: None,
        }
    }

    pub fn with_owner(mut self, owner: Address) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_basket(mut self, basket: &str) -> Self {
        self.basket = Some(basket.to_owned());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Per-output annotation built up across the decoder pipeline (spec.md §3).
#[derive(Debug, Clone)]
pub struct Txo {
    pub outpoint: Outpoint,
    pub locking_script: Vec<u8>,
    pub satoshis: u64,
    pub owner: Option<Address>,
    pub basket: Option<String>,
    pub data: HashMap<String, IndexData>,
}

impl Txo {
    pub fn new(outpoint: Outpoint, locking_script: Vec<u8>, satoshis: u64) -> Self {
        Txo {
            outpoint,
            locking_script,
            satoshis,
            owner: None,
            basket: None,
            data: HashMap::new(),
        }
    }

    /// Merges one decoder's `ParseResult` into this output, per the fixed
    /// evaluation order's basket/owner policy (spec.md §3: at most one
    /// basket, last writer wins, no conflicting overwrite by construction).
    pub fn apply(&mut self, tag: &str, result: ParseResult) {
        if self.owner.is_none() {
            self.owner = result.owner;
        }
        if let Some(basket) = result.basket {
            self.basket = Some(basket);
        }
        self.data.insert(
            tag.to_owned(),
            IndexData {
                data: result.data,
                tags: result.tags,
                content: result.content,
            },
        );
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.data.values().flat_map(|d| d.tags.iter().map(String::as_str))
    }
}

/// Transaction-level output of a decoder's cross-cutting `summarize` phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSummary {
    pub id: Option<String>,
    pub amount: Option<i64>,
    pub icon: Option<String>,
    pub data: Option<serde_json::Value>,
}
