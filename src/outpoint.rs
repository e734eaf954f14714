use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 32-byte transaction id, rendered/parsed as 64 lowercase hex chars.
pub type Txid = [u8; 32];

/// Identifies a single output of a single transaction: `(txid, vout)`.
///
/// Canonical string form is `"<64 hex>_<decimal vout>"`, matching the wire
/// encoding the indexer uses for queue items (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Outpoint {
    pub txid: Txid,
    pub vout: u32,
}

impl Outpoint {
    pub fn from_pair(txid: Txid, vout: u32) -> Self {
        Outpoint { txid, vout }
    }

    pub fn from_string(s: &str) -> Result<Self, Error> {
        let (txid_hex, vout_str) = s
            .split_once('_')
            .ok_or_else(|| Error::MalformedOutpoint(s.to_owned()))?;

        if txid_hex.len() != 64 || !txid_hex.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
            return Err(Error::MalformedOutpoint(s.to_owned()));
        }
        let txid_bytes = hex::decode(txid_hex).map_err(|_| Error::MalformedOutpoint(s.to_owned()))?;
        let mut txid = [0u8; 32];
        txid.copy_from_slice(&txid_bytes);

        let vout: u32 = vout_str
            .parse()
            .map_err(|_| Error::MalformedOutpoint(s.to_owned()))?;

        Ok(Outpoint { txid, vout })
    }

    pub fn txid_hex(&self) -> String {
        hex::encode(self.txid)
    }

    pub fn to_big_endian_bytes(&self) -> Vec<u8> {
        let mut be = self.txid.to_vec();
        be.reverse();
        be.extend_from_slice(&self.vout.to_le_bytes());
        be
    }
}

impl fmt::Display for Outpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.txid_hex(), self.vout)
    }
}

impl std::str::FromStr for Outpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Outpoint::from_string(s)
    }
}

impl TryFrom<String> for Outpoint {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Outpoint::from_string(&s)
    }
}

impl From<Outpoint> for String {
    fn from(o: Outpoint) -> Self {
        o.to_string()
    }
}
