//! Typed wrapper over the upstream indexer's HTTP+SSE endpoints (spec.md
//! §6), grounded on the teacher's `node.rs`/`wallet.rs` request builders —
//! rebuilt on `reqwest` with the 30s default deadline spec.md §5 requires
//! and `reqwest-eventsource` for the owner stream.

mod sse;
pub mod types;

pub use sse::{OwnerSyncSubscription, StreamMessage};
pub use types::*;

use crate::error::{Error, Result};
use crate::outpoint::{Outpoint, Txid};
use crate::txo::Address;
use reqwest_eventsource::EventSource;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct IndexerClient {
    http: reqwest::Client,
    base_url: String,
}

impl IndexerClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(Error::from)?;
        Ok(IndexerClient {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(self.url(path)).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.bytes().await?.to_vec())
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.http.get(self.url(path)).send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json::<T>().await?)
    }

    pub async fn beef(&self, txid: &Txid) -> Result<Vec<u8>> {
        self.get_bytes(&format!("api/beef/{}", hex::encode(txid))).await
    }

    pub async fn beef_raw(&self, txid: &Txid) -> Result<Vec<u8>> {
        self.get_bytes(&format!("api/beef/{}/raw", hex::encode(txid))).await
    }

    pub async fn beef_proof(&self, txid: &Txid) -> Result<Vec<u8>> {
        self.get_bytes(&format!("api/beef/{}/proof", hex::encode(txid))).await
    }

    pub async fn chaintracks_tip(&self) -> Result<ChainTip> {
        self.get_json("api/chaintracks/tip").await
    }

    pub async fn chaintracks_header(&self, height: u32) -> Result<ChainTip> {
        self.get_json(&format!("api/chaintracks/header/height/{height}")).await
    }

    pub async fn chaintracks_headers(&self, height: u32, count: u32) -> Result<Vec<u8>> {
        self.get_bytes(&format!("api/chaintracks/headers?height={height}&count={count}")).await
    }

    /// 404 surfaces as `Error::NotFound` — a recoverable signal for the
    /// Origin/Bsv21 decoders (spec.md §4.2, §7), not a hard failure.
    pub async fn ordfs_metadata(&self, outpoint: &Outpoint) -> Result<OrdfsMetadata> {
        self.get_json(&format!("api/ordfs/metadata/{outpoint}")).await
    }

    pub async fn ordfs_metadata_at(&self, outpoint: &Outpoint, sequence: u64) -> Result<OrdfsMetadata> {
        self.get_json(&format!("api/ordfs/metadata/{outpoint}:{sequence}")).await
    }

    pub async fn ordfs_content(&self, outpoint: &Outpoint) -> Result<ContentResponse> {
        let resp = self.http.get(self.url(&format!("content/{outpoint}"))).send().await?;
        let resp = resp.error_for_status()?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let origin = header_str(&resp, "X-Origin");
        let ord_seq = header_str(&resp, "X-Ord-Seq").and_then(|s| s.parse().ok());
        let parent = header_str(&resp, "X-Parent");
        let map = header_str(&resp, "X-Map").and_then(|s| serde_json::from_str(&s).ok());
        let bytes = resp.bytes().await?.to_vec();
        Ok(ContentResponse { content_type, bytes, origin, ord_seq, map, parent })
    }

    pub async fn bsv21_tx(&self, token_id: &str, txid: &Txid) -> Result<Bsv21TxData> {
        self.get_json(&format!("api/bsv21/{token_id}/tx/{}", hex::encode(txid))).await
    }

    pub async fn bsv21_token(&self, token_id: &str) -> Result<Bsv21TokenDetails> {
        self.get_json(&format!("api/bsv21/{token_id}")).await
    }

    pub async fn arcade_broadcast(
        &self,
        raw_tx: &[u8],
        callback_url: Option<&str>,
        callback_token: Option<&str>,
    ) -> Result<BroadcastResponse> {
        let mut req = self
            .http
            .post(self.url("api/arcade/tx"))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(raw_tx.to_vec());
        if let Some(cb) = callback_url {
            req = req.header("X-CallbackUrl", cb);
        }
        if let Some(tok) = callback_token {
            req = req.header("X-CallbackToken", tok);
        }
        let resp = req.send().await?;
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Opens the owner sync SSE subscription (spec.md §4.5 stream loop).
    pub fn owner_sync(&self, owners: &[Address], from_score: f64) -> Result<OwnerSyncSubscription> {
        let mut url = format!("{}/api/owner/sync?from={from_score}", self.base_url);
        for owner in owners {
            url.push_str(&format!("&owner={}", urlencode(&owner.0)));
        }
        let req = self.http.get(&url);
        let source = EventSource::new(req).map_err(|e| Error::Stream(e.to_string()))?;
        Ok(OwnerSyncSubscription::spawn(source))
    }
}

fn header_str(resp: &reqwest::Response, name: &str) -> Option<String> {
    resp.headers().get(name).and_then(|v| v.to_str().ok()).map(str::to_owned)
}

fn urlencode(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
