//! Environment-loaded configuration (SPEC_FULL.md §4.9), mirroring the
//! teacher's `main.rs` `env::var(...).expect(...)` bootstrap but packaged as
//! a reusable struct instead of inlined globals.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Sled,
    Sqlite,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub indexer_url: String,
    pub sync_batch_size: usize,
    pub queue_backend: QueueBackend,
    pub queue_path: String,
}

impl Config {
    /// Reads `INDEXER_URL`, `SYNC_BATCH_SIZE` (default 20),
    /// `SYNC_QUEUE_BACKEND` (`sled` | `sqlite`), `SYNC_QUEUE_PATH` — loading
    /// a `.env` file first via `dotenvy`, if one is present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let indexer_url = std::env::var("INDEXER_URL")
            .map_err(|_| Error::Storage("INDEXER_URL is not set".into()))?;

        let sync_batch_size = match std::env::var("SYNC_BATCH_SIZE") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| Error::Storage(format!("SYNC_BATCH_SIZE is not a valid integer: {raw}")))?,
            Err(_) => 20,
        };

        let queue_backend = match std::env::var("SYNC_QUEUE_BACKEND").as_deref() {
            Ok("sqlite") => QueueBackend::Sqlite,
            Ok("sled") | Err(_) => QueueBackend::Sled,
            Ok(other) => {
                return Err(Error::Storage(format!("unknown SYNC_QUEUE_BACKEND: {other}")));
            }
        };

        let queue_path = std::env::var("SYNC_QUEUE_PATH")
            .map_err(|_| Error::Storage("SYNC_QUEUE_PATH is not set".into()))?;

        Ok(Config { indexer_url, sync_batch_size, queue_backend, queue_path })
    }
}
