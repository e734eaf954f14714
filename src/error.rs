use tracing::error;

/// Error taxonomy for the sync engine. `NotFound` is a recoverable domain
/// signal for decoders (404 from the indexer means "absent", not "broken")
/// and must never be logged at error level; see the decoder `summarize`
/// implementations for how it gets absorbed.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed outpoint: {0}")]
    MalformedOutpoint(String),

    #[error("malformed script: {0}")]
    MalformedScript(String),

    #[error("not found")]
    NotFound,

    #[error("http error {status}: {message}")]
    Http { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("verification failure: {0}")]
    VerificationFailure(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            if status.as_u16() == 404 {
                return Error::NotFound;
            }
            return Error::Http {
                status: status.as_u16(),
                message: e.to_string(),
            };
        }
        Error::Network(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(format!("json decode: {e}"))
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(format!("sled: {e}"))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(format!("sqlite: {e}"))
    }
}

/// Logs an error at the appropriate level. `NotFound` is domain data and
/// only traced at debug; everything else is a real failure.
pub fn log_absorbed(context: &str, err: &Error) {
    match err {
        Error::NotFound => tracing::debug!(context, "absorbed 404"),
        other => error!(context, error = %other, "unexpected error"),
    }
}

pub type Result<T> = std::result::Result<T, Error>;
