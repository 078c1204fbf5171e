use thiserror::Error;

use super::response::HttpErrorResponse;

/// Failure reported by a [`StateStore`](super::StateStore) write or removal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("failed to write transfer-state key `{key}`: {message}")]
    Write { key: String, message: String },
    #[error("failed to remove transfer-state key `{key}`: {message}")]
    Remove { key: String, message: String },
}

impl StoreError {
    pub fn write(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn remove(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remove {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Violations of the producer/consumer handoff protocol.
///
/// None of these are retried: they mean the two render passes disagree about
/// which requests were issued, which is a rendering bug upstream.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("missing header `{header}` value inside request to generate state key")]
    MissingKeyHeader { header: String },
    #[error("cannot rewrite url `{url}` for key generation: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("request `{fingerprint}` already stored in server state data")]
    DuplicateFingerprint { fingerprint: String },
    #[error("request `{fingerprint}` missing in server state data")]
    RequestNotInLedger { fingerprint: String },
    #[error("request id {id} exceeds server state last id {last_id}")]
    SequenceOverrun { id: u64, last_id: u64 },
    #[error("missing server state last id")]
    MissingLastId,
    #[error("missing server state data")]
    MissingLedger,
    #[error("transfer-state key `{key}` holds an unreadable value: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached snapshot `{key}` carries invalid status {status}")]
    InvalidSnapshot { key: String, status: u16 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CacheError {
    pub fn decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            key: key.into(),
            source,
        }
    }
}

/// Terminal failure of an intercepted request.
#[derive(Debug, Error)]
pub enum InterceptError {
    /// Failure produced by the transport, or replayed from a cached failure
    /// snapshot; forwarded unchanged.
    #[error("http request failed with status {}: {}", .0.status, .0.status_text)]
    Http(HttpErrorResponse),
    /// The cache protocol itself failed for this request.
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("transport completed without a response")]
    NoResponse,
}

impl From<HttpErrorResponse> for InterceptError {
    fn from(error: HttpErrorResponse) -> Self {
        Self::Http(error)
    }
}
