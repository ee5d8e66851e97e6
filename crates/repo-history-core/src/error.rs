use thiserror::Error;

/// Failures inside the history store.
///
/// None of these cross the store's public API: remote failures are logged and
/// retried on the next session or mutation, corrupt local state resets the
/// cache, and storage write failures leave the in-memory cache authoritative.
#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Remote history unavailable: {0:#}")]
    TransientRemote(#[source] anyhow::Error),

    #[error("Persisted history is corrupt: {0}")]
    CorruptLocalState(#[from] serde_json::Error),

    #[error("Local storage failed: {0:#}")]
    Storage(#[source] anyhow::Error),
}

pub type HistoryResult<T> = std::result::Result<T, HistoryError>;
