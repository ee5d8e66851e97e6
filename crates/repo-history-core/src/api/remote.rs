use anyhow::Result;
use async_trait::async_trait;

use crate::models::{HistoryRecord, NewRecord};

/// The authoritative history kept by the backend.
///
/// Implementations assign identities on create; creating a url that already
/// exists returns the existing record instead of a duplicate.
#[async_trait]
pub trait RemoteHistory: Send + Sync {
    /// Fetch every record the backend holds for the current user.
    async fn fetch_history(&self) -> Result<Vec<HistoryRecord>>;

    /// Create a record, or return the existing one for the same url.
    async fn create_record(&self, record: &NewRecord) -> Result<HistoryRecord>;

    async fn delete_record(&self, id: &str) -> Result<()>;

    async fn clear_all(&self) -> Result<()>;
}
