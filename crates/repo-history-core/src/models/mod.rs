//! Data models for the import history.
//!
//! - `HistoryRecord`: one imported repository, keyed by `url`
//! - `NewRecord`: caller-supplied fields for an import
//! - `SyncState`: provisional vs. remote-assigned identity

pub mod record;

pub use record::{provisional_id, HistoryRecord, NewRecord, SyncState};
