//! Local caching module for the import history.
//!
//! The `HistoryCache` keeps the history in memory and mirrors it to a
//! `LocalStorage` backend as a JSON array of records. The
//! `CapacityGovernor` bounds how many records are kept, evicting the
//! least recently touched ones first.

pub mod capacity;
pub mod history;
pub mod storage;

pub use capacity::{CapacityGovernor, DEFAULT_MAX_ENTRIES};
pub use history::{HistoryCache, HISTORY_STORAGE_KEY};
pub use storage::{FileStorage, LocalStorage, MemoryStorage};
