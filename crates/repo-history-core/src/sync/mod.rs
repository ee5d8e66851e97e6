//! Reconciliation of the local import history with the remote history.
//!
//! - `HistoryStore`: the public handle used by front ends
//! - `PropagationQueue`: ordered background delivery of local mutations
//! - `SyncActivity`: the observable "syncing" flag

pub mod activity;
pub mod queue;
pub mod store;

pub use activity::{ActivityGuard, SyncActivity};
pub use queue::{Mutation, MutationHandler, PropagationQueue};
pub use store::HistoryStore;
