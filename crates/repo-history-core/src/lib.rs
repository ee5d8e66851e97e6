//! repo-history core library.
//!
//! A local-first history of imported repositories. The history lives in an
//! in-memory cache mirrored to local storage, and is reconciled with a
//! remote history whenever the user is authenticated.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use repo_history_core::{
//!     ApiClient, CapacityGovernor, FileStorage, HistoryStore, NewRecord, Session,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let session = Arc::new(Session::new("/tmp/repo-history".into()));
//! session.load()?;
//! let mut api = ApiClient::new("https://example.com/api")?;
//! if let Some(token) = session.token() {
//!     api.set_token(token);
//! }
//!
//! let store = HistoryStore::new(
//!     Arc::new(FileStorage::new("/tmp/repo-history".into())?),
//!     Arc::new(api),
//!     session,
//!     CapacityGovernor::default(),
//! );
//! store.initialize().await;
//! store.add_repository(NewRecord::new("https://github.com/rust-lang/rust", "rust"));
//! store.flush().await;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod sync;
pub mod utils;

pub use api::{ApiClient, ApiError, RemoteHistory};
pub use auth::{AuthFlag, AuthOracle, Session, SessionData};
pub use cache::{CapacityGovernor, FileStorage, HistoryCache, LocalStorage, MemoryStorage};
pub use config::Config;
pub use error::HistoryError;
pub use models::{HistoryRecord, NewRecord, SyncState};
pub use sync::HistoryStore;
