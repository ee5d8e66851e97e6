//! REST API module for the backend import history.
//!
//! `RemoteHistory` is the seam the store talks through; `ApiClient` is the
//! reqwest-based implementation. Requests carry a bearer token taken from
//! the saved session.

pub mod client;
pub mod error;
pub mod remote;

pub use client::ApiClient;
pub use error::ApiError;
pub use remote::RemoteHistory;
