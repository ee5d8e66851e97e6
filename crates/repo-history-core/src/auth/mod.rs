//! Authentication module.
//!
//! This module provides:
//! - `AuthOracle`: the question the history store asks before touching the remote
//! - `Session`: a saved bearer token with expiry, persisted to disk
//! - `AuthFlag`: a toggle for embedders that track login state themselves
//!
//! Acquiring tokens is left to the embedding application.

pub mod session;

use std::sync::atomic::{AtomicBool, Ordering};

pub use session::{Session, SessionData};

/// Answers whether remote calls may be attempted right now.
pub trait AuthOracle: Send + Sync {
    fn is_authenticated(&self) -> bool;
}

/// Login state set directly by the embedding application.
#[derive(Debug, Default)]
pub struct AuthFlag(AtomicBool);

impl AuthFlag {
    pub fn new(authenticated: bool) -> Self {
        Self(AtomicBool::new(authenticated))
    }

    pub fn set(&self, authenticated: bool) {
        self.0.store(authenticated, Ordering::SeqCst);
    }
}

impl AuthOracle for AuthFlag {
    fn is_authenticated(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_flag_toggles() {
        let flag = AuthFlag::default();
        assert!(!flag.is_authenticated());
        flag.set(true);
        assert!(flag.is_authenticated());
    }
}
