use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::AuthOracle;

/// Session file name in cache directory
const SESSION_FILE: &str = "session.json";

/// Token expiry time in hours.
const TOKEN_EXPIRY_HOURS: i64 = 12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub token: String,
    #[serde(default)]
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionData {
    pub fn new(token: impl Into<String>, username: Option<String>) -> Self {
        Self {
            token: token.into(),
            username,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::hours(TOKEN_EXPIRY_HOURS)
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self) -> i64 {
        (self.expires_at() - Utc::now()).num_minutes().max(0)
    }
}

/// A saved login. Shared with the history store as its `AuthOracle`.
pub struct Session {
    cache_dir: PathBuf,
    data: RwLock<Option<SessionData>>,
}

impl Session {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            data: RwLock::new(None),
        }
    }

    /// Load session from disk. Returns whether a valid session was found.
    pub fn load(&self) -> Result<bool> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(false);
        }

        let contents = std::fs::read_to_string(&path).context("Failed to read session file")?;
        let data: SessionData =
            serde_json::from_str(&contents).context("Failed to parse session file")?;

        if data.is_expired() {
            debug!("Saved session has expired");
            return Ok(false);
        }
        *self.data.write() = Some(data);
        Ok(true)
    }

    /// Save session to disk
    pub fn save(&self) -> Result<()> {
        if let Some(ref data) = *self.data.read() {
            let path = self.session_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let contents = serde_json::to_string_pretty(data)?;
            std::fs::write(path, contents)?;
        }
        Ok(())
    }

    /// Clear session data
    pub fn clear(&self) -> Result<()> {
        *self.data.write() = None;
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Update session with new data
    pub fn update(&self, data: SessionData) {
        *self.data.write() = Some(data);
    }

    pub fn data(&self) -> Option<SessionData> {
        self.data.read().clone()
    }

    /// Get the bearer token if session is valid
    pub fn token(&self) -> Option<String> {
        self.data
            .read()
            .as_ref()
            .filter(|d| !d.is_expired())
            .map(|d| d.token.clone())
    }

    /// Check if session is valid (exists and not expired)
    pub fn is_valid(&self) -> bool {
        self.data.read().as_ref().map(|d| !d.is_expired()).unwrap_or(false)
    }

    fn session_path(&self) -> PathBuf {
        self.cache_dir.join(SESSION_FILE)
    }
}

impl AuthOracle for Session {
    fn is_authenticated(&self) -> bool {
        self.is_valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        assert!(!session.load().unwrap());
        assert!(!session.is_authenticated());

        session.update(SessionData::new("tok", Some("me".to_string())));
        session.save().unwrap();

        let reloaded = Session::new(dir.path().to_path_buf());
        assert!(reloaded.load().unwrap());
        assert!(reloaded.is_authenticated());
        assert_eq!(reloaded.token().as_deref(), Some("tok"));

        reloaded.clear().unwrap();
        assert!(!reloaded.is_authenticated());
        assert!(!dir.path().join(SESSION_FILE).exists());
    }

    #[test]
    fn test_expired_session_is_not_authenticated() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(dir.path().to_path_buf());
        let mut data = SessionData::new("tok", None);
        data.created_at = Utc::now() - Duration::hours(TOKEN_EXPIRY_HOURS + 1);
        assert!(data.is_expired());
        assert_eq!(data.minutes_until_expiry(), 0);

        session.update(data);
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());

        session.save().unwrap();
        assert!(!Session::new(dir.path().to_path_buf()).load().unwrap());
    }
}
