use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::debug;

/// Durable key/blob storage used to mirror the history cache.
///
/// Calls are synchronous; the cache persists inside its own critical section.
pub trait LocalStorage: Send + Sync {
    /// Read the blob stored under `key`, or `None` if nothing was saved.
    fn load(&self, key: &str) -> Result<Option<String>>;

    /// Replace the blob stored under `key`.
    fn save(&self, key: &str, blob: &str) -> Result<()>;
}

/// Stores each key as `<key>.json` inside a directory.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl LocalStorage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read storage file: {}", key))?;
        Ok(Some(contents))
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        let path = self.path(key);
        // Write to a sibling file first so a crash never leaves a half-written blob
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, blob)
            .with_context(|| format!("Failed to write storage file: {}", key))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace storage file: {}", key))?;
        debug!(key, bytes = blob.len(), "Saved storage blob");
        Ok(())
    }
}

/// In-process storage. Nothing survives the process.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob, e.g. to simulate state left by a previous session.
    pub fn with_blob(key: &str, blob: &str) -> Self {
        let storage = Self::default();
        storage.blobs.lock().insert(key.to_string(), blob.to_string());
        storage
    }

    pub fn blob(&self, key: &str) -> Option<String> {
        self.blobs.lock().get(key).cloned()
    }
}

impl LocalStorage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.blob(key))
    }

    fn save(&self, key: &str, blob: &str) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), blob.to_string());
        Ok(())
    }
}
