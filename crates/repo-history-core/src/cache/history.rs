use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::capacity::{sort_by_recency, CapacityGovernor};
use super::storage::LocalStorage;
use crate::error::{HistoryError, HistoryResult};
use crate::models::{HistoryRecord, NewRecord, SyncState};

/// Storage key the record set is persisted under.
pub const HISTORY_STORAGE_KEY: &str = "import-history";

/// In-memory import history mirrored to local storage.
///
/// Every method is synchronous. Mutations finish by writing the full record
/// set back to storage; write failures are logged and the in-memory state
/// stays authoritative.
pub struct HistoryCache {
    records: HashMap<String, HistoryRecord>,
    storage: Arc<dyn LocalStorage>,
    governor: CapacityGovernor,
    /// Last touch stamp handed out, so stamps strictly increase.
    last_stamp: i64,
}

impl HistoryCache {
    /// Load the persisted history. Corrupt or unreadable state yields an empty cache.
    pub fn load(storage: Arc<dyn LocalStorage>, governor: CapacityGovernor) -> Self {
        let mut cache = Self {
            records: HashMap::new(),
            storage,
            governor,
            last_stamp: 0,
        };

        match cache.read_persisted() {
            Ok(records) => {
                debug!(count = records.len(), "Loaded import history");
                cache.adopt(records, None);
            }
            Err(e) => {
                warn!(error = %e, "Discarding persisted import history");
            }
        }
        cache
    }

    fn read_persisted(&self) -> HistoryResult<Vec<HistoryRecord>> {
        match self.storage.load(HISTORY_STORAGE_KEY) {
            Ok(Some(blob)) => decode(&blob),
            Ok(None) => Ok(Vec::new()),
            Err(e) => Err(HistoryError::Storage(e)),
        }
    }

    fn persist(&self) {
        let result = encode(&self.list()).and_then(|blob| {
            self.storage
                .save(HISTORY_STORAGE_KEY, &blob)
                .map_err(HistoryError::Storage)
        });
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist import history");
        }
    }

    /// Hand out a touch stamp: wall-clock millis, bumped past the last one issued.
    fn next_stamp(&mut self) -> i64 {
        let stamp = Utc::now().timestamp_millis().max(self.last_stamp.saturating_add(1));
        self.last_stamp = stamp;
        stamp
    }

    /// Record an import of `fields.url`, merging into an existing record for that url.
    pub fn upsert_by_url(&mut self, fields: NewRecord) -> HistoryRecord {
        let stamp = self.next_stamp();
        let existing_id = self.find_by_url(&fields.url).map(|r| r.id.clone());

        if let Some(record) = existing_id.and_then(|id| self.records.get_mut(&id)) {
            record.touch(fields, stamp);
            debug!(id = %record.id, url = %record.url, "Refreshed history record");
            let record = record.clone();
            self.persist();
            return record;
        }

        let record = HistoryRecord::provisional(fields, stamp);
        debug!(id = %record.id, url = %record.url, "Created history record");
        self.records.insert(record.id.clone(), record.clone());
        self.evict_overflow();
        self.persist();
        record
    }

    /// Delete a record. Missing ids are ignored.
    pub fn remove(&mut self, id: &str) -> Option<HistoryRecord> {
        let removed = self.records.remove(id);
        if removed.is_some() {
            self.persist();
        }
        removed
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.persist();
    }

    pub fn get(&self, id: &str) -> Option<&HistoryRecord> {
        self.records.get(id)
    }

    pub fn find_by_url(&self, url: &str) -> Option<&HistoryRecord> {
        self.records.values().find(|r| r.url == url)
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<HistoryRecord> {
        let mut list: Vec<_> = self.records.values().cloned().collect();
        sort_by_recency(&mut list);
        list
    }

    pub fn list_recent(&self, limit: usize) -> Vec<HistoryRecord> {
        let mut list = self.list();
        list.truncate(limit);
        list
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Replace the whole history with the remote's records.
    pub fn replace_with_remote(&mut self, remote: Vec<HistoryRecord>) {
        self.records.clear();
        self.adopt(remote, Some(SyncState::Confirmed));
        info!(count = self.records.len(), "Replaced import history with remote records");
        self.persist();
    }

    /// Move a record from `local_id` to the identity the remote assigned.
    ///
    /// Local fields are kept. Returns `None` if `local_id` no longer resolves,
    /// e.g. because the record was removed while the create was in flight.
    pub fn confirm(&mut self, local_id: &str, remote_id: &str) -> Option<HistoryRecord> {
        let mut record = self.records.remove(local_id)?;
        record.id = remote_id.to_string();
        record.sync_state = SyncState::Confirmed;
        self.records.insert(record.id.clone(), record.clone());
        if local_id != remote_id {
            debug!(local_id, remote_id, "Re-keyed history record");
        }
        self.persist();
        Some(record)
    }

    /// Insert records without persisting, keeping only the newest per url.
    fn adopt(&mut self, records: Vec<HistoryRecord>, state: Option<SyncState>) {
        let mut by_url: HashMap<String, HistoryRecord> = HashMap::new();
        for mut record in records {
            if let Some(state) = state {
                record.sync_state = state;
            }
            let newer = by_url
                .get(&record.url)
                .map_or(true, |kept| record.timestamp > kept.timestamp);
            if newer {
                by_url.insert(record.url.clone(), record);
            } else {
                debug!(url = %record.url, "Dropping duplicate history record");
            }
        }

        for record in by_url.into_values() {
            self.last_stamp = self.last_stamp.max(record.timestamp);
            self.records.insert(record.id.clone(), record);
        }
        self.evict_overflow();
    }

    /// Drop the oldest records beyond the cap in one batch.
    fn evict_overflow(&mut self) {
        let ordered = self.list();
        let overflow = self.governor.overflow(&ordered);
        if overflow.is_empty() {
            return;
        }
        debug!(count = overflow.len(), "Evicting oldest history records");
        for record in overflow {
            self.records.remove(&record.id);
        }
    }
}

/// Parse a persisted blob: a JSON array of records.
pub fn decode(blob: &str) -> HistoryResult<Vec<HistoryRecord>> {
    Ok(serde_json::from_str(blob)?)
}

pub fn encode(records: &[HistoryRecord]) -> HistoryResult<String> {
    serde_json::to_string(records).map_err(|e| HistoryError::Storage(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::storage::MemoryStorage;
    use std::collections::HashSet;

    fn new_cache(cap: usize) -> (HistoryCache, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let cache = HistoryCache::load(storage.clone(), CapacityGovernor::new(cap));
        (cache, storage)
    }

    fn persisted(storage: &MemoryStorage) -> Vec<HistoryRecord> {
        decode(&storage.blob(HISTORY_STORAGE_KEY).unwrap()).unwrap()
    }

    #[test]
    fn test_one_record_per_url() {
        let (mut cache, _) = new_cache(50);
        for url in ["a", "b", "a", "c", "b", "a"] {
            cache.upsert_by_url(NewRecord::new(url, url));
        }

        let urls: Vec<_> = cache.list().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["a", "b", "c"]);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_upsert_same_url_keeps_identity_and_advances_timestamp() {
        let (mut cache, _) = new_cache(50);
        let first = cache.upsert_by_url(NewRecord::new("a", "a").with_branch("main"));
        let second = cache.upsert_by_url(NewRecord::new("a", "a").with_description("desc"));

        assert_eq!(first.id, second.id);
        assert!(second.timestamp > first.timestamp);
        assert_eq!(second.branch.as_deref(), Some("main"));
        assert_eq!(second.description.as_deref(), Some("desc"));
    }

    #[test]
    fn test_eviction_keeps_most_recent() {
        let (mut cache, storage) = new_cache(50);
        let inserted: Vec<_> = (0..51)
            .map(|i| cache.upsert_by_url(NewRecord::new(format!("url-{}", i), "")))
            .collect();

        assert_eq!(cache.len(), 50);
        assert!(cache.get(&inserted[0].id).is_none());
        let kept: HashSet<_> = cache.list().into_iter().map(|r| r.id).collect();
        let expected: HashSet<_> = inserted[1..].iter().map(|r| r.id.clone()).collect();
        assert_eq!(kept, expected);
        assert_eq!(persisted(&storage).len(), 50);
    }

    #[test]
    fn test_touch_protects_from_eviction() {
        let (mut cache, _) = new_cache(2);
        cache.upsert_by_url(NewRecord::new("a", ""));
        cache.upsert_by_url(NewRecord::new("b", ""));
        cache.upsert_by_url(NewRecord::new("a", ""));
        cache.upsert_by_url(NewRecord::new("c", ""));

        let urls: Vec<_> = cache.list().into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["c", "a"]);
    }

    #[test]
    fn test_remove_missing_and_double_clear() {
        let (mut cache, storage) = new_cache(50);
        cache.upsert_by_url(NewRecord::new("a", ""));

        assert!(cache.remove("does-not-exist").is_none());
        assert_eq!(cache.len(), 1);

        cache.clear();
        cache.clear();
        assert!(cache.is_empty());
        assert!(persisted(&storage).is_empty());
    }

    #[test]
    fn test_list_recent() {
        let (mut cache, _) = new_cache(50);
        for url in ["a", "b", "c", "d"] {
            cache.upsert_by_url(NewRecord::new(url, ""));
        }
        let urls: Vec<_> = cache.list_recent(2).into_iter().map(|r| r.url).collect();
        assert_eq!(urls, vec!["d", "c"]);
        assert_eq!(cache.list_recent(10).len(), 4);
    }

    #[test]
    fn test_persisted_blob_round_trips() {
        let (mut cache, storage) = new_cache(50);
        cache.upsert_by_url(
            NewRecord::new("https://github.com/a/b", "b")
                .with_description("desc")
                .with_branch("dev")
                .with_commit_hash("abc"),
        );
        cache.upsert_by_url(NewRecord::new("https://github.com/c/d", "d"));

        let reloaded = HistoryCache::load(storage.clone(), CapacityGovernor::default());
        let mut before = cache.list();
        let mut after = reloaded.list();
        before.sort_by(|a, b| a.id.cmp(&b.id));
        after.sort_by(|a, b| a.id.cmp(&b.id));
        assert_eq!(before, after);
    }

    #[test]
    fn test_corrupt_blob_resets_to_empty() {
        let storage = Arc::new(MemoryStorage::with_blob(HISTORY_STORAGE_KEY, "{not json"));
        let mut cache = HistoryCache::load(storage, CapacityGovernor::default());
        assert!(cache.is_empty());

        cache.upsert_by_url(NewRecord::new("a", ""));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stamps_continue_after_loaded_records() {
        let future = Utc::now().timestamp_millis() + 60_000;
        let blob = format!(r#"[{{"id":"srv1","url":"a","timestamp":{}}}]"#, future);
        let storage = Arc::new(MemoryStorage::with_blob(HISTORY_STORAGE_KEY, &blob));
        let mut cache = HistoryCache::load(storage, CapacityGovernor::default());

        let record = cache.upsert_by_url(NewRecord::new("b", ""));
        assert!(record.timestamp > future);
        assert_eq!(cache.list()[0].url, "b");
    }

    #[test]
    fn test_replace_with_remote_confirms_and_dedupes() {
        let (mut cache, _) = new_cache(50);
        cache.upsert_by_url(NewRecord::new("a", ""));

        let remote = vec![
            HistoryRecord { id: "srv1".into(), timestamp: 5, ..HistoryRecord::provisional(NewRecord::new("c", "c"), 5) },
            HistoryRecord { id: "srv2".into(), timestamp: 3, ..HistoryRecord::provisional(NewRecord::new("c", "old"), 3) },
        ];
        cache.replace_with_remote(remote);

        let list = cache.list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].id, "srv1");
        assert_eq!(list[0].sync_state, SyncState::Confirmed);
        assert!(cache.find_by_url("a").is_none());
    }

    #[test]
    fn test_confirm_rekeys() {
        let (mut cache, storage) = new_cache(50);
        let local = cache.upsert_by_url(NewRecord::new("a", "a"));

        let confirmed = cache.confirm(&local.id, "srv9").unwrap();
        assert_eq!(confirmed.id, "srv9");
        assert_eq!(confirmed.timestamp, local.timestamp);
        assert!(cache.get(&local.id).is_none());
        assert_eq!(cache.get("srv9").unwrap().sync_state, SyncState::Confirmed);
        assert_eq!(persisted(&storage)[0].id, "srv9");

        assert!(cache.confirm(&local.id, "srv10").is_none());
    }

    #[test]
    fn test_max_timestamp_does_not_overflow_stamps() {
        let blob = format!(r#"[{{"id":"srv1","url":"a","timestamp":{}}}]"#, i64::MAX);
        let storage = Arc::new(MemoryStorage::with_blob(HISTORY_STORAGE_KEY, &blob));
        let mut cache = HistoryCache::load(storage, CapacityGovernor::default());

        let first = cache.upsert_by_url(NewRecord::new("b", ""));
        let second = cache.upsert_by_url(NewRecord::new("c", ""));
        assert_eq!(first.timestamp, i64::MAX);
        assert_eq!(second.timestamp, i64::MAX);
        assert_eq!(cache.len(), 3);
    }

    /// Storage whose reads and writes can be made to fail.
    #[derive(Default)]
    struct FlakyStorage {
        fail_load: bool,
        fail_save: bool,
        saves: parking_lot::Mutex<usize>,
    }

    impl LocalStorage for FlakyStorage {
        fn load(&self, _key: &str) -> anyhow::Result<Option<String>> {
            if self.fail_load {
                anyhow::bail!("disk unavailable");
            }
            Ok(Some(r#"[{"id":"srv1","url":"a","timestamp":1}]"#.to_string()))
        }

        fn save(&self, _key: &str, _blob: &str) -> anyhow::Result<()> {
            *self.saves.lock() += 1;
            if self.fail_save {
                anyhow::bail!("disk full");
            }
            Ok(())
        }
    }

    #[test]
    fn test_unreadable_storage_starts_empty() {
        let storage = Arc::new(FlakyStorage { fail_load: true, ..Default::default() });
        let mut cache = HistoryCache::load(storage.clone(), CapacityGovernor::default());
        assert!(cache.is_empty());

        cache.upsert_by_url(NewRecord::new("b", "b"));
        assert_eq!(cache.len(), 1);
        assert_eq!(*storage.saves.lock(), 1);
    }

    #[test]
    fn test_failed_writes_keep_memory_authoritative() {
        let storage = Arc::new(FlakyStorage { fail_save: true, ..Default::default() });
        let mut cache = HistoryCache::load(storage.clone(), CapacityGovernor::default());
        assert_eq!(cache.get("srv1").map(|r| r.url.as_str()), Some("a"));

        let added = cache.upsert_by_url(NewRecord::new("b", "b"));
        assert_eq!(cache.list()[0].id, added.id);
        assert!(cache.remove("srv1").is_some());
        assert_eq!(cache.len(), 1);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(*storage.saves.lock(), 3);
    }

    #[test]
    fn test_codec_error_kinds() {
        let err = HistoryError::Storage(anyhow::anyhow!("disk full"));
        assert!(err.to_string().starts_with("Local storage failed"));
        let encoded = encode(&[]).unwrap();
        assert_eq!(encoded, "[]");
        assert!(matches!(decode("{"), Err(HistoryError::CorruptLocalState(_))));
    }
}
