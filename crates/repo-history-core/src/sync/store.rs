//! The import history store.
//!
//! `HistoryStore` composes the local cache, the reconciler and the
//! propagation queue behind one cheaply clonable handle. Reads and mutations
//! are synchronous and always see the latest local state; remote work happens
//! in the background and never fails a caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::activity::SyncActivity;
use super::queue::{Mutation, MutationHandler, PropagationQueue};
use crate::api::RemoteHistory;
use crate::auth::AuthOracle;
use crate::cache::{CapacityGovernor, HistoryCache, LocalStorage};
use crate::error::HistoryError;
use crate::models::{HistoryRecord, NewRecord};

/// Provisional id -> id the remote assigned, for work queued before the re-key.
///
/// An alias lives only while queued mutations still name its provisional id.
#[derive(Default)]
struct AliasTable {
    remote_ids: HashMap<String, String>,
    /// Queued mutations per id they were submitted with.
    queued: HashMap<String, usize>,
}

impl AliasTable {
    fn hold(&mut self, id: &str) {
        *self.queued.entry(id.to_string()).or_default() += 1;
    }

    /// A mutation for `id` finished; forget the alias once nothing else needs it.
    fn release(&mut self, id: &str) {
        if let Some(count) = self.queued.get_mut(id) {
            *count -= 1;
            if *count > 0 {
                return;
            }
            self.queued.remove(id);
        }
        self.remote_ids.remove(id);
    }

    fn resolve(&self, id: &str) -> Option<&str> {
        self.remote_ids.get(id).map(String::as_str)
    }

    fn record(&mut self, local_id: &str, remote_id: &str) {
        if local_id != remote_id && self.queued.contains_key(local_id) {
            self.remote_ids.insert(local_id.to_string(), remote_id.to_string());
        }
    }

    fn clear(&mut self) {
        self.remote_ids.clear();
    }
}

/// State shared between the store handle and its background work.
struct Shared {
    cache: Mutex<HistoryCache>,
    remote: Arc<dyn RemoteHistory>,
    auth: Arc<dyn AuthOracle>,
    /// Locked after `cache` when both are held.
    aliases: Mutex<AliasTable>,
    activity: SyncActivity,
    snapshot: watch::Sender<Vec<HistoryRecord>>,
    initialized: AtomicBool,
}

impl Shared {
    /// Run a mutation against the cache and publish the new snapshot.
    fn with_cache<T>(&self, f: impl FnOnce(&mut HistoryCache) -> T) -> T {
        let mut cache = self.cache.lock();
        let result = f(&mut cache);
        self.snapshot.send_replace(cache.list());
        result
    }

    /// Record the remote identity for `local_id` and re-key the local record.
    ///
    /// Returns false if the record is no longer in the cache.
    fn confirm_created(&self, local_id: &str, created: &HistoryRecord) -> bool {
        self.with_cache(|cache| {
            let mut aliases = self.aliases.lock();
            let current = aliases.resolve(local_id).unwrap_or(local_id).to_string();
            aliases.record(local_id, &created.id);
            cache.confirm(&current, &created.id).is_some()
        })
    }

    /// The remote id to delete for a locally removed record, if it ever got one.
    fn remote_id_for(&self, id: &str, confirmed: bool) -> Option<String> {
        if confirmed {
            return Some(id.to_string());
        }
        self.aliases.lock().resolve(id).map(str::to_string)
    }

    async fn create(&self, id: &str, record: &NewRecord) {
        match self.remote.create_record(record).await {
            Ok(created) => {
                if !self.confirm_created(id, &created) {
                    debug!(id, url = %record.url, "Record left the cache before the remote confirmed it");
                }
            }
            Err(e) => {
                let e = HistoryError::TransientRemote(e);
                warn!(url = %record.url, error = %e, "Failed to add record to remote history");
            }
        }
    }

    async fn delete(&self, id: &str, url: &str, confirmed: bool) {
        let Some(remote_id) = self.remote_id_for(id, confirmed) else {
            debug!(id, url, "Record never reached the remote, nothing to delete");
            return;
        };
        if let Err(e) = self.remote.delete_record(&remote_id).await {
            let e = HistoryError::TransientRemote(e);
            warn!(id = %remote_id, error = %e, "Failed to delete record from remote history");
        }
    }
}

#[async_trait]
impl MutationHandler for Shared {
    async fn apply(&self, mutation: Mutation) {
        match mutation {
            Mutation::Add { id, record } => {
                self.create(&id, &record).await;
                self.aliases.lock().release(&id);
            }
            Mutation::Remove { id, url, confirmed } => {
                self.delete(&id, &url, confirmed).await;
                self.aliases.lock().release(&id);
            }
            Mutation::Clear => {
                if let Err(e) = self.remote.clear_all().await {
                    let e = HistoryError::TransientRemote(e);
                    warn!(error = %e, "Failed to clear remote history");
                }
            }
        }
    }
}

/// Local-first import history, reconciled with the remote history when
/// the user is authenticated.
///
/// Create one per application and clone the handle to share it.
#[derive(Clone)]
pub struct HistoryStore {
    shared: Arc<Shared>,
    queue: PropagationQueue,
}

impl HistoryStore {
    /// Load the persisted history and start the propagation queue.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        storage: Arc<dyn LocalStorage>,
        remote: Arc<dyn RemoteHistory>,
        auth: Arc<dyn AuthOracle>,
        governor: CapacityGovernor,
    ) -> Self {
        let cache = HistoryCache::load(storage, governor);
        let (snapshot, _rx) = watch::channel(cache.list());
        let activity = SyncActivity::new();

        let shared = Arc::new(Shared {
            cache: Mutex::new(cache),
            remote,
            auth,
            aliases: Mutex::new(AliasTable::default()),
            activity: activity.clone(),
            snapshot,
            initialized: AtomicBool::new(false),
        });
        let queue = PropagationQueue::spawn(Arc::clone(&shared), activity);

        Self { shared, queue }
    }

    // ===== Reads =====

    pub fn get(&self, id: &str) -> Option<HistoryRecord> {
        self.shared.cache.lock().get(id).cloned()
    }

    pub fn find_by_url(&self, url: &str) -> Option<HistoryRecord> {
        self.shared.cache.lock().find_by_url(url).cloned()
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<HistoryRecord> {
        self.shared.cache.lock().list()
    }

    pub fn list_recent(&self, limit: usize) -> Vec<HistoryRecord> {
        self.shared.cache.lock().list_recent(limit)
    }

    pub fn len(&self) -> usize {
        self.shared.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.cache.lock().is_empty()
    }

    /// Watch the recency-ordered record list.
    pub fn subscribe(&self) -> watch::Receiver<Vec<HistoryRecord>> {
        self.shared.snapshot.subscribe()
    }

    /// Watch whether reconciliation or propagation is in flight.
    pub fn syncing(&self) -> watch::Receiver<bool> {
        self.shared.activity.subscribe()
    }

    pub fn is_syncing(&self) -> bool {
        self.shared.activity.is_active()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    // ===== Mutations =====

    /// Record an import. The returned record is already in the cache; the
    /// remote hears about it in the background.
    pub fn add_repository(&self, fields: NewRecord) -> HistoryRecord {
        let propagate = self.should_propagate();
        let record = self.shared.with_cache(|cache| {
            let record = cache.upsert_by_url(fields);
            // Held under the cache lock so a concurrent re-key still records the alias
            if propagate {
                self.shared.aliases.lock().hold(&record.id);
            }
            record
        });
        if propagate {
            self.queue.submit(Mutation::Add {
                id: record.id.clone(),
                record: record.to_new_record(),
            });
        }
        record
    }

    /// Remove a record by id. Unknown ids are ignored.
    pub fn remove(&self, id: &str) {
        let propagate = self.should_propagate();
        let removed = self.shared.with_cache(|cache| {
            let removed = cache.remove(id);
            if let (true, Some(record)) = (propagate, &removed) {
                self.shared.aliases.lock().hold(&record.id);
            }
            removed
        });
        let Some(removed) = removed else {
            debug!(id, "No history record to remove");
            return;
        };
        if propagate {
            self.queue.submit(Mutation::Remove {
                confirmed: !removed.is_pending(),
                id: removed.id,
                url: removed.url,
            });
        }
    }

    pub fn clear(&self) {
        self.shared.with_cache(|cache| cache.clear());
        if self.should_propagate() {
            self.queue.submit(Mutation::Clear);
        }
    }

    fn should_propagate(&self) -> bool {
        let authenticated = self.shared.auth.is_authenticated();
        if !authenticated {
            debug!("Not authenticated, keeping mutation local");
        }
        authenticated
    }

    /// Wait for every mutation submitted so far to reach the remote (or fail).
    pub async fn flush(&self) {
        self.queue.flush().await;
    }

    // ===== Reconciliation =====

    /// Reconcile with the remote once per session, if authenticated.
    pub async fn initialize(&self) {
        if self.is_initialized() {
            return;
        }
        if !self.shared.auth.is_authenticated() {
            debug!("Not authenticated, skipping history reconciliation");
            return;
        }
        // Set before the network call so a failed sync is not retried this session
        if self.shared.initialized.swap(true, Ordering::SeqCst) {
            return;
        }
        self.sync_with_remote().await;
    }

    /// Forget that this session reconciled, e.g. after signing out, so the
    /// next `initialize` runs again.
    pub fn reset_session(&self) {
        self.shared.initialized.store(false, Ordering::SeqCst);
        self.shared.aliases.lock().clear();
    }

    /// Reconcile the local cache with the remote history.
    ///
    /// A non-empty remote replaces the local cache outright, discarding
    /// records that only existed locally. An empty remote is seeded from the
    /// local records, oldest last.
    pub async fn sync_with_remote(&self) {
        let _syncing = self.shared.activity.begin();

        let remote = match self.shared.remote.fetch_history().await {
            Ok(records) => records,
            Err(e) => {
                let e = HistoryError::TransientRemote(e);
                warn!(error = %e, "Failed to fetch remote history, staying local");
                return;
            }
        };

        if !remote.is_empty() {
            let discarded = self.shared.with_cache(|cache| {
                let local_only = cache.list().iter().filter(|r| r.is_pending()).count();
                cache.replace_with_remote(remote);
                local_only
            });
            self.shared.aliases.lock().clear();
            if discarded > 0 {
                info!(discarded, "Discarded local-only records in favor of remote history");
            }
            return;
        }

        let local = self.list();
        if local.is_empty() {
            debug!("Local and remote history are both empty");
            return;
        }

        info!(count = local.len(), "Seeding remote history from local records");
        for record in local {
            let created = match self.shared.remote.create_record(&record.to_new_record()).await {
                Ok(created) => created,
                Err(e) => {
                    let e = HistoryError::TransientRemote(e);
                    warn!(url = %record.url, error = %e, "Failed to seed record, continuing");
                    continue;
                }
            };

            if !self.shared.confirm_created(&record.id, &created) {
                // Removed locally while the create was in flight
                if let Err(e) = self.shared.remote.delete_record(&created.id).await {
                    warn!(id = %created.id, error = %e, "Failed to delete seeded record");
                }
            }
        }
    }
}
