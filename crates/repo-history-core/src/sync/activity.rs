use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Tracks in-flight remote work and publishes whether any is running.
///
/// The published flag is the store's `syncing` state.
#[derive(Clone)]
pub struct SyncActivity {
    inflight: Arc<AtomicUsize>,
    tx: Arc<watch::Sender<bool>>,
}

impl Default for SyncActivity {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncActivity {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inflight: Arc::new(AtomicUsize::new(0)),
            tx: Arc::new(tx),
        }
    }

    /// Mark work as started. The flag drops back once every guard is gone.
    pub fn begin(&self) -> ActivityGuard {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        self.publish();
        ActivityGuard {
            activity: self.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    // Reads the counter under the channel lock so the last writer always
    // publishes the current count.
    fn publish(&self) {
        let inflight = &self.inflight;
        self.tx.send_if_modified(|active| {
            let now = inflight.load(Ordering::SeqCst) > 0;
            let changed = *active != now;
            *active = now;
            changed
        });
    }
}

/// Releases its share of the activity when dropped.
pub struct ActivityGuard {
    activity: SyncActivity,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.activity.inflight.fetch_sub(1, Ordering::SeqCst);
        self.activity.publish();
    }
}
