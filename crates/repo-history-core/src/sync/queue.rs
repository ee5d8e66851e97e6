//! Background propagation of local mutations to the remote history.
//!
//! Work for the same record url runs strictly in submission order; work for
//! different urls runs concurrently. `Clear` is a barrier: it waits for every
//! earlier job and holds back every later one until it finishes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::activity::{ActivityGuard, SyncActivity};
use crate::models::NewRecord;

/// A local mutation waiting to reach the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create-if-absent on the remote, then confirm the local record `id`.
    Add { id: String, record: NewRecord },
    /// Delete the remote copy of a record removed locally.
    Remove { id: String, url: String, confirmed: bool },
    Clear,
}

impl Mutation {
    /// The ordering lane, or `None` for barriers.
    fn lane(&self) -> Option<&str> {
        match self {
            Mutation::Add { record, .. } => Some(record.url.as_str()),
            Mutation::Remove { url, .. } => Some(url.as_str()),
            Mutation::Clear => None,
        }
    }
}

/// Applies one mutation to the remote. Failures are the handler's to log.
#[async_trait]
pub trait MutationHandler: Send + Sync + 'static {
    async fn apply(&self, mutation: Mutation);
}

struct Job {
    mutation: Mutation,
    guard: ActivityGuard,
}

enum Command {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// Handle for submitting mutations. Dropping every clone stops the dispatcher
/// once the submitted work has drained.
#[derive(Clone)]
pub struct PropagationQueue {
    tx: mpsc::UnboundedSender<Command>,
    activity: SyncActivity,
}

impl PropagationQueue {
    /// Start the dispatcher. Must be called from within a Tokio runtime.
    pub fn spawn<H: MutationHandler>(handler: Arc<H>, activity: SyncActivity) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(handler, rx));
        Self { tx, activity }
    }

    pub fn submit(&self, mutation: Mutation) {
        let job = Job {
            mutation,
            guard: self.activity.begin(),
        };
        if self.tx.send(Command::Run(job)).is_err() {
            error!("Propagation queue closed, dropping mutation");
        }
    }

    /// Wait until everything submitted before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Command::Flush(done_tx)).is_err() {
            return;
        }
        let _ = done_rx.await;
    }
}

async fn dispatch<H: MutationHandler>(handler: Arc<H>, mut rx: mpsc::UnboundedReceiver<Command>) {
    // Tail of each url's chain of jobs
    let mut lanes: HashMap<String, JoinHandle<()>> = HashMap::new();

    while let Some(command) = rx.recv().await {
        lanes.retain(|_, tail| !tail.is_finished());

        match command {
            Command::Run(job) => match job.mutation.lane().map(str::to_string) {
                Some(lane) => {
                    let previous = lanes.remove(&lane);
                    let handler = Arc::clone(&handler);
                    let tail = tokio::spawn(async move {
                        if let Some(previous) = previous {
                            // A panicked predecessor must not stall the lane
                            let _ = previous.await;
                        }
                        handler.apply(job.mutation).await;
                        drop(job.guard);
                    });
                    lanes.insert(lane, tail);
                }
                None => {
                    drain(&mut lanes).await;
                    debug!("Running barrier mutation");
                    handler.apply(job.mutation).await;
                }
            },
            Command::Flush(done) => {
                drain(&mut lanes).await;
                let _ = done.send(());
            }
        }
    }

    drain(&mut lanes).await;
    debug!("Propagation queue stopped");
}

async fn drain(lanes: &mut HashMap<String, JoinHandle<()>>) {
    let tails: Vec<_> = lanes.drain().map(|(_, tail)| tail).collect();
    for result in join_all(tails).await {
        if let Err(e) = result {
            error!(error = %e, "Propagation task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Records start/finish events; adds for "slow" urls take longer.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    fn label(mutation: &Mutation) -> String {
        match mutation {
            Mutation::Add { record, .. } => format!("add:{}", record.url),
            Mutation::Remove { url, .. } => format!("remove:{}", url),
            Mutation::Clear => "clear".to_string(),
        }
    }

    #[async_trait]
    impl MutationHandler for Recorder {
        async fn apply(&self, mutation: Mutation) {
            let label = label(&mutation);
            self.events.lock().push(format!("start {}", label));
            if label.contains("slow") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            self.events.lock().push(format!("end {}", label));
        }
    }

    fn add(url: &str) -> Mutation {
        Mutation::Add {
            id: format!("local-{}", url),
            record: NewRecord::new(url, url),
        }
    }

    fn remove(url: &str) -> Mutation {
        Mutation::Remove {
            id: format!("local-{}", url),
            url: url.to_string(),
            confirmed: false,
        }
    }

    fn position(events: &[String], event: &str) -> usize {
        events
            .iter()
            .position(|e| e == event)
            .unwrap_or_else(|| panic!("missing event {}", event))
    }

    #[tokio::test]
    async fn test_same_url_runs_in_order() {
        let recorder = Arc::new(Recorder::default());
        let queue = PropagationQueue::spawn(Arc::clone(&recorder), SyncActivity::new());

        queue.submit(add("slow"));
        queue.submit(remove("slow"));
        queue.flush().await;

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec!["start add:slow", "end add:slow", "start remove:slow", "end remove:slow"]
        );
    }

    #[tokio::test]
    async fn test_different_urls_run_concurrently() {
        let recorder = Arc::new(Recorder::default());
        let queue = PropagationQueue::spawn(Arc::clone(&recorder), SyncActivity::new());

        queue.submit(add("slow"));
        queue.submit(add("fast"));
        queue.flush().await;

        let events = recorder.events.lock().clone();
        assert!(position(&events, "end add:fast") < position(&events, "end add:slow"));
    }

    #[tokio::test]
    async fn test_clear_is_a_barrier() {
        let recorder = Arc::new(Recorder::default());
        let queue = PropagationQueue::spawn(Arc::clone(&recorder), SyncActivity::new());

        queue.submit(add("slow"));
        queue.submit(Mutation::Clear);
        queue.submit(add("fast"));
        queue.flush().await;

        let events = recorder.events.lock().clone();
        assert!(position(&events, "end add:slow") < position(&events, "start clear"));
        assert!(position(&events, "end clear") < position(&events, "start add:fast"));
    }

    #[tokio::test]
    async fn test_activity_covers_queued_work() {
        let recorder = Arc::new(Recorder::default());
        let activity = SyncActivity::new();
        let queue = PropagationQueue::spawn(Arc::clone(&recorder), activity.clone());

        queue.submit(add("slow"));
        assert!(activity.is_active());
        queue.flush().await;
        assert!(!activity.is_active());
    }
}
