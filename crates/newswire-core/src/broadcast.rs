use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::event::JobUpdate;

/// Per-subscriber buffer size. A sink that falls this far behind starts
/// losing its oldest events and reconciles through a status request.
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Fans progress events out to per-connection subscriber channels.
///
/// Two scopes: `all` receives every event, per-job channels receive only
/// their job's events. Dispatch never blocks on a slow sink; each sink is a
/// bounded broadcast receiver that drops oldest on overflow.
#[derive(Clone)]
pub struct Broadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    all: broadcast::Sender<JobUpdate>,
    per_job: Mutex<HashMap<String, broadcast::Sender<JobUpdate>>>,
    capacity: usize,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SINK_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (all, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                all,
                per_job: Mutex::new(HashMap::new()),
                capacity,
            }),
        }
    }

    /// Subscribe to every job's events.
    pub fn subscribe_all(&self) -> broadcast::Receiver<JobUpdate> {
        self.inner.all.subscribe()
    }

    /// Subscribe to a single job's events. Dropping the receiver is the
    /// unsubscribe; the channel is pruned once its last receiver is gone.
    pub fn subscribe_job(&self, job_id: &str) -> broadcast::Receiver<JobUpdate> {
        let mut per_job = self.inner.per_job.lock().unwrap();
        per_job
            .entry(job_id.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Deliver one event to all matching sinks.
    pub fn dispatch(&self, update: JobUpdate) {
        {
            let mut per_job = self.inner.per_job.lock().unwrap();
            if let Some(tx) = per_job.get(&update.job_id) {
                if tx.send(update.clone()).is_err() {
                    per_job.remove(&update.job_id);
                }
            }
        }
        let _ = self.inner.all.send(update);
    }

    /// Number of job-scoped channels currently registered.
    pub fn job_channel_count(&self) -> usize {
        self.inner.per_job.lock().unwrap().len()
    }

    /// Bridge a bus subscription into the registries until the source
    /// closes. Lag on the source only skips the missed events.
    pub async fn forward(self, mut source: broadcast::Receiver<JobUpdate>) {
        loop {
            match source.recv().await {
                Ok(update) => self.dispatch(update),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(%missed, "Broadcaster lagging behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
