use newswire_core::broadcast::Broadcaster;
use newswire_core::queue::WorkQueue;
use newswire_core::service::JobService;
use newswire_core::store::Store;
use newswire_core::traits::UpdatePublisher;

/// Shared application state, available to all route handlers via
/// `State<Arc<AppState<..>>>`. Generic over the storage, queue and bus
/// backends so the whole HTTP surface can be exercised in-memory.
pub struct AppState<S, Q, B>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    pub store: S,
    pub queue: Q,
    pub bus: B,
    pub broadcaster: Broadcaster,
}

impl<S, Q, B> AppState<S, Q, B>
where
    S: Store,
    Q: WorkQueue,
    B: UpdatePublisher,
{
    pub fn new(store: S, queue: Q, bus: B, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            queue,
            bus,
            broadcaster,
        }
    }

    /// Request-scoped job service over the shared backends.
    pub fn jobs(&self) -> JobService<S, Q, B> {
        JobService::new(self.store.clone(), self.queue.clone(), self.bus.clone())
    }
}
