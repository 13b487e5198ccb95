use crate::import::progress::IngestProgress;
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard,
};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::debug;

type SubscriptionId = u64;

struct Subscription {
    /// None subscribes to every request
    request_id: Option<String>,
    tx: tokio_mpsc::UnboundedSender<IngestProgress>,
}

impl Subscription {
    fn matches(&self, progress: &IngestProgress) -> bool {
        match &self.request_id {
            Some(request_id) => progress.request_id() == request_id,
            None => true,
        }
    }
}

type Subscriptions = Arc<Mutex<HashMap<SubscriptionId, Subscription>>>;

/// Fans ingestion progress out to per-request subscribers
#[derive(Clone)]
pub struct IngestProgressHandle {
    subscriptions: Subscriptions,
    next_id: Arc<AtomicU64>,
}

impl IngestProgressHandle {
    /// Spawn the dispatch task on the given runtime
    pub fn new(
        mut progress_rx: tokio_mpsc::UnboundedReceiver<IngestProgress>,
        runtime_handle: tokio::runtime::Handle,
    ) -> Self {
        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let dispatch_subscriptions = subscriptions.clone();

        runtime_handle.spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                let mut subs = lock(&dispatch_subscriptions);
                // A failed send means the receiver was dropped
                subs.retain(|_, subscription| {
                    !subscription.matches(&progress) || subscription.tx.send(progress.clone()).is_ok()
                });
            }
            debug!("Progress channel closed");
        });

        Self {
            subscriptions,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Progress of one request. Dropping the receiver ends the subscription.
    pub fn subscribe_request(
        &self,
        request_id: String,
    ) -> tokio_mpsc::UnboundedReceiver<IngestProgress> {
        self.subscribe(Some(request_id))
    }

    /// Progress of every request
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<IngestProgress> {
        self.subscribe(None)
    }

    fn subscribe(&self, request_id: Option<String>) -> tokio_mpsc::UnboundedReceiver<IngestProgress> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.subscriptions).insert(id, Subscription { request_id, tx });
        rx
    }
}

fn lock(subscriptions: &Subscriptions) -> MutexGuard<'_, HashMap<SubscriptionId, Subscription>> {
    subscriptions
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete(request_id: &str) -> IngestProgress {
        IngestProgress::Complete {
            request_id: request_id.to_string(),
            created: 1,
            skipped: 0,
        }
    }

    #[tokio::test]
    async fn test_subscribers_only_see_their_request() {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let handle = IngestProgressHandle::new(rx, tokio::runtime::Handle::current());

        let mut first = handle.subscribe_request("a".to_string());
        let mut everything = handle.subscribe_all();

        tx.send(complete("b")).unwrap();
        tx.send(complete("a")).unwrap();

        assert_eq!(first.recv().await, Some(complete("a")));
        assert_eq!(everything.recv().await, Some(complete("b")));
        assert_eq!(everything.recv().await, Some(complete("a")));
    }
}
