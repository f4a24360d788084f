use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::mpsc;

use crate::{ChangeSet, SubscriptionId};

pub type ChangeCallback = Arc<dyn Fn(&ChangeSet) + Send + Sync>;

#[derive(Clone)]
enum Sink {
    Callback(ChangeCallback),
    Channel(mpsc::UnboundedSender<ChangeSet>),
}

#[derive(Clone)]
struct Subscription {
    id: SubscriptionId,
    struct_name: String,
    sink: Sink,
}

/// In-process fan-out of change sets to subscribers keyed by entity type.
/// Created once by the owner of the store and shut down with it.
#[derive(Default)]
pub struct ChangeBroker {
    subscriptions: Mutex<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl ChangeBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, struct_name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeSet) + Send + Sync + 'static,
    {
        self.add(struct_name.into(), Sink::Callback(Arc::new(callback)))
    }

    pub fn subscribe_channel(
        &self,
        struct_name: impl Into<String>,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<ChangeSet>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.add(struct_name.into(), Sink::Channel(sender));
        (id, receiver)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.lock();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        before != subscriptions.len()
    }

    /// Delivers `changes` once to every subscriber of a touched entity type.
    /// Callbacks run outside the subscription lock.
    pub fn announce(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        let targets: Vec<Subscription> = self
            .lock()
            .iter()
            .filter(|subscription| changes.touches(&subscription.struct_name))
            .cloned()
            .collect();
        let mut closed = Vec::new();
        for subscription in targets {
            match &subscription.sink {
                Sink::Callback(callback) => callback(changes),
                Sink::Channel(sender) => {
                    if sender.send(changes.clone()).is_err() {
                        warn!(
                            "dropping closed change subscription {:?} on {}",
                            subscription.id, subscription.struct_name
                        );
                        closed.push(subscription.id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.lock()
                .retain(|subscription| !closed.contains(&subscription.id));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    pub fn shutdown(&self) {
        let mut subscriptions = self.lock();
        debug!("change broker shutting down with {} subscriptions", subscriptions.len());
        subscriptions.clear();
    }

    fn add(&self, struct_name: String, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Subscription {
            id,
            struct_name,
            sink,
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Subscription>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::ChangeBroker;
    use crate::{ChangeSet, Id};

    fn created(struct_name: &str, id: i64) -> ChangeSet {
        let mut changes = ChangeSet::new();
        changes.record_created(struct_name, Id(id));
        changes
    }

    #[test]
    fn delivers_only_to_touched_structs() {
        let broker = ChangeBroker::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        broker.subscribe("User", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        broker.announce(&created("Alliance", 1));
        broker.announce(&created("User", 1));
        broker.announce(&ChangeSet::new());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let broker = ChangeBroker::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let id = broker.subscribe("User", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(broker.unsubscribe(id));
        assert!(!broker.unsubscribe(id));
        broker.announce(&created("User", 1));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn channels_receive_and_closed_ones_are_pruned() {
        let broker = ChangeBroker::new();
        let (_, mut receiver) = broker.subscribe_channel("Test");
        let (_, dropped) = broker.subscribe_channel("Test");
        drop(dropped);
        broker.announce(&created("Test", 5));
        let received = receiver.recv().await.expect("change set");
        assert!(received.get("Test").expect("test").created.contains(&Id(5)));
        assert_eq!(broker.subscriber_count(), 1);
        broker.shutdown();
        assert_eq!(broker.subscriber_count(), 0);
    }
}
