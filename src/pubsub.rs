//! Fan-out of backend subscription payloads to local subscribers.
//!
//! Every delegated subscription registers under a fresh id; the task reading the
//! backend stream publishes each payload under that id and the local subscription
//! stream receives it. Removing the id (or dropping the receiver) ends delivery.

use crate::types::RemoteResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Identifier of one delegated subscription
pub type SubscriptionId = uuid::Uuid;

#[derive(Clone, Default)]
pub struct SubscriptionHub {
    channels: Arc<Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<RemoteResponse>>>>,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscription and return its id and payload receiver
    pub fn register(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<RemoteResponse>) {
        let id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.channels.lock().insert(id, tx);
        (id, rx)
    }

    /// Deliver a payload; returns false when nobody listens under `id` anymore
    pub fn publish(&self, id: &SubscriptionId, payload: RemoteResponse) -> bool {
        let mut channels = self.channels.lock();
        let delivered = channels
            .get(id)
            .map(|tx| tx.send(payload).is_ok())
            .unwrap_or(false);
        if !delivered {
            channels.remove(id);
        }
        delivered
    }

    pub fn remove(&self, id: &SubscriptionId) {
        self.channels.lock().remove(id);
    }

    /// Number of live subscriptions
    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for SubscriptionHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHub")
            .field("subscriptions", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn payloads_reach_only_their_subscriber() {
        let hub = SubscriptionHub::new();
        let (a, mut rx_a) = hub.register();
        let (b, mut rx_b) = hub.register();
        assert_ne!(a, b);

        assert!(hub.publish(&a, RemoteResponse::success(async_graphql::Value::from(1))));
        assert!(hub.publish(&b, RemoteResponse::success(async_graphql::Value::from(2))));

        assert_eq!(rx_a.recv().await.and_then(|r| r.data), Some(async_graphql::Value::from(1)));
        assert_eq!(rx_b.recv().await.and_then(|r| r.data), Some(async_graphql::Value::from(2)));
    }

    #[tokio::test]
    async fn dropped_receivers_are_cleaned_up() {
        let hub = SubscriptionHub::new();
        let (id, rx) = hub.register();
        drop(rx);

        assert!(!hub.publish(&id, RemoteResponse::default()));
        assert!(hub.is_empty());

        let (id, _rx) = hub.register();
        hub.remove(&id);
        assert!(!hub.publish(&id, RemoteResponse::default()));
    }
}
