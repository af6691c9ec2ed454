//! In-process remote store.
//!
//! [`MemoryRemote`] behaves like the hosted backend: it keeps one table per
//! collection, applies pushes as idempotent last-write-wins upserts keyed by
//! `id`, and fans every accepted change out to all subscribers of the
//! collection, including the writer's own subscription.
//!
//! Each peer talks to it through a [`MemoryLink`], which can be taken offline
//! independently to simulate a device losing connectivity. Events published
//! while a link is offline are lost for that link, as they would be for a
//! disconnected realtime socket.

use crate::{
    error::RemoteError,
    remote::{ChangeEvent, RemoteStore, Subscription, SubscriptionId},
    wire, CollectionName, RecordId,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Counters for observing remote traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteStats {
    /// Pushes that changed a stored record
    pub writes_applied: u64,
    /// Pushes that were no-ops because the stored copy was as new or newer
    pub writes_ignored: u64,
    /// Deletes that removed a stored record
    pub deletes_applied: u64,
}

#[derive(Debug)]
struct Subscriber {
    collection: CollectionName,
    online: Arc<AtomicBool>,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Debug, Default)]
struct Shared {
    tables: DashMap<CollectionName, BTreeMap<RecordId, Value>>,
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_subscription: AtomicU64,
    writes_applied: AtomicU64,
    writes_ignored: AtomicU64,
    deletes_applied: AtomicU64,
}

/// Shared in-memory remote. Clones refer to the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryRemote {
    shared: Arc<Shared>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a connection for one peer. The link starts online.
    pub fn link(&self) -> MemoryLink {
        MemoryLink {
            shared: Arc::clone(&self.shared),
            online: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Stored copy of a record, in wire format.
    pub fn get(&self, collection: &str, id: &str) -> Option<Value> {
        self.shared
            .tables
            .get(collection)
            .and_then(|table| table.get(id).cloned())
    }

    /// Every stored record of a collection, ordered by id.
    pub fn records(&self, collection: &str) -> Vec<Value> {
        self.shared
            .tables
            .get(collection)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of stored records in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.shared
            .tables
            .get(collection)
            .map(|table| table.len())
            .unwrap_or(0)
    }

    /// Open subscriptions for a collection.
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.shared
            .subscribers
            .iter()
            .filter(|entry| entry.value().collection == collection)
            .count()
    }

    pub fn stats(&self) -> RemoteStats {
        RemoteStats {
            writes_applied: self.shared.writes_applied.load(Ordering::Relaxed),
            writes_ignored: self.shared.writes_ignored.load(Ordering::Relaxed),
            deletes_applied: self.shared.deletes_applied.load(Ordering::Relaxed),
        }
    }

    fn apply_push(&self, collection: &str, record: Value) -> Result<(), RemoteError> {
        if !record.is_object() {
            return Err(RemoteError::Rejected("record must be a JSON object".into()));
        }
        let id = wire::wire_id(&record)
            .ok_or_else(|| RemoteError::Rejected("record has no string id".into()))?
            .to_string();
        let incoming = wire::wire_updated_at(&record);

        let event = {
            let mut table = self.shared.tables.entry(collection.to_string()).or_default();
            match table.get(&id) {
                Some(stored) if wire::wire_updated_at(stored) >= incoming => None,
                Some(_) => {
                    table.insert(id.clone(), record.clone());
                    Some(ChangeEvent::Update { record })
                }
                None => {
                    table.insert(id.clone(), record.clone());
                    Some(ChangeEvent::Insert { record })
                }
            }
        };

        match event {
            Some(event) => {
                self.shared.writes_applied.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(collection = %collection, id = %id, "Remote write applied");
                self.publish(collection, event);
            }
            None => {
                self.shared.writes_ignored.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(collection = %collection, id = %id, "Remote write ignored, stored copy is as new");
            }
        }
        Ok(())
    }

    fn apply_delete(&self, collection: &str, id: &str) {
        let removed = self
            .shared
            .tables
            .get_mut(collection)
            .and_then(|mut table| table.remove(id))
            .is_some();

        if removed {
            self.shared.deletes_applied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(collection = %collection, id = %id, "Remote delete applied");
            self.publish(collection, ChangeEvent::Delete { id: id.to_string() });
        }
    }

    fn open_subscription(&self, collection: &str, online: Arc<AtomicBool>) -> Subscription {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let (sender, events) = mpsc::unbounded_channel();
        self.shared.subscribers.insert(
            id,
            Subscriber {
                collection: collection.to_string(),
                online,
                sender,
            },
        );
        tracing::debug!(collection = %collection, subscription = %id, "Subscription opened");
        Subscription {
            id,
            collection: collection.to_string(),
            events,
        }
    }

    fn close_subscription(&self, id: SubscriptionId) {
        if self.shared.subscribers.remove(&id).is_some() {
            tracing::debug!(subscription = %id, "Subscription closed");
        }
    }

    /// Deliver an event to every online subscriber of the collection.
    /// Returns the number of subscribers that received it.
    fn publish(&self, collection: &str, event: ChangeEvent) -> usize {
        let mut closed = Vec::new();
        let mut sent = 0;

        for entry in self.shared.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.collection != collection || !subscriber.online.load(Ordering::Acquire) {
                continue;
            }
            if subscriber.sender.send(event.clone()).is_ok() {
                sent += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        for id in closed {
            self.shared.subscribers.remove(&id);
        }
        sent
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn push(&self, collection: &str, record: Value) -> Result<(), RemoteError> {
        self.apply_push(collection, record)
    }

    async fn pull(&self, collection: &str) -> Result<Vec<Value>, RemoteError> {
        Ok(self.records(collection))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.apply_delete(collection, id);
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, RemoteError> {
        Ok(self.open_subscription(collection, Arc::new(AtomicBool::new(true))))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.close_subscription(id);
    }
}

/// One peer's connection to a [`MemoryRemote`].
#[derive(Debug, Clone)]
pub struct MemoryLink {
    shared: Arc<Shared>,
    online: Arc<AtomicBool>,
}

impl MemoryLink {
    /// Simulate losing or regaining connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
        tracing::debug!(online, "Memory link connectivity changed");
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    fn remote(&self) -> MemoryRemote {
        MemoryRemote {
            shared: Arc::clone(&self.shared),
        }
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("link is offline".into()))
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryLink {
    async fn push(&self, collection: &str, record: Value) -> Result<(), RemoteError> {
        self.check_online()?;
        self.remote().apply_push(collection, record)
    }

    async fn pull(&self, collection: &str) -> Result<Vec<Value>, RemoteError> {
        self.check_online()?;
        Ok(self.remote().records(collection))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.check_online()?;
        self.remote().apply_delete(collection, id);
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<Subscription, RemoteError> {
        // Realtime channels reconnect on their own, so opening one while
        // offline succeeds and simply receives nothing until back online.
        Ok(self
            .remote()
            .open_subscription(collection, Arc::clone(&self.online)))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.remote().close_subscription(id);
    }
}
