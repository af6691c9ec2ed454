//! The remote store seam.
//!
//! The engine needs four primitives from its backend, per named collection:
//! an idempotent `push`, a full-snapshot `pull`, `delete`, and a realtime
//! change feed. Records cross this seam in wire format (snake_case JSON, see
//! [`wire`](crate::wire)).

use crate::{error::RemoteError, CollectionName, RecordId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tokio::sync::mpsc;

/// Identifies one realtime subscription on a remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A change delivered by the realtime feed.
///
/// Delivery is at-least-once with no ordering guarantee across collections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    Insert { record: Value },
    Update { record: Value },
    Delete { id: RecordId },
}

impl ChangeEvent {
    /// Id of the record this event is about, if it can be read.
    pub fn record_id(&self) -> Option<&str> {
        match self {
            ChangeEvent::Insert { record } | ChangeEvent::Update { record } => {
                crate::wire::wire_id(record)
            }
            ChangeEvent::Delete { id } => Some(id),
        }
    }
}

/// An open realtime subscription for one collection.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub collection: CollectionName,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Backend the engine replicates through.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upsert `record` keyed by its `id`. Pushing a record whose `updated_at`
    /// is not newer than the stored copy is a no-op.
    async fn push(&self, collection: &str, record: Value) -> Result<(), RemoteError>;

    /// Read every record in the collection.
    async fn pull(&self, collection: &str) -> Result<Vec<Value>, RemoteError>;

    /// Delete a record. Deleting a missing id succeeds.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError>;

    /// Open a realtime change feed for the collection.
    async fn subscribe(&self, collection: &str) -> Result<Subscription, RemoteError>;

    /// Close a feed opened by [`subscribe`](RemoteStore::subscribe).
    async fn unsubscribe(&self, id: SubscriptionId);
}
