//! WebSocket connection manager.
//!
//! Tracks active WebSocket connections and the collections each one is
//! subscribed to. Every subscription owns a store feed and a task that
//! forwards its changes to the connection.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use duet_engine::{CollectionName, RemoteError, RemoteStore, Subscription, SubscriptionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug)]
struct Forwarder {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: String,
    /// Channel to send messages to this connection
    pub sender: MessageSender,
    subscriptions: HashMap<CollectionName, Forwarder>,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connection manager wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a new connection.
    ///
    /// Returns the connection ID.
    pub fn register(&self, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                sender,
                subscriptions: HashMap::new(),
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    /// Unregister a connection and close all of its subscriptions.
    pub async fn unregister(&self, conn_id: &str, remote: &dyn RemoteStore) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            let closed = conn.subscriptions.len();
            for (_, forwarder) in conn.subscriptions {
                forwarder.task.abort();
                remote.unsubscribe(forwarder.subscription).await;
            }

            tracing::info!(conn_id = %conn_id, closed, "WebSocket connection unregistered");
        }
    }

    /// Subscribe a connection to a collection.
    ///
    /// Returns `false` when the connection was already subscribed or is gone.
    pub async fn subscribe(
        &self,
        conn_id: &str,
        collection: &str,
        remote: &dyn RemoteStore,
    ) -> Result<bool, RemoteError> {
        let Some(sender) = self.sender_for(conn_id, collection) else {
            return Ok(false);
        };

        let subscription = remote.subscribe(collection).await?;
        let id = subscription.id;
        let forwarder = Forwarder {
            subscription: id,
            task: spawn_forwarder(subscription, sender),
        };

        // The connection may have closed, or subscribed concurrently, while
        // the feed was opening.
        let rejected = match self.connections.get_mut(conn_id) {
            Some(mut conn) if !conn.subscriptions.contains_key(collection) => {
                conn.subscriptions.insert(collection.to_string(), forwarder);
                None
            }
            _ => Some(forwarder),
        };

        match rejected {
            Some(forwarder) => {
                forwarder.task.abort();
                remote.unsubscribe(id).await;
                Ok(false)
            }
            None => {
                tracing::debug!(conn_id = %conn_id, collection = %collection, "Subscribed");
                Ok(true)
            }
        }
    }

    /// Unsubscribe a connection from a collection.
    ///
    /// Returns `false` when there was no such subscription.
    pub async fn unsubscribe(
        &self,
        conn_id: &str,
        collection: &str,
        remote: &dyn RemoteStore,
    ) -> bool {
        let removed = self
            .connections
            .get_mut(conn_id)
            .and_then(|mut conn| conn.subscriptions.remove(collection));

        match removed {
            Some(forwarder) => {
                forwarder.task.abort();
                remote.unsubscribe(forwarder.subscription).await;
                tracing::debug!(conn_id = %conn_id, collection = %collection, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        if let Some(conn) = self.connections.get(conn_id) {
            conn.sender.send(message).is_ok()
        } else {
            false
        }
    }

    /// Get the number of active connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Get the number of subscriptions across all connections.
    pub fn subscription_count(&self) -> usize {
        self.connections
            .iter()
            .map(|entry| entry.value().subscriptions.len())
            .sum()
    }

    fn sender_for(&self, conn_id: &str, collection: &str) -> Option<MessageSender> {
        let conn = self.connections.get(conn_id)?;
        if conn.subscriptions.contains_key(collection) {
            return None;
        }
        Some(conn.sender.clone())
    }
}

fn spawn_forwarder(subscription: Subscription, sender: MessageSender) -> JoinHandle<()> {
    let Subscription {
        collection,
        mut events,
        ..
    } = subscription;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if sender
                .send(ServerMessage::change(collection.clone(), event))
                .is_err()
            {
                break;
            }
        }
    })
}
