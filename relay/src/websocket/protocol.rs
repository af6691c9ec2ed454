//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use duet_engine::{ChangeEvent, CollectionName, RecordId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Start receiving changes for a collection.
    Subscribe {
        collection: CollectionName,
        /// Request ID for correlating responses
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Stop receiving changes for a collection.
    Unsubscribe {
        collection: CollectionName,
        #[serde(default)]
        request_id: Option<String>,
    },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The subscription is active.
    Subscribed {
        collection: CollectionName,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// The subscription was closed.
    Unsubscribed {
        collection: CollectionName,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// A record was created.
    Insert {
        collection: CollectionName,
        record: Value,
    },

    /// A record was replaced by a newer copy.
    Update {
        collection: CollectionName,
        record: Value,
    },

    /// A record was deleted.
    Delete {
        collection: CollectionName,
        id: RecordId,
    },

    /// Response to ping.
    Pong,

    /// Error message.
    Error {
        /// Error description
        message: String,
        /// Request ID from the original request (if applicable)
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
        }
    }

    /// Wrap a store change for delivery to a subscriber.
    pub fn change(collection: impl Into<CollectionName>, event: ChangeEvent) -> Self {
        let collection = collection.into();
        match event {
            ChangeEvent::Insert { record } => ServerMessage::Insert { collection, record },
            ChangeEvent::Update { record } => ServerMessage::Update { collection, record },
            ChangeEvent::Delete { id } => ServerMessage::Delete { collection, id },
        }
    }
}
