//! Record model shared by every synced collection.

use crate::{RecordId, Timestamp};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::cmp::Ordering;

/// Identity and timestamps carried by every record.
///
/// Concrete record types embed this with `#[serde(flatten)]` so that `id`,
/// `createdAt` and `updatedAt` sit at the top level of the serialized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    /// Globally unique, client-generated identifier
    pub id: RecordId,
    /// When the record was first created (milliseconds since epoch)
    #[serde(default)]
    pub created_at: Timestamp,
    /// When the record was last written by either peer
    #[serde(default)]
    pub updated_at: Timestamp,
}

impl RecordMeta {
    /// Metadata for a brand new record. Zero timestamps are stamped by the
    /// local store on first insert.
    pub fn new() -> Self {
        Self::with_id(new_record_id())
    }

    pub fn with_id(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            created_at: 0,
            updated_at: 0,
        }
    }

    /// Metadata with explicit timestamps, for imports and tests.
    pub fn at(id: impl Into<RecordId>, created_at: Timestamp, updated_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            created_at,
            updated_at,
        }
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate a random 128-bit record id, collision-free across both peers.
pub fn new_record_id() -> RecordId {
    uuid::Uuid::new_v4().to_string()
}

/// An entity stored in a synced collection.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn meta(&self) -> &RecordMeta;

    fn meta_mut(&mut self) -> &mut RecordMeta;

    fn id(&self) -> &str {
        &self.meta().id
    }

    fn created_at(&self) -> Timestamp {
        self.meta().created_at
    }

    fn updated_at(&self) -> Timestamp {
        self.meta().updated_at
    }

    /// Display order within the collection. Newest first unless a collection
    /// defines its own sort key.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        other
            .created_at()
            .cmp(&self.created_at())
            .then_with(|| self.id().cmp(other.id()))
    }
}
