//! One-time upload of records that predate sync.
//!
//! Devices that stored data before replication existed push every local
//! record once. A persisted flag makes the migration run at most once per
//! device; it is only set when every collection uploaded completely.

use crate::{
    adapter::SyncedCollection,
    bootstrap::BootstrapReceipt,
    error::{Error, Result},
    storage::Storage,
    CollectionName,
};
use serde::Serialize;
use std::sync::Arc;

const FLAG_KEY: &str = "migration/done";

/// What a migration attempt did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "outcome")]
pub enum MigrationOutcome {
    /// The flag was already set; nothing was pushed
    AlreadyDone,
    /// Every record was pushed and the flag is now set
    Completed { pushed: usize },
    /// Pushing stopped; the flag stays unset and the next session retries
    Failed {
        collection: CollectionName,
        reason: String,
    },
}

/// Guards the one-time legacy upload with a persisted flag.
#[derive(Clone)]
pub struct LegacyMigration {
    storage: Arc<dyn Storage>,
}

impl std::fmt::Debug for LegacyMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyMigration").finish_non_exhaustive()
    }
}

impl LegacyMigration {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Whether this device already completed the migration.
    pub fn is_done(&self) -> Result<bool> {
        Ok(self
            .storage
            .read(FLAG_KEY)?
            .is_some_and(|bytes| bytes.as_slice() == b"true"))
    }

    /// Forget the flag. Only a full data wipe does this.
    pub fn reset(&self) -> Result<()> {
        self.storage.remove(FLAG_KEY)
    }

    /// Push every local record of every collection, once per device.
    ///
    /// The receipt proves the local stores hold the merged remote state, so
    /// the upload cannot overwrite newer remote data with stale local copies.
    pub(crate) async fn run(
        &self,
        _receipt: &BootstrapReceipt,
        collections: &[Arc<dyn SyncedCollection>],
    ) -> Result<MigrationOutcome> {
        if self.is_done()? {
            tracing::debug!("Legacy migration already done");
            return Ok(MigrationOutcome::AlreadyDone);
        }

        let mut pushed = 0;
        for collection in collections {
            match collection.push_all().await {
                Ok(count) => pushed += count,
                Err(e) => {
                    let reason = match e {
                        Error::Migration { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    tracing::error!(
                        collection = %collection.name(),
                        error = %reason,
                        "Legacy migration failed, will retry next session"
                    );
                    return Ok(MigrationOutcome::Failed {
                        collection: collection.name().to_string(),
                        reason,
                    });
                }
            }
        }

        self.storage.write(FLAG_KEY, b"true")?;
        tracing::info!(pushed, "Legacy migration completed");
        Ok(MigrationOutcome::Completed { pushed })
    }
}
