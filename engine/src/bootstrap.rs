//! Session-start bootstrap: pull every collection, then merge.
//!
//! All collections are pulled concurrently. Merging only starts once every
//! pull has succeeded, so a partially reachable remote never leaves some
//! collections merged and others not.

use crate::{
    adapter::SyncedCollection,
    error::{Error, Result},
    resolve::MergeReport,
    CollectionName,
};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// Progress of the bootstrap for the current session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BootstrapState {
    #[default]
    Idle,
    Loading,
    Merged,
    Failed,
}

/// Proof that a bootstrap merged every collection.
///
/// Only the loader can create one, and legacy migration requires it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReceipt {
    reports: BTreeMap<CollectionName, MergeReport>,
}

impl BootstrapReceipt {
    /// Merge counts per collection.
    pub fn reports(&self) -> &BTreeMap<CollectionName, MergeReport> {
        &self.reports
    }

    /// Records across all collections after the merge.
    pub fn total_records(&self) -> usize {
        self.reports.values().map(MergeReport::total).sum()
    }
}

/// Pull and merge every collection, publishing progress on `state`.
pub(crate) async fn load(
    collections: &[Arc<dyn SyncedCollection>],
    state: &watch::Sender<BootstrapState>,
) -> Result<BootstrapReceipt> {
    state.send_replace(BootstrapState::Loading);
    tracing::info!(collections = collections.len(), "Bootstrap started");

    let pulls = join_all(collections.iter().map(|c| c.fetch_remote())).await;

    let mut snapshots = Vec::with_capacity(collections.len());
    for (collection, pulled) in collections.iter().zip(pulls) {
        match pulled {
            Ok(raw) => snapshots.push(raw),
            Err(e) => {
                state.send_replace(BootstrapState::Failed);
                tracing::warn!(
                    collection = %collection.name(),
                    error = %e,
                    "Bootstrap pull failed, nothing merged"
                );
                return Err(Error::Bootstrap {
                    collection: collection.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    let mut reports = BTreeMap::new();
    for (collection, raw) in collections.iter().zip(snapshots) {
        match collection.merge_fetched(raw) {
            Ok(report) => {
                tracing::debug!(
                    collection = %collection.name(),
                    added = report.added,
                    replaced = report.replaced,
                    local_only = report.local_only,
                    "Collection merged"
                );
                reports.insert(collection.name().to_string(), report);
            }
            Err(e) => {
                state.send_replace(BootstrapState::Failed);
                tracing::error!(collection = %collection.name(), error = %e, "Bootstrap merge failed");
                return Err(Error::Bootstrap {
                    collection: collection.name().to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    state.send_replace(BootstrapState::Merged);
    let receipt = BootstrapReceipt { reports };
    tracing::info!(records = receipt.total_records(), "Bootstrap merged");
    Ok(receipt)
}
