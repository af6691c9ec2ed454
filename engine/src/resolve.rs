//! Conflict resolution between local and remote copies of a record.
//!
//! The policy is last-write-wins by wall clock:
//!
//! - a remote copy replaces the local one only when its `updatedAt` is
//!   strictly greater;
//! - on an exact tie the local copy is kept, which avoids a redundant write.
//!
//! This assumes the two peers' clocks are reasonably in sync and that both
//! partners rarely edit the same record at the same moment. Under skew or a
//! truly simultaneous edit one partner's change is discarded. That outcome is
//! accepted; do not replace it with causal metadata without changing product
//! behavior.
//!
//! Bootstrap merging follows a different rule (see [`merge_by_id`]): the
//! freshly pulled remote snapshot is authoritative for every id it contains.

use crate::{record::Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// Returns true when `remote` supersedes `local`.
pub fn is_newer<T: Record>(local: &T, remote: &T) -> bool {
    remote.updated_at() > local.updated_at()
}

/// Outcome of comparing an incoming remote record with local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Resolution {
    /// The local copy stays as it is.
    KeepLocal,
    /// The remote copy replaces (or creates) the local one.
    TakeRemote,
}

/// Decide what to do with `remote` given the current local copy, if any.
pub fn resolve<T: Record>(local: Option<&T>, remote: &T) -> Resolution {
    match local {
        Some(local) if !is_newer(local, remote) => Resolution::KeepLocal,
        _ => Resolution::TakeRemote,
    }
}

/// Counts from a bootstrap merge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Remote records that did not exist locally
    pub added: usize,
    /// Local records overwritten by their remote copy
    pub replaced: usize,
    /// Local records absent from the remote snapshot, kept as is
    pub local_only: usize,
    /// Remote records ignored because they were deleted locally
    pub skipped_deleted: usize,
    /// Tombstones dropped because the snapshot no longer holds their id
    pub tombstones_cleared: usize,
}

impl MergeReport {
    /// Records in the collection after the merge.
    pub fn total(&self) -> usize {
        self.added + self.replaced + self.local_only
    }
}

/// Merge a full remote snapshot into the local set.
///
/// - An id present on both sides takes the remote copy.
/// - A local id absent from the snapshot is preserved; it was created offline
///   and has not reached the remote yet.
/// - A remote id in `deleted` is not re-added; its delete is still on its way.
pub fn merge_by_id<T: Record>(
    mut local: BTreeMap<RecordId, T>,
    remote: Vec<T>,
    deleted: &BTreeSet<RecordId>,
) -> (BTreeMap<RecordId, T>, MergeReport) {
    let mut report = MergeReport::default();
    let mut seen: HashSet<RecordId> = HashSet::with_capacity(remote.len());

    for record in remote {
        let id = record.id().to_string();
        if deleted.contains(&id) {
            report.skipped_deleted += 1;
            continue;
        }
        if !seen.insert(id.clone()) {
            // Duplicate row in the snapshot; the later copy wins and was
            // already counted.
            local.insert(id, record);
            continue;
        }
        match local.insert(id, record) {
            Some(_) => report.replaced += 1,
            None => report.added += 1,
        }
    }

    report.local_only = local.keys().filter(|id| !seen.contains(*id)).count();
    (local, report)
}
