//! Local store - the authoritative on-device copy of one collection.
//!
//! Every mutation is applied to memory and persisted before it returns, so the
//! caller never waits on the network. A mutation that cannot be persisted is
//! rolled back and reported; nothing is ever reverted because of network
//! conditions.
//!
//! The store also remembers ids deleted on this device (tombstones) so that a
//! realtime insert or a bootstrap pull arriving after the delete cannot bring
//! the record back.

use crate::{
    clock::Clock,
    error::{Error, Result},
    record::Record,
    resolve::{self, MergeReport, Resolution},
    storage::Storage,
    CollectionName, RecordId,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Version of the persisted collection format.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Why a remote change left the local store untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Skipped {
    /// Insert for an id that already exists locally
    AlreadyPresent,
    /// Change for an id deleted on this device
    Deleted,
    /// Update not newer than the local copy
    Stale,
    /// Delete for an id that is not stored
    Absent,
}

/// What applying a remote change did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Applied {
    Inserted,
    Updated,
    Removed,
    Skipped(Skipped),
}

#[derive(Debug, Clone)]
struct CollectionState<T> {
    records: BTreeMap<RecordId, T>,
    deleted: BTreeSet<RecordId>,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            deleted: BTreeSet::new(),
        }
    }
}

impl<T> CollectionState<T> {
    fn put(&mut self, id: RecordId, record: T, changes: &mut Changes<T>) {
        let previous = self.records.insert(id.clone(), record);
        changes.records.push((id, previous));
    }

    fn take(&mut self, id: &str, changes: &mut Changes<T>) -> Option<T>
    where
        T: Clone,
    {
        let removed = self.records.remove(id)?;
        changes.records.push((id.to_string(), Some(removed.clone())));
        Some(removed)
    }

    fn tombstone(&mut self, id: &str, changes: &mut Changes<T>) -> bool {
        let added = self.deleted.insert(id.to_string());
        if added {
            changes.tombstones.push((id.to_string(), false));
        }
        added
    }

    fn untombstone(&mut self, id: &str, changes: &mut Changes<T>) -> bool {
        let removed = self.deleted.remove(id);
        if removed {
            changes.tombstones.push((id.to_string(), true));
        }
        removed
    }
}

/// Undo log for one mutation: the previous value of every entry it touched.
struct Changes<T> {
    records: Vec<(RecordId, Option<T>)>,
    tombstones: Vec<(RecordId, bool)>,
    /// Whole previous state, for mutations that rebuild the collection
    replaced: Option<CollectionState<T>>,
}

impl<T> Default for Changes<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            tombstones: Vec::new(),
            replaced: None,
        }
    }
}

impl<T> Changes<T> {
    fn is_empty(&self) -> bool {
        self.records.is_empty() && self.tombstones.is_empty() && self.replaced.is_none()
    }

    fn revert(self, state: &mut CollectionState<T>) {
        if let Some(previous) = self.replaced {
            *state = previous;
            return;
        }
        for (id, previous) in self.records.into_iter().rev() {
            match previous {
                Some(record) => state.records.insert(id, record),
                None => state.records.remove(&id),
            };
        }
        for (id, was_deleted) in self.tombstones.into_iter().rev() {
            if was_deleted {
                state.deleted.insert(id);
            } else {
                state.deleted.remove(&id);
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotRef<'a, T> {
    format_version: u32,
    records: Vec<&'a T>,
    deleted: &'a BTreeSet<RecordId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<T> {
    format_version: u32,
    records: Vec<T>,
    #[serde(default)]
    deleted: BTreeSet<RecordId>,
}

struct Inner<T> {
    name: CollectionName,
    key: String,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    state: Mutex<CollectionState<T>>,
}

/// Handle to one collection's local state. Clones share the same state.
pub struct LocalStore<T: Record> {
    inner: Arc<Inner<T>>,
}

impl<T: Record> Clone for LocalStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> std::fmt::Debug for LocalStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Record> LocalStore<T> {
    /// Open a collection, restoring whatever was persisted for it.
    pub fn open(
        name: impl Into<CollectionName>,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let name = name.into();
        let key = format!("collections/{name}.json");

        let state = match storage.read(&key)? {
            Some(bytes) => {
                let snapshot: Snapshot<T> = serde_json::from_slice(&bytes)?;
                if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
                    return Err(Error::Serialization(format!(
                        "collection '{name}' was written by format version {}, this build reads up to {}",
                        snapshot.format_version, SNAPSHOT_FORMAT_VERSION
                    )));
                }
                CollectionState {
                    records: snapshot
                        .records
                        .into_iter()
                        .map(|r| (r.id().to_string(), r))
                        .collect(),
                    deleted: snapshot.deleted,
                }
            }
            None => CollectionState::default(),
        };

        tracing::debug!(
            collection = %name,
            records = state.records.len(),
            "Opened local collection"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                key,
                storage,
                clock,
                state: Mutex::new(state),
            }),
        })
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Insert a new record or replace an existing one.
    ///
    /// Replacing stamps `updatedAt` with the current time (strictly after the
    /// previous stamp) and keeps the stored `createdAt`. New records with zero
    /// timestamps are stamped with the current time. Returns the stored copy.
    pub fn upsert(&self, mut record: T) -> Result<T> {
        let now = self.inner.clock.now();
        self.commit(|state, changes| {
            let id = record.id().to_string();
            match state.records.get(&id) {
                Some(existing) => {
                    let meta = record.meta_mut();
                    meta.created_at = existing.created_at();
                    meta.updated_at = now.max(existing.updated_at().saturating_add(1));
                }
                None => {
                    let meta = record.meta_mut();
                    if meta.updated_at == 0 {
                        meta.updated_at = now;
                    }
                    if meta.created_at == 0 {
                        meta.created_at = meta.updated_at;
                    }
                }
            }
            state.untombstone(&id, changes);
            state.put(id, record.clone(), changes);
            record
        })
    }

    /// Delete a record. Returns the removed copy, or `None` if it was absent.
    pub fn delete(&self, id: &str) -> Result<Option<T>> {
        self.commit(|state, changes| {
            let removed = state.take(id, changes)?;
            state.tombstone(id, changes);
            Some(removed)
        })
    }

    /// Forget tombstones whose delete the remote has confirmed. Returns how
    /// many were dropped.
    pub(crate) fn forget_deleted<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> Result<usize> {
        self.commit(|state, changes| {
            ids.into_iter()
                .filter(|id| state.untombstone(id, changes))
                .count()
        })
    }

    /// Number of remembered deleted ids.
    pub fn tombstone_count(&self) -> usize {
        self.inner.state.lock().deleted.len()
    }

    /// Get a record by id.
    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.state.lock().records.get(id).cloned()
    }

    /// Whether a record with `id` is stored.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.state.lock().records.contains_key(id)
    }

    /// Whether `id` was deleted on this device or by a remote delete.
    pub fn is_deleted(&self, id: &str) -> bool {
        self.inner.state.lock().deleted.contains(id)
    }

    /// All records in the collection's display order.
    pub fn list(&self) -> Vec<T> {
        let mut records: Vec<T> = self.inner.state.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.sort_cmp(b));
        records
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.state.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every record and tombstone, in memory and on disk.
    pub fn reset(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        self.inner.storage.remove(&self.inner.key)?;
        *state = CollectionState::default();
        tracing::info!(collection = %self.inner.name, "Local collection reset");
        Ok(())
    }

    /// Apply a realtime insert. Only adds the record when the id is neither
    /// stored nor deleted locally.
    pub(crate) fn apply_remote_insert(&self, record: T) -> Result<Applied> {
        self.commit(|state, changes| {
            let id = record.id();
            if state.deleted.contains(id) {
                return Applied::Skipped(Skipped::Deleted);
            }
            if state.records.contains_key(id) {
                return Applied::Skipped(Skipped::AlreadyPresent);
            }
            state.put(id.to_string(), record, changes);
            Applied::Inserted
        })
    }

    /// Apply a realtime update through the conflict resolver.
    pub(crate) fn apply_remote_update(&self, record: T) -> Result<Applied> {
        self.commit(|state, changes| {
            let id = record.id();
            if state.deleted.contains(id) {
                return Applied::Skipped(Skipped::Deleted);
            }
            let existing = state.records.get(id);
            let existed = existing.is_some();
            match resolve::resolve(existing, &record) {
                Resolution::KeepLocal => Applied::Skipped(Skipped::Stale),
                Resolution::TakeRemote => {
                    state.put(id.to_string(), record, changes);
                    if existed {
                        Applied::Updated
                    } else {
                        Applied::Inserted
                    }
                }
            }
        })
    }

    /// Apply a realtime delete. Deletes are terminal: the record is removed
    /// regardless of timestamps and the id is remembered as deleted.
    pub(crate) fn apply_remote_delete(&self, id: &str) -> Result<Applied> {
        self.commit(|state, changes| {
            let removed = state.take(id, changes).is_some();
            state.tombstone(id, changes);
            if removed {
                Applied::Removed
            } else {
                Applied::Skipped(Skipped::Absent)
            }
        })
    }

    /// Replace the collection with the merge of its current contents and a
    /// full remote snapshot.
    ///
    /// Tombstones for ids the snapshot no longer holds are dropped: the
    /// remote has the delete, so nothing can bring those records back.
    pub(crate) fn merge_remote(&self, remote: Vec<T>) -> Result<MergeReport> {
        self.commit(|state, changes| {
            let remote_ids: BTreeSet<RecordId> =
                remote.iter().map(|r| r.id().to_string()).collect();
            changes.replaced = Some(state.clone());

            let local = std::mem::take(&mut state.records);
            let (merged, mut report) = resolve::merge_by_id(local, remote, &state.deleted);
            state.records = merged;

            let before = state.deleted.len();
            state.deleted.retain(|id| remote_ids.contains(id));
            report.tombstones_cleared = before - state.deleted.len();
            report
        })
    }

    /// Apply `mutate` in place, recording what it touched. If it changed
    /// anything the collection is persisted; when that fails the touched
    /// entries are restored and the error is returned.
    fn commit<R>(&self, mutate: impl FnOnce(&mut CollectionState<T>, &mut Changes<T>) -> R) -> Result<R> {
        let mut state = self.inner.state.lock();
        let mut changes = Changes::default();
        let result = mutate(&mut state, &mut changes);
        if changes.is_empty() {
            return Ok(result);
        }
        if let Err(e) = self.persist(&state) {
            changes.revert(&mut state);
            return Err(e);
        }
        Ok(result)
    }

    fn persist(&self, state: &CollectionState<T>) -> Result<()> {
        let snapshot = SnapshotRef {
            format_version: SNAPSHOT_FORMAT_VERSION,
            records: state.records.values().collect(),
            deleted: &state.deleted,
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        self.inner.storage.write(&self.inner.key, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::models::LoveNote;
    use crate::record::RecordMeta;
    use crate::storage::MemoryStorage;

    fn note(id: &str, updated_at: u64, content: &str) -> LoveNote {
        LoveNote {
            meta: RecordMeta::at(id, updated_at, updated_at),
            author_id: "sam".into(),
            content: content.into(),
            read: false,
        }
    }

    fn open_with(storage: &MemoryStorage, clock: &Arc<ManualClock>) -> LocalStore<LoveNote> {
        LocalStore::open(
            LoveNote::COLLECTION,
            Arc::new(storage.clone()),
            clock.clone(),
        )
        .unwrap()
    }

    fn test_store() -> (LocalStore<LoveNote>, Arc<ManualClock>, MemoryStorage) {
        let storage = MemoryStorage::new();
        let clock = Arc::new(ManualClock::new(1_000));
        (open_with(&storage, &clock), clock, storage)
    }

    /// Storage whose writes always fail.
    struct BrokenStorage;

    impl Storage for BrokenStorage {
        fn read(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }
        fn write(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn append(&self, _key: &str, _bytes: &[u8]) -> Result<()> {
            Err(Error::Storage("disk full".into()))
        }
        fn remove(&self, _key: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn insert_stamps_new_records() {
        let (store, _, _) = test_store();

        let stored = store.upsert(LoveNote::new("sam", "hello")).unwrap();

        assert_eq!(stored.meta.created_at, 1_000);
        assert_eq!(stored.meta.updated_at, 1_000);
        assert_eq!(store.get(&stored.meta.id), Some(stored));
    }

    #[test]
    fn insert_keeps_explicit_timestamps() {
        let (store, _, _) = test_store();

        let stored = store.upsert(note("n1", 100, "hi")).unwrap();

        assert_eq!(stored.meta.updated_at, 100);
        assert_eq!(stored.meta.created_at, 100);
    }

    #[test]
    fn replace_restamps_and_keeps_created_at() {
        let (store, clock, _) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();

        clock.set(5_000);
        let mut edited = note("n1", 100, "hi there");
        edited.meta.created_at = 42; // ignored
        let stored = store.upsert(edited).unwrap();

        assert_eq!(stored.meta.created_at, 100);
        assert_eq!(stored.meta.updated_at, 5_000);
        assert_eq!(store.get("n1").unwrap().content, "hi there");
    }

    #[test]
    fn replace_is_monotonic_when_clock_stalls() {
        let (store, clock, _) = test_store();
        store.upsert(note("n1", 9_000, "future")).unwrap();

        clock.set(1_000);
        let stored = store.upsert(note("n1", 0, "edit")).unwrap();

        assert_eq!(stored.meta.updated_at, 9_001);
    }

    #[test]
    fn delete_remembers_the_id() {
        let (store, _, _) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();

        let removed = store.delete("n1").unwrap();

        assert_eq!(removed.unwrap().content, "hi");
        assert!(store.get("n1").is_none());
        assert!(store.is_deleted("n1"));
        assert_eq!(store.delete("n1").unwrap(), None);
    }

    #[test]
    fn list_uses_collection_order() {
        let (store, _, _) = test_store();
        store.upsert(note("old", 100, "old")).unwrap();
        store.upsert(note("new", 300, "new")).unwrap();
        store.upsert(note("mid", 200, "mid")).unwrap();

        let ids: Vec<_> = store.list().into_iter().map(|n| n.meta.id).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn state_survives_reopen() {
        let (store, clock, storage) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();
        store.upsert(note("n2", 200, "there")).unwrap();
        store.delete("n2").unwrap();
        drop(store);

        let reopened = open_with(&storage, &clock);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("n1").unwrap().content, "hi");
        assert!(reopened.is_deleted("n2"));
    }

    #[test]
    fn reset_clears_memory_and_disk() {
        let (store, clock, storage) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();
        store.delete("n1").unwrap();

        store.reset().unwrap();

        assert!(store.is_empty());
        assert!(!store.is_deleted("n1"));
        assert!(open_with(&storage, &clock).is_empty());
    }

    #[test]
    fn failed_persist_rolls_back() {
        let store: LocalStore<LoveNote> = LocalStore::open(
            LoveNote::COLLECTION,
            Arc::new(BrokenStorage),
            Arc::new(ManualClock::new(1)),
        )
        .unwrap();

        let result = store.upsert(note("n1", 100, "hi"));

        assert!(matches!(result, Err(Error::Storage(_))));
        assert!(store.is_empty());
    }

    #[test]
    fn newer_format_is_refused() {
        let storage = MemoryStorage::new();
        storage
            .write(
                "collections/love_notes.json",
                br#"{"formatVersion": 99, "records": []}"#,
            )
            .unwrap();

        let result: Result<LocalStore<LoveNote>> = LocalStore::open(
            LoveNote::COLLECTION,
            Arc::new(storage),
            Arc::new(ManualClock::new(1)),
        );
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn remote_insert_only_fills_gaps() {
        let (store, _, _) = test_store();
        store.upsert(note("n1", 100, "local")).unwrap();

        assert_eq!(
            store.apply_remote_insert(note("n1", 500, "remote")).unwrap(),
            Applied::Skipped(Skipped::AlreadyPresent)
        );
        assert_eq!(store.get("n1").unwrap().content, "local");

        assert_eq!(
            store.apply_remote_insert(note("n2", 100, "remote")).unwrap(),
            Applied::Inserted
        );
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn remote_insert_does_not_resurrect() {
        let (store, _, _) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();
        store.delete("n1").unwrap();

        let applied = store.apply_remote_insert(note("n1", 100, "hi")).unwrap();

        assert_eq!(applied, Applied::Skipped(Skipped::Deleted));
        assert!(store.get("n1").is_none());
    }

    #[test]
    fn remote_update_goes_through_resolver() {
        let (store, _, _) = test_store();
        store.upsert(note("n1", 100, "hi")).unwrap();

        assert_eq!(
            store.apply_remote_update(note("n1", 200, "hi there")).unwrap(),
            Applied::Updated
        );
        assert_eq!(
            store.apply_remote_update(note("n1", 150, "stale")).unwrap(),
            Applied::Skipped(Skipped::Stale)
        );
        assert_eq!(
            store.apply_remote_update(note("n1", 200, "tie")).unwrap(),
            Applied::Skipped(Skipped::Stale)
        );
        assert_eq!(store.get("n1").unwrap().content, "hi there");

        assert_eq!(
            store.apply_remote_update(note("n9", 1, "unknown")).unwrap(),
            Applied::Inserted
        );
    }

    #[test]
    fn remote_delete_is_unconditional() {
        let (store, _, _) = test_store();
        store.upsert(note("n1", 9_999, "very new")).unwrap();

        assert_eq!(store.apply_remote_delete("n1").unwrap(), Applied::Removed);
        assert!(store.get("n1").is_none());
        assert_eq!(
            store.apply_remote_delete("n1").unwrap(),
            Applied::Skipped(Skipped::Absent)
        );

        // A redelivered insert stays dead
        assert_eq!(
            store.apply_remote_insert(note("n1", 9_999, "very new")).unwrap(),
            Applied::Skipped(Skipped::Deleted)
        );
    }

    #[test]
    fn merge_replaces_collection_contents() {
        let (store, _, _) = test_store();
        store.upsert(note("offline", 100, "made offline")).unwrap();
        store.upsert(note("shared", 900, "local copy")).unwrap();

        let report = store
            .merge_remote(vec![note("shared", 100, "remote copy"), note("r", 5, "r")])
            .unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.replaced, 1);
        assert_eq!(report.local_only, 1);
        assert_eq!(store.get("shared").unwrap().content, "remote copy");
        assert_eq!(store.get("offline").unwrap().content, "made offline");
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn replace_saturates_at_the_largest_stamp() {
        let (store, _, _) = test_store();
        store.apply_remote_insert(note("n1", u64::MAX, "far future")).unwrap();

        let stored = store.upsert(note("n1", 0, "edit")).unwrap();

        assert_eq!(stored.meta.updated_at, u64::MAX);
        assert_eq!(store.get("n1").unwrap().content, "edit");
    }

    /// Storage that accepts a set number of writes, then fails.
    struct FlakyStorage {
        inner: MemoryStorage,
        writes_left: std::sync::atomic::AtomicUsize,
    }

    impl Storage for FlakyStorage {
        fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.read(key)
        }
        fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
            use std::sync::atomic::Ordering;
            let left = self.writes_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(Error::Storage("disk full".into()));
            }
            self.writes_left.store(left - 1, Ordering::SeqCst);
            self.inner.write(key, bytes)
        }
        fn append(&self, key: &str, bytes: &[u8]) -> Result<()> {
            self.inner.append(key, bytes)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn failed_persist_restores_only_touched_entries() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryStorage::new(),
            writes_left: 3.into(),
        });
        let store: LocalStore<LoveNote> =
            LocalStore::open(LoveNote::COLLECTION, storage, Arc::new(ManualClock::new(1)))
                .unwrap();
        store.upsert(note("n1", 100, "one")).unwrap();
        store.upsert(note("n2", 100, "two")).unwrap();
        store.delete("n2").unwrap();

        // Out of writes: neither change sticks
        assert!(store.upsert(note("n1", 200, "edited")).is_err());
        assert!(store.upsert(note("n2", 300, "back")).is_err());
        assert!(store.delete("n1").is_err());

        assert_eq!(store.get("n1").unwrap().content, "one");
        assert_eq!(store.get("n1").unwrap().meta.updated_at, 100);
        assert!(store.get("n2").is_none());
        assert!(store.is_deleted("n2"));
        assert!(!store.is_deleted("n1"));
    }

    #[test]
    fn confirmed_deletes_drop_their_tombstones() {
        let (store, clock, storage) = test_store();
        for i in 0..5 {
            let id = format!("n{i}");
            store.upsert(note(&id, 100, "short lived")).unwrap();
            store.delete(&id).unwrap();
        }
        assert_eq!(store.tombstone_count(), 5);

        let dropped = store.forget_deleted(["n0", "n1", "n2", "n3", "unknown"]).unwrap();

        assert_eq!(dropped, 4);
        assert_eq!(store.tombstone_count(), 1);
        assert!(store.is_deleted("n4"));
        assert_eq!(open_with(&storage, &clock).tombstone_count(), 1);
    }

    #[test]
    fn merge_clears_tombstones_the_remote_no_longer_holds() {
        let (store, _, _) = test_store();
        store.upsert(note("gone", 100, "deleted everywhere")).unwrap();
        store.upsert(note("pending", 100, "delete not delivered")).unwrap();
        store.delete("gone").unwrap();
        store.delete("pending").unwrap();
        store.apply_remote_delete("partner").unwrap();

        // The remote still has "pending"; the other deletes have landed
        let report = store
            .merge_remote(vec![note("pending", 100, "delete not delivered")])
            .unwrap();

        assert_eq!(report.skipped_deleted, 1);
        assert_eq!(report.tombstones_cleared, 2);
        assert!(store.get("pending").is_none());
        assert!(store.is_deleted("pending"));
        assert!(!store.is_deleted("gone"));
        assert!(!store.is_deleted("partner"));
    }
}
