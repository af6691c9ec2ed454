//! Per-collection sync adapter.
//!
//! A [`SyncAdapter`] wraps one [`LocalStore`] and connects it to the remote:
//!
//! - local writes apply immediately, then are pushed best-effort; a push that
//!   fails transiently is queued for replay;
//! - deliveries for one collection leave in the order the local writes were
//!   applied, even when writers run concurrently;
//! - realtime events are decoded and routed into the store;
//! - bootstrap and legacy migration reach the collection through the
//!   type-erased [`SyncedCollection`] view the engine keeps.

use crate::{
    error::{Error, RemoteError, Result},
    queue::{Mutation, OperationQueue},
    record::Record,
    remote::{ChangeEvent, RemoteStore, Subscription, SubscriptionId},
    resolve::MergeReport,
    store::{Applied, LocalStore},
    wire, CollectionName, RecordId,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Converts between a typed record and its wire representation.
pub struct RecordCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for RecordCodec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for RecordCodec<T> {}

impl<T> std::fmt::Debug for RecordCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RecordCodec")
    }
}

impl<T> Default for RecordCodec<T> {
    fn default() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T: Record> RecordCodec<T> {
    /// Record to snake_case JSON.
    pub fn encode(&self, record: &T) -> Result<Value> {
        Ok(wire::to_wire(serde_json::to_value(record)?))
    }

    /// Snake_case JSON to record.
    pub fn decode(&self, value: Value) -> Result<T> {
        Ok(serde_json::from_value(wire::from_wire(value))?)
    }
}

/// How a local write reached the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    /// Accepted by the remote directly
    Pushed,
    /// Waiting in the operation queue
    Queued,
    /// Refused by the remote; the local change is kept
    Rejected,
}

/// Result of a local upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct Write<T> {
    /// The record as stored locally
    pub record: T,
    pub delivery: Delivery,
}

/// Hands out delivery turns in the order local writes were applied.
///
/// A turn is taken in the same critical section as the local write, and a
/// delivery waits until every earlier turn has finished. Turns also count the
/// deletes still on their way to the remote, per id.
struct DeliveryOrder {
    tickets: Mutex<Tickets>,
    serving: watch::Sender<u64>,
}

#[derive(Default)]
struct Tickets {
    next: u64,
    /// Finished ahead of `serving`; skipped once it gets there
    finished: BTreeSet<u64>,
    deletes_in_flight: HashMap<RecordId, usize>,
}

impl DeliveryOrder {
    fn new() -> Self {
        let (serving, _) = watch::channel(0);
        Self {
            tickets: Mutex::new(Tickets::default()),
            serving,
        }
    }

    /// Run a local write and take the next turn with it. No turn is taken
    /// if the write fails.
    fn issue<R>(
        self: &Arc<Self>,
        deleting: Option<&str>,
        write: impl FnOnce() -> Result<R>,
    ) -> Result<(R, Turn)> {
        let mut tickets = self.tickets.lock();
        let value = write()?;

        let ticket = tickets.next;
        tickets.next += 1;
        if let Some(id) = deleting {
            *tickets.deletes_in_flight.entry(id.to_string()).or_default() += 1;
        }

        Ok((
            value,
            Turn {
                order: Arc::clone(self),
                ticket,
                deleting: deleting.map(str::to_owned),
            },
        ))
    }

    fn finish(&self, ticket: u64, deleting: Option<&str>) {
        let mut tickets = self.tickets.lock();
        if let Some(id) = deleting {
            if let Some(count) = tickets.deletes_in_flight.get_mut(id) {
                *count -= 1;
                if *count == 0 {
                    tickets.deletes_in_flight.remove(id);
                }
            }
        }

        tickets.finished.insert(ticket);
        let mut serving = *self.serving.borrow();
        while tickets.finished.remove(&serving) {
            serving += 1;
        }
        self.serving.send_replace(serving);
    }
}

/// One write's place in the delivery order. Dropping it lets the next write
/// go, including when the delivery is cancelled.
struct Turn {
    order: Arc<DeliveryOrder>,
    ticket: u64,
    deleting: Option<RecordId>,
}

impl Turn {
    async fn wait(&self) {
        let mut serving = self.order.serving.subscribe();
        // The sender lives as long as `self.order`, so this cannot fail
        let _ = serving.wait_for(|now| *now >= self.ticket).await;
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        self.order.finish(self.ticket, self.deleting.as_deref());
    }
}

struct AdapterInner<T: Record> {
    store: LocalStore<T>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    codec: RecordCodec<T>,
    order: Arc<DeliveryOrder>,
    flush_after_failed_push: bool,
}

/// Syncs one collection. Clones share the same store and queue.
pub struct SyncAdapter<T: Record> {
    inner: Arc<AdapterInner<T>>,
}

impl<T: Record> Clone for SyncAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Record> std::fmt::Debug for SyncAdapter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("collection", &self.name())
            .field("records", &self.inner.store.len())
            .finish()
    }
}

impl<T: Record> SyncAdapter<T> {
    pub fn new(
        store: LocalStore<T>,
        remote: Arc<dyn RemoteStore>,
        queue: Arc<OperationQueue>,
    ) -> Self {
        Self {
            inner: Arc::new(AdapterInner {
                store,
                remote,
                queue,
                codec: RecordCodec::default(),
                order: Arc::new(DeliveryOrder::new()),
                flush_after_failed_push: true,
            }),
        }
    }

    /// Whether a failed push triggers an immediate replay attempt.
    /// Only takes effect before the adapter is cloned.
    pub fn flush_after_failed_push(mut self, enabled: bool) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.flush_after_failed_push = enabled;
        }
        self
    }

    /// Collection name.
    pub fn name(&self) -> &str {
        self.inner.store.name()
    }

    /// The underlying local store.
    pub fn store(&self) -> &LocalStore<T> {
        &self.inner.store
    }

    pub fn codec(&self) -> RecordCodec<T> {
        self.inner.codec
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.store.get(id)
    }

    pub fn list(&self) -> Vec<T> {
        self.inner.store.list()
    }

    /// Write a record locally, then push it.
    ///
    /// Only a local persistence failure is returned as an error. Network
    /// trouble is absorbed by the queue and reported through
    /// [`Write::delivery`].
    pub async fn upsert(&self, record: T) -> Result<Write<T>> {
        let (stored, turn) = self
            .inner
            .order
            .issue(None, || self.inner.store.upsert(record))?;
        let payload = self.inner.codec.encode(&stored)?;
        let delivery = self.deliver(&turn, Mutation::Upsert { record: payload }).await?;
        Ok(Write {
            record: stored,
            delivery,
        })
    }

    /// Delete a record locally, then propagate the delete.
    ///
    /// The id stays tombstoned until the remote confirms the delete.
    pub async fn delete(&self, id: &str) -> Result<Delivery> {
        let (_, turn) = self
            .inner
            .order
            .issue(Some(id), || self.inner.store.delete(id))?;
        let delivery = self.deliver(&turn, Mutation::Delete { id: id.to_string() }).await;
        drop(turn);

        let delivery = delivery?;
        if delivery != Delivery::Rejected {
            self.forget_confirmed_deletes(&[id.to_string()])?;
        }
        Ok(delivery)
    }

    /// Fetch and decode the remote copy of the collection. Records that do
    /// not decode are skipped.
    pub async fn pull(&self) -> Result<Vec<T>> {
        let raw = self.inner.remote.pull(self.name()).await?;
        Ok(self.decode_all(raw))
    }

    /// Route one realtime event into the local store.
    pub fn apply_event(&self, event: ChangeEvent) -> Result<Applied> {
        let store = &self.inner.store;
        match event {
            ChangeEvent::Insert { record } => {
                store.apply_remote_insert(self.inner.codec.decode(record)?)
            }
            ChangeEvent::Update { record } => {
                store.apply_remote_update(self.inner.codec.decode(record)?)
            }
            ChangeEvent::Delete { id } => store.apply_remote_delete(&id),
        }
    }

    /// Open a realtime subscription and start applying its events.
    pub async fn subscribe(&self) -> Result<SubscriptionHandle> {
        let subscription = self.inner.remote.subscribe(self.name()).await?;
        Ok(self.listen(subscription))
    }

    /// Start a task that applies every event from `subscription`.
    pub fn listen(&self, subscription: Subscription) -> SubscriptionHandle {
        let Subscription {
            id,
            collection,
            mut events,
        } = subscription;
        let adapter = self.clone();

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let record_id = event.record_id().map(str::to_owned);
                match adapter.apply_event(event) {
                    Ok(applied) => tracing::trace!(
                        collection = %adapter.name(),
                        id = ?record_id,
                        ?applied,
                        "Applied remote change"
                    ),
                    Err(e @ Error::Serialization(_)) => tracing::warn!(
                        collection = %adapter.name(),
                        id = ?record_id,
                        error = %e,
                        "Skipping undecodable remote change"
                    ),
                    Err(e) => tracing::error!(
                        collection = %adapter.name(),
                        id = ?record_id,
                        error = %e,
                        "Failed to apply remote change"
                    ),
                }
            }
            tracing::debug!(collection = %adapter.name(), "Change feed ended");
        });

        SubscriptionHandle {
            id,
            collection,
            remote: Arc::clone(&self.inner.remote),
            task,
            closed: false,
        }
    }

    /// Push every local record. Stops at the first failure.
    ///
    /// Takes a single delivery turn, so local writes made meanwhile reach
    /// the remote after the records listed here.
    pub async fn push_all(&self) -> Result<usize> {
        let (records, turn) = self
            .inner
            .order
            .issue(None, || Ok(self.inner.store.list()))?;
        turn.wait().await;

        for record in &records {
            let payload = self.inner.codec.encode(record)?;
            self.inner
                .remote
                .push(self.name(), payload)
                .await
                .map_err(|e| Error::Migration {
                    collection: self.name().to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(records.len())
    }

    /// Drop tombstones for deletes the remote has accepted. An id is kept
    /// while another delete of it is still in flight or queued.
    fn forget_confirmed_deletes(&self, ids: &[RecordId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        // Hold the turn lock so no new delete of these ids slips in between
        // the check and the prune.
        let tickets = self.inner.order.tickets.lock();
        let queued: BTreeSet<String> = self
            .inner
            .queue
            .pending_for(self.name())
            .iter()
            .filter_map(|op| op.mutation.record_id().map(str::to_owned))
            .collect();
        let settled = ids.iter().map(String::as_str).filter(|id| {
            !queued.contains(*id) && !tickets.deletes_in_flight.contains_key(*id)
        });
        let dropped = self.inner.store.forget_deleted(settled)?;
        if dropped > 0 {
            tracing::trace!(collection = %self.name(), dropped, "Tombstones cleared");
        }
        Ok(())
    }

    fn decode_all(&self, raw: Vec<Value>) -> Vec<T> {
        raw.into_iter()
            .filter_map(|value| {
                let id = wire::wire_id(&value).map(str::to_owned);
                match self.inner.codec.decode(value) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        tracing::warn!(
                            collection = %self.name(),
                            id = ?id,
                            error = %e,
                            "Skipping undecodable remote record"
                        );
                        None
                    }
                }
            })
            .collect()
    }

    async fn deliver(&self, turn: &Turn, mutation: Mutation) -> Result<Delivery> {
        turn.wait().await;

        let name = self.name();
        let queue = &self.inner.queue;

        // Anything already queued for this collection must reach the remote
        // first, so the new write goes behind it.
        if queue.has_pending(name) {
            queue.enqueue(name, mutation)?;
            self.flush_quietly().await;
            return Ok(Delivery::Queued);
        }

        let outcome = match &mutation {
            Mutation::Upsert { record } => self.inner.remote.push(name, record.clone()).await,
            Mutation::Delete { id } => self.inner.remote.delete(name, id).await,
        };

        match outcome {
            Ok(()) => Ok(Delivery::Pushed),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    collection = %name,
                    id = ?mutation.record_id(),
                    error = %e,
                    "Push failed, queued for retry"
                );
                queue.enqueue(name, mutation)?;
                if self.inner.flush_after_failed_push {
                    self.flush_quietly().await;
                }
                Ok(Delivery::Queued)
            }
            Err(e) => {
                tracing::error!(
                    collection = %name,
                    id = ?mutation.record_id(),
                    error = %e,
                    "Remote rejected write"
                );
                Ok(Delivery::Rejected)
            }
        }
    }

    async fn flush_quietly(&self) {
        match self
            .inner
            .queue
            .flush_collection(self.inner.remote.as_ref(), self.name())
            .await
        {
            Ok(report) => {
                if let Some(ids) = report.confirmed_deletes.get(self.name()) {
                    if let Err(e) = self.forget_confirmed_deletes(ids) {
                        tracing::error!(collection = %self.name(), error = %e, "Could not clear tombstones");
                    }
                }
            }
            Err(e) => {
                tracing::error!(collection = %self.name(), error = %e, "Queue replay failed");
            }
        }
    }
}

/// A running change feed for one collection.
///
/// [`close`](SubscriptionHandle::close) stops applying events and waits for
/// the remote unsubscribe. Dropping the handle stops applying events and
/// unsubscribes in the background.
pub struct SubscriptionHandle {
    id: SubscriptionId,
    collection: CollectionName,
    remote: Arc<dyn RemoteStore>,
    task: JoinHandle<()>,
    closed: bool,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("active", &self.is_active())
            .finish()
    }
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop applying events and close the remote subscription.
    pub async fn close(mut self) {
        self.task.abort();
        self.remote.unsubscribe(self.id).await;
        self.closed = true;
        tracing::debug!(collection = %self.collection, subscription = %self.id, "Subscription handle closed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.task.abort();
        if self.closed {
            return;
        }
        // Without a runtime there is nothing left to tell the remote with
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let remote = Arc::clone(&self.remote);
            let id = self.id;
            runtime.spawn(async move {
                remote.unsubscribe(id).await;
            });
        }
    }
}

/// Type-erased view of a [`SyncAdapter`] used by the engine.
#[async_trait]
pub(crate) trait SyncedCollection: Send + Sync {
    fn name(&self) -> &str;

    /// Raw remote snapshot for bootstrap.
    async fn fetch_remote(&self) -> std::result::Result<Vec<Value>, RemoteError>;

    /// Decode a bootstrap snapshot and merge it into the store.
    fn merge_fetched(&self, raw: Vec<Value>) -> Result<MergeReport>;

    async fn open_subscription(&self) -> std::result::Result<Subscription, RemoteError>;

    fn listen(&self, subscription: Subscription) -> SubscriptionHandle;

    async fn push_all(&self) -> Result<usize>;

    /// Clear tombstones for deletes a queue replay delivered.
    fn forget_confirmed_deletes(&self, ids: &[RecordId]) -> Result<()>;

    fn reset(&self) -> Result<()>;
}

#[async_trait]
impl<T: Record> SyncedCollection for SyncAdapter<T> {
    fn name(&self) -> &str {
        SyncAdapter::<T>::name(self)
    }

    async fn fetch_remote(&self) -> std::result::Result<Vec<Value>, RemoteError> {
        self.inner.remote.pull(self.name()).await
    }

    fn merge_fetched(&self, raw: Vec<Value>) -> Result<MergeReport> {
        let records = self.decode_all(raw);
        self.inner.store.merge_remote(records)
    }

    async fn open_subscription(&self) -> std::result::Result<Subscription, RemoteError> {
        self.inner.remote.subscribe(self.name()).await
    }

    fn listen(&self, subscription: Subscription) -> SubscriptionHandle {
        SyncAdapter::<T>::listen(self, subscription)
    }

    async fn push_all(&self) -> Result<usize> {
        SyncAdapter::<T>::push_all(self).await
    }

    fn forget_confirmed_deletes(&self, ids: &[RecordId]) -> Result<()> {
        SyncAdapter::<T>::forget_confirmed_deletes(self, ids)
    }

    fn reset(&self) -> Result<()> {
        self.inner.store.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::{MemoryLink, MemoryRemote};
    use crate::models::LoveNote;
    use crate::queue::DEFAULT_COMPACT_THRESHOLD;
    use crate::record::RecordMeta;
    use crate::storage::MemoryStorage;
    use crate::store::Skipped;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        adapter: SyncAdapter<LoveNote>,
        remote: MemoryRemote,
        link: MemoryLink,
        queue: Arc<OperationQueue>,
    }

    fn fixture() -> Fixture {
        let storage: Arc<MemoryStorage> = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let remote = MemoryRemote::new();
        let link = remote.link();
        let queue = Arc::new(
            OperationQueue::open(storage.clone(), clock.clone(), DEFAULT_COMPACT_THRESHOLD)
                .unwrap(),
        );
        let store = LocalStore::open(LoveNote::COLLECTION, storage, clock).unwrap();
        let adapter = SyncAdapter::new(store, Arc::new(link.clone()), queue.clone());
        Fixture {
            adapter,
            remote,
            link,
            queue,
        }
    }

    fn adapter_over(remote: Arc<dyn RemoteStore>) -> (SyncAdapter<LoveNote>, Arc<OperationQueue>) {
        let storage = Arc::new(MemoryStorage::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let queue = Arc::new(
            OperationQueue::open(storage.clone(), clock.clone(), DEFAULT_COMPACT_THRESHOLD)
                .unwrap(),
        );
        let store = LocalStore::open(LoveNote::COLLECTION, storage, clock).unwrap();
        (SyncAdapter::new(store, remote, queue.clone()), queue)
    }

    /// Remote whose first calls are slow and/or time out before reaching
    /// the shared store.
    struct Scripted {
        inner: MemoryRemote,
        delay: Duration,
        slow: AtomicUsize,
        failing: AtomicUsize,
    }

    impl Scripted {
        fn new(inner: MemoryRemote, delay: Duration, slow: usize, failing: usize) -> Self {
            Self {
                inner,
                delay,
                slow: slow.into(),
                failing: failing.into(),
            }
        }

        async fn gate(&self) -> std::result::Result<(), RemoteError> {
            let take = |counter: &AtomicUsize| {
                counter
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            };
            if take(&self.slow) {
                tokio::time::sleep(self.delay).await;
            }
            if take(&self.failing) {
                return Err(RemoteError::Timeout);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl RemoteStore for Scripted {
        async fn push(&self, collection: &str, record: Value) -> std::result::Result<(), RemoteError> {
            self.gate().await?;
            self.inner.push(collection, record).await
        }
        async fn pull(&self, collection: &str) -> std::result::Result<Vec<Value>, RemoteError> {
            self.inner.pull(collection).await
        }
        async fn delete(&self, collection: &str, id: &str) -> std::result::Result<(), RemoteError> {
            self.gate().await?;
            self.inner.delete(collection, id).await
        }
        async fn subscribe(&self, collection: &str) -> std::result::Result<Subscription, RemoteError> {
            self.inner.subscribe(collection).await
        }
        async fn unsubscribe(&self, id: SubscriptionId) {
            self.inner.unsubscribe(id).await
        }
    }

    fn note(id: &str, updated_at: u64, content: &str) -> LoveNote {
        LoveNote {
            meta: RecordMeta::at(id, 1, updated_at),
            author_id: "sam".into(),
            content: content.into(),
            read: false,
        }
    }

    #[test]
    fn codec_uses_snake_case_on_the_wire() {
        let codec = RecordCodec::<LoveNote>::default();
        let wire = codec.encode(&note("n1", 5, "hi")).unwrap();

        assert_eq!(wire["author_id"], "sam");
        assert_eq!(wire["updated_at"], 5);
        assert!(wire.get("authorId").is_none());

        let back = codec.decode(wire).unwrap();
        assert_eq!(back, note("n1", 5, "hi"));
    }

    #[tokio::test]
    async fn online_upsert_pushes_directly() {
        let f = fixture();

        let write = f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();

        assert_eq!(write.delivery, Delivery::Pushed);
        assert_eq!(f.remote.get("love_notes", "n1").unwrap()["content"], "hi");
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn offline_upsert_is_kept_and_queued() {
        let f = fixture();
        f.link.set_online(false);

        let write = f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();

        assert_eq!(write.delivery, Delivery::Queued);
        assert_eq!(f.adapter.get("n1").unwrap().content, "hi");
        assert_eq!(f.queue.len(), 1);
        assert_eq!(f.remote.len("love_notes"), 0);
    }

    #[tokio::test]
    async fn writes_queue_behind_pending_ones() {
        let f = fixture();
        f.link.set_online(false);
        f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();

        // Back online, but the earlier write is still queued
        f.link.set_online(true);
        let delivery = f.adapter.delete("n1").await.unwrap();

        assert_eq!(delivery, Delivery::Queued);
        assert!(f.queue.is_empty());
        assert!(f.remote.get("love_notes", "n1").is_none());
        assert_eq!(f.remote.stats().writes_applied, 1);
        assert_eq!(f.remote.stats().deletes_applied, 1);
        assert!(!f.adapter.store().is_deleted("n1"));
    }

    #[tokio::test]
    async fn rejected_write_is_not_queued() {
        let f = fixture();
        let (_, turn) = f.adapter.inner.order.issue(None, || Ok(())).unwrap();
        // A record the remote refuses: no id once encoded
        let delivery = f
            .adapter
            .deliver(
                &turn,
                Mutation::Upsert {
                    record: json!("garbage"),
                },
            )
            .await;

        assert!(matches!(delivery, Ok(Delivery::Rejected)));
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn pull_skips_undecodable_records() {
        let f = fixture();
        f.remote
            .push("love_notes", f.adapter.codec().encode(&note("ok", 1, "fine")).unwrap())
            .await
            .unwrap();
        f.remote
            .push("love_notes", json!({"id": "bad", "updated_at": "yesterday"}))
            .await
            .unwrap();

        let pulled = f.adapter.pull().await.unwrap();

        assert_eq!(pulled.len(), 1);
        assert_eq!(pulled[0].meta.id, "ok");
    }

    #[tokio::test]
    async fn events_route_through_the_store() {
        let f = fixture();
        let codec = f.adapter.codec();
        f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();

        let stale = ChangeEvent::Update {
            record: codec.encode(&note("n1", 50, "old")).unwrap(),
        };
        assert_eq!(
            f.adapter.apply_event(stale).unwrap(),
            Applied::Skipped(Skipped::Stale)
        );

        let bad = ChangeEvent::Insert {
            record: json!({"id": 3}),
        };
        assert!(matches!(
            f.adapter.apply_event(bad),
            Err(Error::Serialization(_))
        ));

        let delete = ChangeEvent::Delete { id: "n1".into() };
        assert_eq!(f.adapter.apply_event(delete).unwrap(), Applied::Removed);
    }

    #[tokio::test]
    async fn subscription_applies_other_peers_writes() {
        let f = fixture();
        let handle = f.adapter.subscribe().await.unwrap();
        assert!(handle.is_active());

        let codec = f.adapter.codec();
        f.remote
            .push("love_notes", codec.encode(&note("n9", 100, "from partner")).unwrap())
            .await
            .unwrap();

        for _ in 0..50 {
            if f.adapter.get("n9").is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.adapter.get("n9").unwrap().content, "from partner");

        handle.close().await;
        assert_eq!(f.remote.subscriber_count("love_notes"), 0);
    }

    #[tokio::test]
    async fn push_all_reports_failures_as_migration_errors() {
        let f = fixture();
        f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();
        f.adapter.upsert(note("n2", 100, "there")).await.unwrap();

        f.link.set_online(false);
        assert!(matches!(
            f.adapter.push_all().await,
            Err(Error::Migration { .. })
        ));

        f.link.set_online(true);
        assert_eq!(f.adapter.push_all().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn later_delete_waits_for_a_slow_failing_upsert() {
        let remote = MemoryRemote::new();
        let scripted = Arc::new(Scripted::new(remote.clone(), Duration::from_millis(100), 1, 1));
        let (adapter, queue) = adapter_over(scripted);

        let writer = adapter.clone();
        let upsert = tokio::spawn(async move {
            writer.upsert(note("a", 100, "hi")).await.map(|w| w.delivery)
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        let deleted = adapter.delete("a").await.unwrap();
        let upserted = upsert.await.unwrap().unwrap();

        assert_eq!(upserted, Delivery::Queued);
        assert_eq!(deleted, Delivery::Pushed);
        assert!(adapter.get("a").is_none());
        assert!(remote.get("love_notes", "a").is_none());
        assert!(queue.is_empty());
        assert_eq!(adapter.store().tombstone_count(), 0);
    }

    #[tokio::test]
    async fn delete_during_a_replay_lands_after_it() {
        let remote = MemoryRemote::new();
        let scripted = Arc::new(Scripted::new(remote.clone(), Duration::from_millis(50), 1, 0));
        let (adapter, queue) = adapter_over(scripted.clone());

        // Written while offline
        let stored = adapter.store().upsert(note("a", 100, "hi")).unwrap();
        queue
            .enqueue(
                "love_notes",
                Mutation::Upsert {
                    record: adapter.codec().encode(&stored).unwrap(),
                },
            )
            .unwrap();

        let replay = {
            let queue = queue.clone();
            let scripted = scripted.clone();
            tokio::spawn(async move { queue.flush(scripted.as_ref()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let deleted = adapter.delete("a").await.unwrap();
        let report = replay.await.unwrap().unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(deleted, Delivery::Queued);
        assert!(queue.is_empty());
        assert!(remote.get("love_notes", "a").is_none());
        assert_eq!(remote.stats().deletes_applied, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_leave_both_sides_equal() {
        let remote = MemoryRemote::new();
        let scripted = Arc::new(Scripted::new(remote.clone(), Duration::from_millis(5), 8, 3));
        let (adapter, queue) = adapter_over(scripted.clone());

        let tasks: Vec<_> = (0..16u64)
            .map(|i| {
                let adapter = adapter.clone();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        adapter.upsert(note("shared", 100 + i, "edit")).await.map(|w| w.delivery)
                    } else {
                        adapter.delete("shared").await
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        queue.flush(scripted.as_ref()).await.unwrap();

        assert!(queue.is_empty());
        match (adapter.get("shared"), remote.get("love_notes", "shared")) {
            (Some(local), Some(stored)) => assert_eq!(stored["updated_at"], local.meta.updated_at),
            (None, None) => {}
            (local, stored) => panic!("diverged: local {local:?}, remote {stored:?}"),
        }
    }

    #[tokio::test]
    async fn pushed_deletes_leave_no_tombstones() {
        let f = fixture();
        for i in 0..20 {
            let id = format!("n{i}");
            f.adapter.upsert(note(&id, 100, "short lived")).await.unwrap();
            assert_eq!(f.adapter.delete(&id).await.unwrap(), Delivery::Pushed);
        }

        assert_eq!(f.adapter.store().tombstone_count(), 0);
    }

    #[tokio::test]
    async fn queued_delete_keeps_its_tombstone_until_replayed() {
        let f = fixture();
        f.adapter.upsert(note("n1", 100, "hi")).await.unwrap();
        f.link.set_online(false);

        assert_eq!(f.adapter.delete("n1").await.unwrap(), Delivery::Queued);
        assert!(f.adapter.store().is_deleted("n1"));

        // The next write replays the queue ahead of itself
        f.link.set_online(true);
        f.adapter.upsert(note("n2", 100, "there")).await.unwrap();

        assert!(f.queue.is_empty());
        assert!(!f.adapter.store().is_deleted("n1"));
        assert!(f.remote.get("love_notes", "n1").is_none());
    }

    #[tokio::test]
    async fn dropped_handle_unsubscribes() {
        let f = fixture();
        let handle = f.adapter.subscribe().await.unwrap();
        assert_eq!(f.remote.subscriber_count("love_notes"), 1);

        drop(handle);

        for _ in 0..50 {
            if f.remote.subscriber_count("love_notes") == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.remote.subscriber_count("love_notes"), 0);
    }
}
