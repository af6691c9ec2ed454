//! Offline operation queue.
//!
//! Mutations that could not reach the remote are recorded here and replayed
//! later, strictly in enqueue order per collection.
//!
//! On disk the queue is an append-only log of JSON lines (`queue/ops.log`).
//! Each line is either an `enqueued` entry carrying a full operation or an
//! `acked` entry naming a sequence number. A separate cursor (`queue/cursor`)
//! holds the low-water mark: every sequence below it is acknowledged. Replay
//! skips everything below the cursor, drops acknowledged entries and tolerates
//! a torn final line left by a crash mid-append.

use crate::{
    clock::Clock,
    error::{Error, Result},
    remote::RemoteStore,
    storage::Storage,
    wire, CollectionName, RecordId, Seq, Timestamp,
};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const LOG_KEY: &str = "queue/ops.log";
const CURSOR_KEY: &str = "queue/cursor";

/// Default number of acknowledged log entries tolerated before compaction.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 256;

/// A change to replay against the remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Mutation {
    /// Push a record, in wire format
    Upsert { record: Value },
    /// Delete a record by id
    Delete { id: RecordId },
}

impl Mutation {
    pub fn record_id(&self) -> Option<&str> {
        match self {
            Mutation::Upsert { record } => wire::wire_id(record),
            Mutation::Delete { id } => Some(id),
        }
    }
}

/// An operation waiting for remote acknowledgment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    /// Position in the queue, unique and increasing
    pub seq: Seq,
    /// Target collection
    pub collection: CollectionName,
    pub mutation: Mutation,
    /// When the operation was queued
    pub enqueued_at: Timestamp,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "lowercase")]
enum LogEntry {
    Enqueued { op: PendingOperation },
    Acked { seq: Seq },
}

/// Result of a flush.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushReport {
    /// Operations the remote accepted
    pub delivered: usize,
    /// Operations the remote rejected permanently, now discarded
    pub dropped: usize,
    /// Collections whose replay stopped on a transient failure
    pub halted: Vec<CollectionName>,
    /// Operations still queued after the flush
    pub remaining: usize,
    /// Ids whose queued delete the remote accepted, per collection
    pub confirmed_deletes: BTreeMap<CollectionName, Vec<RecordId>>,
}

impl FlushReport {
    /// True when nothing is left in the queue.
    pub fn is_drained(&self) -> bool {
        self.remaining == 0
    }

    fn absorb(&mut self, other: FlushReport) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
        self.halted.extend(other.halted);
        for (collection, ids) in other.confirmed_deletes {
            self.confirmed_deletes.entry(collection).or_default().extend(ids);
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    live: BTreeMap<Seq, PendingOperation>,
    next_seq: Seq,
    cursor: Seq,
    /// `acked` lines currently in the log
    acked_in_log: usize,
}

impl QueueState {
    fn low_water_mark(&self) -> Seq {
        self.live.keys().next().copied().unwrap_or(self.next_seq)
    }
}

/// Durable FIFO of operations awaiting the remote.
pub struct OperationQueue {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    compact_threshold: usize,
    state: Mutex<QueueState>,
    flush_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("OperationQueue")
            .field("pending", &state.live.len())
            .field("next_seq", &state.next_seq)
            .field("cursor", &state.cursor)
            .finish()
    }
}

impl OperationQueue {
    /// Open the queue and replay its log.
    pub fn open(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        compact_threshold: usize,
    ) -> Result<Self> {
        let cursor = match storage.read(CURSOR_KEY)? {
            Some(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                text.trim()
                    .parse::<Seq>()
                    .map_err(|e| Error::InvalidLog(format!("cursor '{}': {e}", text.trim())))?
            }
            None => 0,
        };

        let mut state = QueueState {
            cursor,
            next_seq: cursor,
            ..QueueState::default()
        };
        let mut needs_rewrite = false;

        if let Some(bytes) = storage.read(LOG_KEY)? {
            let lines: Vec<&[u8]> = bytes
                .split(|b| *b == b'\n')
                .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
                .collect();
            let last = lines.len().saturating_sub(1);
            let torn_tail = !bytes.is_empty() && !bytes.ends_with(b"\n");

            for (index, line) in lines.into_iter().enumerate() {
                match serde_json::from_slice::<LogEntry>(line) {
                    Ok(LogEntry::Enqueued { op }) => {
                        state.next_seq = state.next_seq.max(op.seq.saturating_add(1));
                        if op.seq >= cursor {
                            state.live.insert(op.seq, op);
                        }
                    }
                    Ok(LogEntry::Acked { seq }) => {
                        state.next_seq = state.next_seq.max(seq.saturating_add(1));
                        state.live.remove(&seq);
                        needs_rewrite = true;
                    }
                    Err(e) if index == last && torn_tail => {
                        tracing::warn!(error = %e, "Ignoring torn final entry in operation log");
                        needs_rewrite = true;
                    }
                    Err(e) => {
                        tracing::error!(line = index + 1, error = %e, "Discarding unreadable operation log entry");
                        needs_rewrite = true;
                    }
                }
            }
        }

        let queue = Self {
            storage,
            clock,
            compact_threshold: compact_threshold.max(1),
            state: Mutex::new(state),
            flush_lock: tokio::sync::Mutex::new(()),
        };

        {
            let mut state = queue.state.lock();
            if needs_rewrite {
                queue.rewrite(&mut state)?;
            }
            tracing::debug!(
                pending = state.live.len(),
                cursor = state.cursor,
                "Operation queue replayed"
            );
        }

        Ok(queue)
    }

    /// Append an operation. It is durable once this returns.
    pub fn enqueue(
        &self,
        collection: impl Into<CollectionName>,
        mutation: Mutation,
    ) -> Result<PendingOperation> {
        let collection = collection.into();
        if mutation.record_id().is_none() {
            return Err(Error::Serialization(
                "queued record has no string id".into(),
            ));
        }

        let mut state = self.state.lock();
        let next_seq = state
            .next_seq
            .checked_add(1)
            .ok_or_else(|| Error::InvalidLog("sequence numbers exhausted".into()))?;
        let op = PendingOperation {
            seq: state.next_seq,
            collection,
            mutation,
            enqueued_at: self.clock.now(),
        };
        self.append(&LogEntry::Enqueued { op: op.clone() })?;
        state.next_seq = next_seq;
        state.live.insert(op.seq, op.clone());

        tracing::debug!(
            seq = op.seq,
            collection = %op.collection,
            pending = state.live.len(),
            "Operation queued"
        );
        Ok(op)
    }

    /// Mark an operation as delivered and remove it from the live set.
    pub fn ack(&self, seq: Seq) -> Result<()> {
        let mut state = self.state.lock();
        if !state.live.contains_key(&seq) {
            return Ok(());
        }

        self.append(&LogEntry::Acked { seq })?;
        state.live.remove(&seq);
        state.acked_in_log += 1;

        let mark = state.low_water_mark();
        if mark != state.cursor {
            self.storage.write(CURSOR_KEY, mark.to_string().as_bytes())?;
            state.cursor = mark;
        }

        if state.live.is_empty() {
            self.storage.write(LOG_KEY, b"")?;
            state.acked_in_log = 0;
        } else if state.acked_in_log >= self.compact_threshold {
            self.rewrite(&mut state)?;
        }
        Ok(())
    }

    /// Operations still waiting, in enqueue order.
    pub fn pending(&self) -> Vec<PendingOperation> {
        self.state.lock().live.values().cloned().collect()
    }

    /// Operations still waiting for one collection, in enqueue order.
    pub fn pending_for(&self, collection: &str) -> Vec<PendingOperation> {
        self.state
            .lock()
            .live
            .values()
            .filter(|op| op.collection == collection)
            .cloned()
            .collect()
    }

    /// Whether the collection has anything queued.
    pub fn has_pending(&self, collection: &str) -> bool {
        self.state
            .lock()
            .live
            .values()
            .any(|op| op.collection == collection)
    }

    pub fn len(&self) -> usize {
        self.state.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every queued operation and the durable log.
    pub fn clear(&self) -> Result<()> {
        let mut state = self.state.lock();
        self.storage.remove(LOG_KEY)?;
        self.storage.remove(CURSOR_KEY)?;
        *state = QueueState::default();
        tracing::info!("Operation queue cleared");
        Ok(())
    }

    /// Replay every queued operation against the remote.
    ///
    /// Collections are replayed concurrently, each strictly in order. A
    /// transient failure stops its collection; a permanent rejection discards
    /// the operation and moves on.
    pub async fn flush(&self, remote: &dyn RemoteStore) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;

        let mut by_collection: BTreeMap<CollectionName, Vec<PendingOperation>> = BTreeMap::new();
        for op in self.pending() {
            by_collection.entry(op.collection.clone()).or_default().push(op);
        }
        if by_collection.is_empty() {
            return Ok(FlushReport::default());
        }

        let results = join_all(
            by_collection
                .iter()
                .map(|(collection, ops)| self.replay(remote, collection, ops)),
        )
        .await;

        let mut report = FlushReport::default();
        for result in results {
            report.absorb(result?);
        }
        report.remaining = self.len();

        tracing::info!(
            delivered = report.delivered,
            dropped = report.dropped,
            halted = report.halted.len(),
            remaining = report.remaining,
            "Operation queue flushed"
        );
        Ok(report)
    }

    /// Replay only one collection's operations.
    pub async fn flush_collection(
        &self,
        remote: &dyn RemoteStore,
        collection: &str,
    ) -> Result<FlushReport> {
        let _guard = self.flush_lock.lock().await;

        let ops = self.pending_for(collection);
        if ops.is_empty() {
            return Ok(FlushReport::default());
        }
        let mut report = self.replay(remote, collection, &ops).await?;
        report.remaining = self.len();
        Ok(report)
    }

    async fn replay(
        &self,
        remote: &dyn RemoteStore,
        collection: &str,
        ops: &[PendingOperation],
    ) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        for op in ops {
            let outcome = match &op.mutation {
                Mutation::Upsert { record } => remote.push(collection, record.clone()).await,
                Mutation::Delete { id } => remote.delete(collection, id).await,
            };

            match outcome {
                Ok(()) => {
                    self.ack(op.seq)?;
                    report.delivered += 1;
                    if let Mutation::Delete { id } = &op.mutation {
                        report
                            .confirmed_deletes
                            .entry(collection.to_string())
                            .or_default()
                            .push(id.clone());
                    }
                }
                Err(e) if e.is_transient() => {
                    tracing::warn!(
                        collection = %collection,
                        seq = op.seq,
                        error = %e,
                        "Replay halted, will retry later"
                    );
                    report.halted.push(collection.to_string());
                    break;
                }
                Err(e) => {
                    tracing::error!(
                        collection = %collection,
                        seq = op.seq,
                        record = ?op.mutation.record_id(),
                        error = %e,
                        "Remote rejected queued operation, discarding it"
                    );
                    self.ack(op.seq)?;
                    report.dropped += 1;
                }
            }
        }

        Ok(report)
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        self.storage.append(LOG_KEY, &line)
    }

    /// Rewrite the log with only the live operations.
    fn rewrite(&self, state: &mut QueueState) -> Result<()> {
        let mut bytes = Vec::new();
        for op in state.live.values() {
            serde_json::to_writer(&mut bytes, &LogEntry::Enqueued { op: op.clone() })?;
            bytes.push(b'\n');
        }
        self.storage.write(LOG_KEY, &bytes)?;

        let mark = state.low_water_mark();
        if mark != state.cursor {
            self.storage.write(CURSOR_KEY, mark.to_string().as_bytes())?;
            state.cursor = mark;
        }
        state.acked_in_log = 0;

        tracing::debug!(live = state.live.len(), "Operation log compacted");
        Ok(())
    }
}
