//! The sync engine: owns the shared queue and drives sessions.
//!
//! A session starts when the app has an identity and a shared space. Starting
//! one opens a change feed per collection, bootstraps every collection from
//! the remote, replays the offline queue, and runs the legacy migration if the
//! bootstrap merged. Events that arrive while the bootstrap is loading wait in
//! their subscription channels and are applied once the merge is done.

use crate::{
    adapter::{SubscriptionHandle, SyncAdapter, SyncedCollection},
    bootstrap::{self, BootstrapState},
    clock::{Clock, SystemClock},
    config::EngineConfig,
    error::{Error, Result},
    migration::{LegacyMigration, MigrationOutcome},
    queue::{FlushReport, OperationQueue},
    record::Record,
    remote::RemoteStore,
    resolve::MergeReport,
    storage::{FileStorage, Storage},
    store::LocalStore,
    CollectionName,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::watch;

/// What happened when a session started.
#[derive(Debug)]
pub struct SessionReport {
    /// Collections with a live change feed
    pub subscribed: Vec<CollectionName>,
    /// Merge counts per collection, or why the bootstrap failed
    pub bootstrap: Result<BTreeMap<CollectionName, MergeReport>>,
    /// Queue replay run after the bootstrap
    pub flush: FlushReport,
    /// Only present when the bootstrap merged
    pub migration: Option<MigrationOutcome>,
}

impl SessionReport {
    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrap.is_ok()
    }
}

/// The change feeds of one session.
#[derive(Debug, Default)]
struct Session {
    handles: Vec<SubscriptionHandle>,
}

impl Session {
    async fn close(self) {
        for handle in self.handles {
            handle.close().await;
        }
    }
}

/// Coordinates every registered collection against one remote.
pub struct SyncEngine {
    config: EngineConfig,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    remote: Arc<dyn RemoteStore>,
    queue: Arc<OperationQueue>,
    migration: LegacyMigration,
    collections: Mutex<Vec<Arc<dyn SyncedCollection>>>,
    session: tokio::sync::Mutex<Option<Session>>,
    bootstrap_state: watch::Sender<BootstrapState>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("collections", &self.collection_names())
            .field("queue", &self.queue)
            .field("bootstrap", &*self.bootstrap_state.borrow())
            .finish()
    }
}

impl SyncEngine {
    /// Open an engine persisting under `config.data_dir`, stamping with the
    /// system clock.
    pub fn open(config: EngineConfig, remote: Arc<dyn RemoteStore>) -> Result<Self> {
        let storage = Arc::new(FileStorage::open(&config.data_dir)?);
        Self::with_parts(config, storage, Arc::new(SystemClock), remote)
    }

    /// Open an engine over explicit storage and clock.
    pub fn with_parts(
        config: EngineConfig,
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        remote: Arc<dyn RemoteStore>,
    ) -> Result<Self> {
        let queue = Arc::new(OperationQueue::open(
            Arc::clone(&storage),
            Arc::clone(&clock),
            config.compact_threshold,
        )?);
        let (bootstrap_state, _) = watch::channel(BootstrapState::Idle);

        tracing::info!(pending = queue.len(), "Sync engine opened");

        Ok(Self {
            migration: LegacyMigration::new(Arc::clone(&storage)),
            config,
            storage,
            clock,
            remote,
            queue,
            collections: Mutex::new(Vec::new()),
            session: tokio::sync::Mutex::new(None),
            bootstrap_state,
        })
    }

    /// Open a collection's local store and attach it to the engine.
    ///
    /// Collections registered while a session is running join at the next
    /// session start.
    pub fn register<T: Record>(&self, name: impl Into<CollectionName>) -> Result<SyncAdapter<T>> {
        let name = name.into();
        let mut collections = self.collections.lock();
        if collections.iter().any(|c| c.name() == name) {
            return Err(Error::DuplicateCollection(name));
        }

        let store = LocalStore::open(name, Arc::clone(&self.storage), Arc::clone(&self.clock))?;
        let adapter = SyncAdapter::new(store, Arc::clone(&self.remote), Arc::clone(&self.queue))
            .flush_after_failed_push(self.config.flush_after_failed_push);
        collections.push(Arc::new(adapter.clone()));

        tracing::debug!(collection = %adapter.name(), "Collection registered");
        Ok(adapter)
    }

    pub fn collection_names(&self) -> Vec<CollectionName> {
        self.collections
            .lock()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The shared offline queue.
    pub fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    /// Watch the bootstrap progress of the current session.
    pub fn bootstrap_state(&self) -> watch::Receiver<BootstrapState> {
        self.bootstrap_state.subscribe()
    }

    /// Whether a session is running.
    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Start (or restart) a session.
    ///
    /// Only local persistence failures are returned as errors. A failed
    /// bootstrap is reported in [`SessionReport::bootstrap`] and leaves the
    /// change feeds running.
    pub async fn start_session(&self) -> Result<SessionReport> {
        let mut session = self.session.lock().await;
        if let Some(previous) = session.take() {
            tracing::debug!("Closing previous session");
            previous.close().await;
        }

        let collections = self.collections.lock().clone();
        tracing::info!(collections = collections.len(), "Starting sync session");

        // Subscribe before pulling so nothing written during the bootstrap is
        // missed; the events queue up in the channels until the merge is done.
        let mut subscriptions = Vec::with_capacity(collections.len());
        for collection in &collections {
            match collection.open_subscription().await {
                Ok(subscription) => subscriptions.push(Some(subscription)),
                Err(e) => {
                    tracing::warn!(
                        collection = %collection.name(),
                        error = %e,
                        "Could not open change feed"
                    );
                    subscriptions.push(None);
                }
            }
        }

        let receipt = bootstrap::load(&collections, &self.bootstrap_state).await;

        let handles: Vec<SubscriptionHandle> = collections
            .iter()
            .zip(subscriptions)
            .filter_map(|(collection, subscription)| {
                subscription.map(|subscription| collection.listen(subscription))
            })
            .collect();
        let subscribed = handles.iter().map(|h| h.collection().to_string()).collect();
        *session = Some(Session { handles });
        drop(session);

        let flush = self.flush().await?;

        let (bootstrap, migration) = match receipt {
            Ok(receipt) => {
                let outcome = self.migration.run(&receipt, &collections).await?;
                (Ok(receipt.reports().clone()), Some(outcome))
            }
            Err(e) => (Err(e), None),
        };

        Ok(SessionReport {
            subscribed,
            bootstrap,
            flush,
            migration,
        })
    }

    /// Tear down the change feeds, e.g. on sign-out or when the app goes to
    /// the background.
    pub async fn end_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.close().await;
            self.bootstrap_state.send_replace(BootstrapState::Idle);
            tracing::info!("Sync session ended");
        }
    }

    /// Replay the offline queue.
    pub async fn flush(&self) -> Result<FlushReport> {
        let report = self.queue.flush(self.remote.as_ref()).await?;
        self.forget_confirmed_deletes(&report)?;
        Ok(report)
    }

    /// Replay the offline queue of one registered collection.
    pub async fn flush_collection(&self, name: &str) -> Result<FlushReport> {
        if !self.collections.lock().iter().any(|c| c.name() == name) {
            return Err(Error::CollectionNotFound(name.to_string()));
        }
        let report = self.queue.flush_collection(self.remote.as_ref(), name).await?;
        self.forget_confirmed_deletes(&report)?;
        Ok(report)
    }

    /// The app came back to the foreground.
    pub async fn on_foreground(&self) -> Result<FlushReport> {
        tracing::debug!("Foreground, replaying queue");
        self.flush().await
    }

    /// The device regained network access.
    pub async fn on_connectivity_restored(&self) -> Result<FlushReport> {
        tracing::debug!("Connectivity restored, replaying queue");
        self.flush().await
    }

    /// Erase all local data: every collection, the queue and the migration
    /// flag. Ends the session first.
    pub async fn wipe(&self) -> Result<()> {
        self.end_session().await;

        let collections = self.collections.lock().clone();
        for collection in &collections {
            collection.reset()?;
        }
        self.queue.clear()?;
        self.migration.reset()?;

        tracing::warn!(collections = collections.len(), "Local data wiped");
        Ok(())
    }

    /// Hand deletes a replay delivered back to their collections so the
    /// tombstones can go.
    fn forget_confirmed_deletes(&self, report: &FlushReport) -> Result<()> {
        if report.confirmed_deletes.is_empty() {
            return Ok(());
        }
        let collections = self.collections.lock().clone();
        for collection in &collections {
            if let Some(ids) = report.confirmed_deletes.get(collection.name()) {
                collection.forget_confirmed_deletes(ids)?;
            }
        }
        Ok(())
    }
}
