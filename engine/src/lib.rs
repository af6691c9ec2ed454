//! # Duet Engine
//!
//! An offline-first replication engine for two peers sharing one space.
//!
//! Each peer keeps an authoritative local copy of every collection and
//! replicates it through a shared remote store. The user never waits on the
//! network: writes land locally first and are pushed in the background.
//!
//! ## Design Principles
//!
//! - **Local first**: every mutation is persisted on the device before any
//!   network attempt, and is never rolled back because of the network
//! - **Queue as the retry vehicle**: failed pushes go to a durable queue that
//!   is replayed in order, per collection
//! - **Last write wins**: conflicting copies are settled by `updatedAt`; a tie
//!   keeps the local copy
//! - **Injected seams**: storage, clock and remote are traits, so the engine
//!   runs the same against files, memory or a hosted backend
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Domain types implement [`Record`] by embedding a [`RecordMeta`] (`id`,
//! `createdAt`, `updatedAt`). The shared collections live in [`models`].
//!
//! ### Local store
//!
//! [`LocalStore`] holds one collection in memory and persists it as a JSON
//! snapshot after every change. Deleted ids are remembered so late events
//! cannot resurrect them.
//!
//! ### Sync adapter
//!
//! [`SyncAdapter`] connects a store to a [`RemoteStore`]: it pushes local
//! writes, routes realtime [`ChangeEvent`]s through the conflict resolver and
//! falls back to the [`OperationQueue`] when the remote is unreachable.
//!
//! ### Sessions
//!
//! [`SyncEngine::start_session`] subscribes every collection, bootstraps it
//! from the remote, replays the queue and runs the one-time legacy upload.
//!
//! ## Quick Start
//!
//! ```rust
//! use duet_engine::{
//!     models::LoveNote, EngineConfig, ManualClock, MemoryRemote, MemoryStorage, SyncEngine,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> duet_engine::error::Result<()> {
//! let remote = MemoryRemote::new();
//! let engine = SyncEngine::with_parts(
//!     EngineConfig::default(),
//!     Arc::new(MemoryStorage::new()),
//!     Arc::new(ManualClock::new(1_706_745_600_000)),
//!     Arc::new(remote.link()),
//! )?;
//!
//! let notes = engine.register::<LoveNote>(LoveNote::COLLECTION)?;
//! engine.start_session().await?;
//!
//! let write = notes.upsert(LoveNote::new("sam", "see you tonight")).await?;
//! assert_eq!(notes.get(&write.record.meta.id), Some(write.record));
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! All durable state goes through the [`Storage`] trait: collection
//! snapshots under `collections/`, the queue log under `queue/` and the
//! migration flag under `migration/`. [`FileStorage`] keeps them in a
//! directory; [`MemoryStorage`] keeps them in memory for tests.

pub mod adapter;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod migration;
pub mod models;
pub mod queue;
pub mod record;
pub mod remote;
pub mod resolve;
pub mod storage;
pub mod store;
pub mod wire;

// Re-export main types at crate root
pub use adapter::{Delivery, RecordCodec, SubscriptionHandle, SyncAdapter, Write};
pub use bootstrap::{BootstrapReceipt, BootstrapState};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, EngineConfig};
pub use engine::{SessionReport, SyncEngine};
pub use error::{Error, RemoteError};
pub use memory::{MemoryLink, MemoryRemote, RemoteStats};
pub use migration::{LegacyMigration, MigrationOutcome};
pub use queue::{FlushReport, Mutation, OperationQueue, PendingOperation};
pub use record::{Record, RecordMeta};
pub use remote::{ChangeEvent, RemoteStore, Subscription, SubscriptionId};
pub use resolve::{MergeReport, Resolution};
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use store::{Applied, LocalStore, Skipped};

/// Type aliases for clarity
pub type RecordId = String;
pub type CollectionName = String;
pub type Timestamp = u64;
pub type Seq = u64;
