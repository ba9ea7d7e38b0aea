//! Offline progress cache for Bitcoin Quest.
//!
//! This crate keeps the application usable without a network connection:
//!
//! - `store`: versioned key-value store with pluggable engines (memory, files)
//! - `cache`: the `OfflineCache` facade over progress snapshots, the
//!   pending-update queue and the content cache
//! - `connectivity`: online/offline signal with scoped listeners
//! - `sync`: replays queued updates against the remote API
//! - `api`: HTTP replay client and its error type
//!
//! The store handle is opened once at startup and cloned into every
//! collaborator that needs it.

pub mod api;
pub mod cache;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod models;
pub mod store;
pub mod sync;
pub mod utils;

pub use cache::{CacheStats, DataSource, FetchError, Fetched, OfflineCache};
pub use config::Config;
pub use connectivity::{Connectivity, Subscription};
pub use error::{StoreError, StoreResult};
pub use models::{
    ContentCacheEntry, HttpMethod, MissionProgress, NewPendingUpdate, PendingUpdate,
    ProgressSnapshot, RealmProgress,
};
pub use store::{FileBackend, MemoryBackend, StorageBackend, StoreHandle};
pub use sync::{ReplayPolicy, Replayer, SyncEngine, SyncEvent, SyncOutcome, SyncReport, SyncTask};
