//! Offline cache facade used by the application.
//!
//! `OfflineCache` wraps an opened `StoreHandle` and exposes:
//! - progress snapshots (`save_progress`, `get_progress`)
//! - the pending-update queue (`enqueue`, `list_pending`, `remove`)
//! - the content cache (`put`, `get`, `list_all`, eviction, fallback fetch)
//! - connectivity and the sync trigger
//! - `stats` for status display
//!
//! Cached and freshly fetched data look the same to callers; only
//! `DataSource` and `CacheStats` tell them apart.

pub mod content;
pub mod manager;
pub mod progress;
pub mod queue;
pub mod stats;

pub use content::{DataSource, FetchError, Fetched};
pub use manager::OfflineCache;
pub use stats::CacheStats;
