//! Data models for the offline cache.
//!
//! - `ProgressSnapshot`, `RealmProgress`, `MissionProgress`: per-user progress
//! - `PendingUpdate`, `NewPendingUpdate`, `HttpMethod`: deferred mutations
//! - `ContentCacheEntry`: cached remote content
//!
//! JSON field names are camelCase so records match what the web client stores.

pub mod content;
pub mod pending;
pub mod progress;

pub use content::ContentCacheEntry;
pub use pending::{HttpMethod, NewPendingUpdate, PendingUpdate};
pub use progress::{MissionProgress, ProgressSnapshot, RealmProgress, MAX_PROGRESS};
