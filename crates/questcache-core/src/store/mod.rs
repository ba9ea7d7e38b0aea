//! Versioned key-value store underlying the offline cache.
//!
//! `StoreHandle` owns the schema (database name, version, table set) and
//! delegates raw I/O to a `StorageBackend` engine:
//!
//! - `MemoryBackend`: in-process maps with an optional byte quota
//! - `FileBackend`: one JSON file per table in a data directory
//!
//! Each call is atomic on its own. Nothing is atomic across tables.

pub mod backend;
pub mod file;
pub mod handle;
pub mod memory;

pub use backend::{Schema, StorageBackend};
pub use file::FileBackend;
pub use handle::StoreHandle;
pub use memory::MemoryBackend;

/// Database name recorded in the schema.
pub const DB_NAME: &str = "bitcoin-quest-offline";

/// Current schema version. Upgrades only ever add tables.
pub const DB_VERSION: u32 = 1;

pub const USER_PROGRESS: &str = "user-progress";
pub const PENDING_UPDATES: &str = "pending-updates";
pub const CONTENT_CACHE: &str = "content-cache";

/// Tables present at `DB_VERSION`.
pub const TABLES: [&str; 3] = [USER_PROGRESS, PENDING_UPDATES, CONTENT_CACHE];

/// Auto-increment keys are zero-padded so key order equals id order.
pub fn sequence_key(id: u64) -> String {
    format!("{:020}", id)
}
