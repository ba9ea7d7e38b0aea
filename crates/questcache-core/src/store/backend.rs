use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;

/// Schema record persisted alongside the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    pub version: u32,
    pub tables: BTreeSet<String>,
}

/// Raw storage engine. Records are JSON values keyed by string within a
/// named table.
///
/// Engines treat a table they have never written as empty; table existence
/// is enforced by `StoreHandle` against the schema.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Fails with `StorageUnavailable` when nothing can be persisted.
    async fn probe(&self) -> StoreResult<()>;

    async fn load_schema(&self) -> StoreResult<Option<Schema>>;

    async fn store_schema(&self, schema: &Schema) -> StoreResult<()>;

    /// Make sure a table exists. Existing data is left untouched.
    async fn create_table(&self, table: &str) -> StoreResult<()>;

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>>;

    /// Insert or replace.
    async fn put(&self, table: &str, key: &str, value: Value) -> StoreResult<()>;

    /// Insert under the table's next auto-increment id and return it.
    /// Ids are never reused, including after `clear`.
    async fn append(&self, table: &str, value: Value) -> StoreResult<u64>;

    /// All records in key order.
    async fn scan(&self, table: &str) -> StoreResult<Vec<(String, Value)>>;

    /// Returns whether a record was present.
    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool>;

    async fn clear(&self, table: &str) -> StoreResult<()>;

    async fn count(&self, table: &str) -> StoreResult<usize> {
        Ok(self.scan(table).await?.len())
    }
}
