use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use super::backend::{Schema, StorageBackend};
use super::sequence_key;
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct Table {
    sequence: u64,
    records: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct MemoryState {
    schema: Option<Schema>,
    tables: HashMap<String, Table>,
}

impl MemoryState {
    fn used_bytes(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.records.values())
            .map(encoded_len)
            .sum()
    }
}

fn encoded_len(value: &Value) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}

/// In-process engine. Data lives as long as the backend value.
///
/// An optional byte quota mimics hosts that cap (or deny) local storage:
/// a quota of zero makes the store unavailable, and writes that would
/// exceed the quota fail.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    quota_bytes: Option<usize>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn check_quota(
        &self,
        state: &MemoryState,
        table: &str,
        replaced: Option<&Value>,
        value: &Value,
    ) -> StoreResult<()> {
        if let Some(quota) = self.quota_bytes {
            let used = state.used_bytes() - replaced.map(encoded_len).unwrap_or(0);
            let needed = encoded_len(value);
            if used + needed > quota {
                return Err(StoreError::write(
                    table,
                    format!("quota exceeded ({} + {} > {} bytes)", used, needed, quota),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn probe(&self) -> StoreResult<()> {
        match self.quota_bytes {
            Some(0) => Err(StoreError::StorageUnavailable(
                "storage quota is zero".to_string(),
            )),
            _ => Ok(()),
        }
    }

    async fn load_schema(&self) -> StoreResult<Option<Schema>> {
        Ok(self.state.lock().schema.clone())
    }

    async fn store_schema(&self, schema: &Schema) -> StoreResult<()> {
        self.state.lock().schema = Some(schema.clone());
        Ok(())
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        self.state.lock().tables.entry(table.to_string()).or_default();
        Ok(())
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(table)
            .and_then(|t| t.records.get(key))
            .cloned())
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> StoreResult<()> {
        let mut state = self.state.lock();
        let replaced = state.tables.get(table).and_then(|t| t.records.get(key));
        self.check_quota(&state, table, replaced, &value)?;
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .records
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn append(&self, table: &str, value: Value) -> StoreResult<u64> {
        let mut state = self.state.lock();
        self.check_quota(&state, table, None, &value)?;
        let entry = state.tables.entry(table.to_string()).or_default();
        entry.sequence += 1;
        let id = entry.sequence;
        entry.records.insert(sequence_key(id), value);
        Ok(id)
    }

    async fn scan(&self, table: &str) -> StoreResult<Vec<(String, Value)>> {
        let state = self.state.lock();
        Ok(state
            .tables
            .get(table)
            .map(|t| {
                t.records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        let mut state = self.state.lock();
        Ok(state
            .tables
            .get_mut(table)
            .map(|t| t.records.remove(key).is_some())
            .unwrap_or(false))
    }

    async fn clear(&self, table: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        if let Some(t) = state.tables.get_mut(table) {
            t.records.clear();
        }
        Ok(())
    }

    async fn count(&self, table: &str) -> StoreResult<usize> {
        let state = self.state.lock();
        Ok(state.tables.get(table).map(|t| t.records.len()).unwrap_or(0))
    }
}
