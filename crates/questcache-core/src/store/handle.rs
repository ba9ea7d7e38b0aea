use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use super::backend::{Schema, StorageBackend};
use super::{DB_NAME, DB_VERSION, TABLES};
use crate::error::{StoreError, StoreResult};

/// Opened, schema-checked store. Clone is cheap and shares the engine.
#[derive(Clone)]
pub struct StoreHandle {
    backend: Arc<dyn StorageBackend>,
    schema: Arc<Schema>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").field("schema", &self.schema).finish()
    }
}

impl StoreHandle {
    /// Open the store at the current version, creating or upgrading it.
    /// Opening an already-current store changes nothing.
    pub async fn open(backend: Arc<dyn StorageBackend>) -> StoreResult<Self> {
        Self::open_with(backend, DB_VERSION, &TABLES).await
    }

    /// Open with an explicit version and table set.
    ///
    /// Upgrades are additive: missing tables are created, existing tables and
    /// their data are kept, and the recorded version never goes down.
    pub async fn open_with(
        backend: Arc<dyn StorageBackend>,
        version: u32,
        tables: &[&str],
    ) -> StoreResult<Self> {
        backend.probe().await?;

        let existing = backend.load_schema().await?;
        let schema = match existing {
            Some(stored) if stored.version > version => {
                return Err(StoreError::IncompatibleVersion {
                    found: stored.version,
                    supported: version,
                });
            }
            Some(stored) => {
                let missing: Vec<&str> = tables
                    .iter()
                    .copied()
                    .filter(|t| !stored.tables.contains(*t))
                    .collect();
                if missing.is_empty() && stored.version == version {
                    debug!(name = %stored.name, version, "Offline store already current");
                    stored
                } else {
                    info!(
                        from = stored.version,
                        to = version,
                        added = ?missing,
                        "Upgrading offline store"
                    );
                    for table in &missing {
                        backend.create_table(table).await?;
                    }
                    let mut upgraded = stored;
                    upgraded.version = version;
                    upgraded.tables.extend(missing.iter().map(|t| t.to_string()));
                    backend.store_schema(&upgraded).await?;
                    upgraded
                }
            }
            None => {
                info!(name = DB_NAME, version, "Creating offline store");
                for table in tables {
                    backend.create_table(table).await?;
                }
                let created = Schema {
                    name: DB_NAME.to_string(),
                    version,
                    tables: tables.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
                };
                backend.store_schema(&created).await?;
                created
            }
        };

        Ok(Self {
            backend,
            schema: Arc::new(schema),
        })
    }

    pub fn version(&self) -> u32 {
        self.schema.version
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.schema.tables.iter().map(String::as_str)
    }

    fn check_table(&self, table: &str) -> StoreResult<()> {
        if self.schema.tables.contains(table) {
            Ok(())
        } else {
            Err(StoreError::UnknownTable(table.to_string()))
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, table: &str, key: &str) -> StoreResult<Option<T>> {
        self.check_table(table)?;
        match self.backend.get(table, key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| StoreError::read(table, format!("record {}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize>(&self, table: &str, key: &str, record: &T) -> StoreResult<()> {
        self.check_table(table)?;
        let value = serde_json::to_value(record).map_err(|e| StoreError::write(table, e))?;
        self.backend.put(table, key, value).await?;
        debug!(table, key, "Stored record");
        Ok(())
    }

    pub async fn append<T: Serialize>(&self, table: &str, record: &T) -> StoreResult<u64> {
        self.check_table(table)?;
        let value = serde_json::to_value(record).map_err(|e| StoreError::write(table, e))?;
        let id = self.backend.append(table, value).await?;
        debug!(table, id, "Appended record");
        Ok(id)
    }

    /// Every record of a table in key order, decoded.
    pub async fn scan<T: DeserializeOwned>(&self, table: &str) -> StoreResult<Vec<(String, T)>> {
        self.check_table(table)?;
        self.backend
            .scan(table)
            .await?
            .into_iter()
            .map(|(key, value)| {
                serde_json::from_value(value)
                    .map(|record| (key.clone(), record))
                    .map_err(|e| StoreError::read(table, format!("record {}: {}", key, e)))
            })
            .collect()
    }

    pub async fn count(&self, table: &str) -> StoreResult<usize> {
        self.check_table(table)?;
        self.backend.count(table).await
    }

    pub async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        self.check_table(table)?;
        self.backend.delete(table, key).await
    }

    pub async fn clear(&self, table: &str) -> StoreResult<()> {
        self.check_table(table)?;
        self.backend.clear(table).await?;
        debug!(table, "Cleared table");
        Ok(())
    }
}
