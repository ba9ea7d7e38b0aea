use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::backend::{Schema, StorageBackend};
use super::sequence_key;
use crate::error::{StoreError, StoreResult};

/// Schema file name in the data directory
const SCHEMA_FILE: &str = "schema.json";

/// Probe file written and removed to check the directory is writable
const PROBE_FILE: &str = ".probe";

#[derive(Debug, Default, Serialize, Deserialize)]
struct TableFile {
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    records: BTreeMap<String, Value>,
}

/// File engine: one pretty-printed JSON file per table.
///
/// Every call reads the table file, applies the change and replaces the
/// file through a rename, so a crash leaves either the old or the new
/// contents. Calls are serialized within the process.
pub struct FileBackend {
    root: PathBuf,
    lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(format!("{}.json", table))
    }

    async fn read_json<T: DeserializeOwned + Default>(&self, path: &Path, table: &str) -> StoreResult<T> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| StoreError::read(table, format!("corrupt file {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(StoreError::read(table, e)),
        }
    }

    async fn write_json<T: Serialize>(&self, path: &Path, table: &str, value: &T) -> StoreResult<()> {
        let contents = serde_json::to_string_pretty(value).map_err(|e| StoreError::write(table, e))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents)
            .await
            .map_err(|e| StoreError::write(table, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| StoreError::write(table, e))?;
        Ok(())
    }

    async fn read_table(&self, table: &str) -> StoreResult<TableFile> {
        self.read_json(&self.table_path(table), table).await
    }

    async fn write_table(&self, table: &str, contents: &TableFile) -> StoreResult<()> {
        self.write_json(&self.table_path(table), table, contents).await
    }
}

#[async_trait]
impl StorageBackend for FileBackend {
    async fn probe(&self) -> StoreResult<()> {
        let unavailable = |e: std::io::Error| {
            StoreError::StorageUnavailable(format!("{}: {}", self.root.display(), e))
        };
        tokio::fs::create_dir_all(&self.root).await.map_err(unavailable)?;
        let probe = self.root.join(PROBE_FILE);
        tokio::fs::write(&probe, b"ok").await.map_err(unavailable)?;
        tokio::fs::remove_file(&probe).await.map_err(unavailable)?;
        debug!(root = %self.root.display(), "File store is writable");
        Ok(())
    }

    async fn load_schema(&self) -> StoreResult<Option<Schema>> {
        let _guard = self.lock.lock().await;
        let path = self.root.join(SCHEMA_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => serde_json::from_str(&contents)
                .map(Some)
                .map_err(|e| StoreError::read("schema", e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::read("schema", e)),
        }
    }

    async fn store_schema(&self, schema: &Schema) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        self.write_json(&self.root.join(SCHEMA_FILE), "schema", schema).await
    }

    async fn create_table(&self, table: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let path = self.table_path(table);
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| StoreError::read(table, e))?;
        if exists {
            return Ok(());
        }
        self.write_table(table, &TableFile::default()).await
    }

    async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_table(table).await?;
        Ok(contents.records.remove(key))
    }

    async fn put(&self, table: &str, key: &str, value: Value) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_table(table).await?;
        contents.records.insert(key.to_string(), value);
        self.write_table(table, &contents).await
    }

    async fn append(&self, table: &str, value: Value) -> StoreResult<u64> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_table(table).await?;
        contents.sequence += 1;
        let id = contents.sequence;
        contents.records.insert(sequence_key(id), value);
        self.write_table(table, &contents).await?;
        Ok(id)
    }

    async fn scan(&self, table: &str) -> StoreResult<Vec<(String, Value)>> {
        let _guard = self.lock.lock().await;
        let contents = self.read_table(table).await?;
        Ok(contents.records.into_iter().collect())
    }

    async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_table(table).await?;
        if contents.records.remove(key).is_none() {
            return Ok(false);
        }
        self.write_table(table, &contents).await?;
        Ok(true)
    }

    async fn clear(&self, table: &str) -> StoreResult<()> {
        let _guard = self.lock.lock().await;
        let mut contents = self.read_table(table).await?;
        contents.records.clear();
        // The sequence is kept so ids are never handed out twice
        self.write_table(table, &contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_persist_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.probe().await.expect("writable");
        backend.put("content-cache", "k", json!({"a": 1})).await.expect("put");
        let id = backend.append("pending-updates", json!("x")).await.expect("append");
        drop(backend);

        let reopened = FileBackend::new(dir.path());
        assert_eq!(
            reopened.get("content-cache", "k").await.expect("get"),
            Some(json!({"a": 1}))
        );
        let next = reopened.append("pending-updates", json!("y")).await.expect("append");
        assert_eq!(next, id + 1);
    }

    #[tokio::test]
    async fn test_missing_table_reads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        assert!(backend.scan("nothing").await.expect("scan").is_empty());
        assert_eq!(backend.get("nothing", "k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_corrupt_table_is_read_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("content-cache.json"), "{not json").expect("write");
        let backend = FileBackend::new(dir.path());
        let err = backend.get("content-cache", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[tokio::test]
    async fn test_create_table_reports_unreadable_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Root is a regular file, so the table path cannot be checked
        let root = dir.path().join("not-a-dir");
        std::fs::write(&root, "file").expect("write");
        let backend = FileBackend::new(&root);

        let err = backend.create_table("content-cache").await.unwrap_err();
        assert!(matches!(err, StoreError::Read { .. }));
    }

    #[tokio::test]
    async fn test_create_table_keeps_existing_records() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path());
        backend.put("content-cache", "k", json!(1)).await.expect("put");
        backend.create_table("content-cache").await.expect("create");
        assert_eq!(backend.get("content-cache", "k").await.expect("get"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_unwritable_root_is_unavailable() {
        let dir = tempfile::tempdir().expect("tempdir");
        // A regular file where the directory should be
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "file").expect("write");
        let backend = FileBackend::new(blocker.join("store"));
        assert!(matches!(
            backend.probe().await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }
}
