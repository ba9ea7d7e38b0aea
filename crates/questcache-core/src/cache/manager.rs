use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::connectivity::{Connectivity, Subscription};
use crate::error::StoreResult;
use crate::store::{StorageBackend, StoreHandle, CONTENT_CACHE, PENDING_UPDATES, USER_PROGRESS};

/// Entry point for everything the application keeps offline.
///
/// Built once at startup and cloned into collaborators; clones share the
/// store, the connectivity signal and the sync trigger.
#[derive(Clone, Debug)]
pub struct OfflineCache {
    pub(crate) store: StoreHandle,
    connectivity: Connectivity,
    sync_signal: Arc<Notify>,
    _online_trigger: Arc<Subscription>,
}

impl OfflineCache {
    pub fn new(store: StoreHandle, connectivity: Connectivity) -> Self {
        let sync_signal = Arc::new(Notify::new());
        let signal = Arc::clone(&sync_signal);
        let online_trigger = connectivity.on_change(
            move || {
                debug!("Back online, requesting sync");
                signal.notify_one();
            },
            || {},
        );
        Self {
            store,
            connectivity,
            sync_signal,
            _online_trigger: Arc::new(online_trigger),
        }
    }

    /// Open (creating or upgrading) the store on `backend`.
    pub async fn open(backend: Arc<dyn StorageBackend>, connectivity: Connectivity) -> StoreResult<Self> {
        let store = StoreHandle::open(backend).await?;
        info!(name = store.name(), version = store.version(), "Offline cache opened");
        Ok(Self::new(store, connectivity))
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.connectivity.is_online()
    }

    /// Register online/offline callbacks; see `Connectivity::on_change`.
    #[must_use = "dropping the subscription unregisters the listeners"]
    pub fn on_connectivity_change<F, G>(&self, on_online: F, on_offline: G) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
        G: Fn() + Send + Sync + 'static,
    {
        self.connectivity.on_change(on_online, on_offline)
    }

    /// Signal raised when queued updates should be flushed: on reconnect and
    /// whenever an update is queued while online. Whoever runs sync waits on it.
    pub fn sync_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.sync_signal)
    }

    pub(crate) fn request_sync(&self) {
        if self.is_online() {
            self.sync_signal.notify_one();
        }
    }

    /// Empty all three tables.
    ///
    /// The clears run concurrently and are awaited together. If any of them
    /// fails the whole call fails, but tables that were already cleared stay
    /// cleared. This is irreversible; front ends must confirm before calling.
    pub async fn clear_all(&self) -> StoreResult<()> {
        let (progress, pending, content) = futures::future::join3(
            self.store.clear(USER_PROGRESS),
            self.store.clear(PENDING_UPDATES),
            self.store.clear(CONTENT_CACHE),
        )
        .await;

        let mut first_error = None;
        for (table, result) in [
            (USER_PROGRESS, progress),
            (PENDING_UPDATES, pending),
            (CONTENT_CACHE, content),
        ] {
            if let Err(e) = result {
                warn!(table, error = %e, "Failed to clear offline table");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Cleared all offline storage");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::models::{HttpMethod, NewPendingUpdate, ProgressSnapshot};
    use crate::store::{MemoryBackend, Schema};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::time::Duration;

    pub(crate) async fn memory_cache(online: bool) -> OfflineCache {
        OfflineCache::open(Arc::new(MemoryBackend::new()), Connectivity::new(online))
            .await
            .expect("memory store opens")
    }

    /// Memory engine whose `clear` fails for one table.
    struct FailingClear {
        inner: MemoryBackend,
        table: &'static str,
    }

    #[async_trait]
    impl StorageBackend for FailingClear {
        async fn probe(&self) -> StoreResult<()> {
            self.inner.probe().await
        }
        async fn load_schema(&self) -> StoreResult<Option<Schema>> {
            self.inner.load_schema().await
        }
        async fn store_schema(&self, schema: &Schema) -> StoreResult<()> {
            self.inner.store_schema(schema).await
        }
        async fn create_table(&self, table: &str) -> StoreResult<()> {
            self.inner.create_table(table).await
        }
        async fn get(&self, table: &str, key: &str) -> StoreResult<Option<Value>> {
            self.inner.get(table, key).await
        }
        async fn put(&self, table: &str, key: &str, value: Value) -> StoreResult<()> {
            self.inner.put(table, key, value).await
        }
        async fn append(&self, table: &str, value: Value) -> StoreResult<u64> {
            self.inner.append(table, value).await
        }
        async fn scan(&self, table: &str) -> StoreResult<Vec<(String, Value)>> {
            self.inner.scan(table).await
        }
        async fn delete(&self, table: &str, key: &str) -> StoreResult<bool> {
            self.inner.delete(table, key).await
        }
        async fn clear(&self, table: &str) -> StoreResult<()> {
            if table == self.table {
                return Err(StoreError::write(table, "disk error"));
            }
            self.inner.clear(table).await
        }
    }

    #[tokio::test]
    async fn test_clear_all_empties_every_table() {
        let cache = memory_cache(false).await;
        cache.save_progress(&ProgressSnapshot::new("u1")).await.expect("save");
        cache
            .enqueue(NewPendingUpdate::new(HttpMethod::Post, "/api/progress", json!({})))
            .await
            .expect("enqueue");
        cache.put("realm-1", &json!({"name": "Barter"})).await.expect("put");

        cache.clear_all().await.expect("clear");

        assert_eq!(cache.get_progress("u1").await.expect("get"), None);
        assert!(cache.list_pending().await.expect("list").is_empty());
        assert_eq!(cache.get::<Value>("realm-1").await.expect("get"), None);
    }

    #[tokio::test]
    async fn test_clear_all_partial_failure_reports_error() {
        let backend = Arc::new(FailingClear {
            inner: MemoryBackend::new(),
            table: PENDING_UPDATES,
        });
        let cache = OfflineCache::open(backend, Connectivity::new(false))
            .await
            .expect("open");
        cache.put("realm-1", &json!(1)).await.expect("put");
        cache
            .enqueue(NewPendingUpdate::new(HttpMethod::Post, "/x", json!(null)))
            .await
            .expect("enqueue");

        let err = cache.clear_all().await.unwrap_err();
        assert!(matches!(err, StoreError::Write { .. }));

        // No rollback: the content cache is already empty
        assert_eq!(cache.get::<Value>("realm-1").await.expect("get"), None);
        assert_eq!(cache.list_pending().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_signals_sync() {
        let cache = memory_cache(false).await;
        let signal = cache.sync_signal();
        cache.connectivity().set_online(true);
        tokio::time::timeout(Duration::from_secs(1), signal.notified())
            .await
            .expect("sync requested on reconnect");
    }

    #[tokio::test]
    async fn test_on_connectivity_change_registers_listener() {
        let cache = memory_cache(true).await;
        let before = cache.connectivity().listener_count();
        let sub = cache.on_connectivity_change(|| {}, || {});
        assert_eq!(cache.connectivity().listener_count(), before + 1);
        drop(sub);
        assert_eq!(cache.connectivity().listener_count(), before);
    }
}
