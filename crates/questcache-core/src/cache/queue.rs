use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::OfflineCache;
use crate::error::{StoreError, StoreResult};
use crate::models::{HttpMethod, NewPendingUpdate, PendingUpdate};
use crate::store::{sequence_key, PENDING_UPDATES};

/// Stored form of a pending update; the id is the record key.
#[derive(Debug, Serialize, Deserialize)]
struct QueuedRecord {
    url: String,
    method: HttpMethod,
    data: Value,
    timestamp: DateTime<Utc>,
}

impl QueuedRecord {
    fn into_update(self, id: u64) -> PendingUpdate {
        PendingUpdate {
            id,
            url: self.url,
            method: self.method,
            data: self.data,
            timestamp: self.timestamp,
        }
    }
}

impl OfflineCache {
    /// Append an update to the queue and return it with its assigned id.
    ///
    /// While online this also requests a sync; that request is best-effort
    /// and never fails the enqueue.
    pub async fn enqueue(&self, update: NewPendingUpdate) -> StoreResult<PendingUpdate> {
        if update.url.trim().is_empty() {
            return Err(StoreError::InvalidRecord("pending update has an empty url".into()));
        }

        let record = QueuedRecord {
            url: update.url,
            method: update.method,
            data: update.data,
            timestamp: Utc::now(),
        };
        let id = self.store.append(PENDING_UPDATES, &record).await?;
        debug!(id, method = %record.method, url = %record.url, "Queued pending update");

        self.request_sync();
        Ok(record.into_update(id))
    }

    /// Queued updates in creation order, as of this call.
    pub async fn list_pending(&self) -> StoreResult<Vec<PendingUpdate>> {
        let records: Vec<(String, QueuedRecord)> = self.store.scan(PENDING_UPDATES).await?;
        let mut updates = records
            .into_iter()
            .map(|(key, record)| {
                key.parse::<u64>()
                    .map(|id| record.into_update(id))
                    .map_err(|_| StoreError::read(PENDING_UPDATES, format!("bad queue key {:?}", key)))
            })
            .collect::<StoreResult<Vec<_>>>()?;
        updates.sort_by_key(|u| u.id);
        Ok(updates)
    }

    pub async fn pending_count(&self) -> StoreResult<usize> {
        self.store.count(PENDING_UPDATES).await
    }

    /// Drop an update from the queue. Removing an absent id is fine.
    pub async fn remove(&self, id: u64) -> StoreResult<()> {
        let existed = self.store.delete(PENDING_UPDATES, &sequence_key(id)).await?;
        debug!(id, existed, "Removed pending update");
        Ok(())
    }
}
