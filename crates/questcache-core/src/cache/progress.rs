use tracing::debug;

use super::OfflineCache;
use crate::error::StoreResult;
use crate::models::ProgressSnapshot;
use crate::store::USER_PROGRESS;

impl OfflineCache {
    /// Replace the stored snapshot for `snapshot.user_id`.
    ///
    /// No merging and no version check: with a single writer the last save
    /// wins. Invalid snapshots are rejected before anything is written.
    pub async fn save_progress(&self, snapshot: &ProgressSnapshot) -> StoreResult<()> {
        snapshot.validate()?;
        self.store.put(USER_PROGRESS, &snapshot.id, snapshot).await?;
        debug!(user_id = %snapshot.user_id, "Saved progress snapshot");
        Ok(())
    }

    /// `None` when the user has no snapshot yet.
    pub async fn get_progress(&self, user_id: &str) -> StoreResult<Option<ProgressSnapshot>> {
        self.store.get(USER_PROGRESS, user_id).await
    }
}
