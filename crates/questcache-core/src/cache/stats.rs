use chrono::{DateTime, Utc};
use serde::Serialize;

use super::OfflineCache;
use crate::error::StoreResult;
use crate::store::USER_PROGRESS;
use crate::utils::{format_age, minutes_since};

/// Summary of what is held offline, for the status affordance
/// ("pending updates: N", "last downloaded at").
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub online: bool,
    pub progress_snapshots: usize,
    pub pending_updates: usize,
    pub cached_entries: usize,
    /// Most recent content cache write.
    pub last_downloaded: Option<DateTime<Utc>>,
    pub oldest_pending: Option<DateTime<Utc>>,
}

impl CacheStats {
    pub fn last_downloaded_display(&self) -> String {
        self.last_downloaded
            .map(|at| format_age(minutes_since(at)))
            .unwrap_or_else(|| "never".to_string())
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} | pending updates: {} | last downloaded {}",
            if self.online { "online" } else { "offline" },
            self.pending_updates,
            self.last_downloaded_display()
        )
    }
}

impl OfflineCache {
    pub async fn stats(&self) -> StoreResult<CacheStats> {
        let entries = self.list_all().await?;
        let pending = self.list_pending().await?;
        Ok(CacheStats {
            online: self.is_online(),
            progress_snapshots: self.store.count(USER_PROGRESS).await?,
            pending_updates: pending.len(),
            cached_entries: entries.len(),
            last_downloaded: entries.iter().map(|e| e.timestamp).max(),
            oldest_pending: pending.iter().map(|u| u.timestamp).min(),
        })
    }
}
