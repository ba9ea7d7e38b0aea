use std::fmt::Display;
use std::future::Future;

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::OfflineCache;
use crate::error::{StoreError, StoreResult};
use crate::models::ContentCacheEntry;
use crate::store::CONTENT_CACHE;

/// Where a value returned by `fetch_with_fallback` came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Network,
    Cache { cached_at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub data: T,
    pub source: DataSource,
    /// Set when fresh data was returned but could not be written to the cache.
    pub cache_error: Option<String>,
}

impl<T> Fetched<T> {
    pub fn is_cached(&self) -> bool {
        matches!(self.source, DataSource::Cache { .. })
    }
}

#[derive(Error, Debug)]
pub enum FetchError<E> {
    #[error("Offline and nothing cached")]
    Offline,

    #[error("Fetch failed and nothing cached: {0}")]
    Fetch(E),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OfflineCache {
    /// Insert or replace the entry for `key`, refreshing its timestamp.
    pub async fn put<T: Serialize>(&self, key: &str, data: &T) -> StoreResult<()> {
        let data = serde_json::to_value(data).map_err(|e| StoreError::write(CONTENT_CACHE, e))?;
        let entry = ContentCacheEntry::new(key, data);
        self.store.put(CONTENT_CACHE, key, &entry).await
    }

    /// Cached payload for `key`, or `None` on a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_entry(key).await? {
            Some(entry) => serde_json::from_value(entry.data)
                .map(Some)
                .map_err(|e| StoreError::read(CONTENT_CACHE, format!("entry {}: {}", key, e))),
            None => Ok(None),
        }
    }

    pub async fn get_entry(&self, key: &str) -> StoreResult<Option<ContentCacheEntry>> {
        self.store.get(CONTENT_CACHE, key).await
    }

    /// Every cached entry, in key order.
    pub async fn list_all(&self) -> StoreResult<Vec<ContentCacheEntry>> {
        let entries: Vec<(String, ContentCacheEntry)> = self.store.scan(CONTENT_CACHE).await?;
        Ok(entries.into_iter().map(|(_, entry)| entry).collect())
    }

    /// Remove entries written more than `max_age` ago. Returns how many went.
    /// A negative age is rejected.
    pub async fn evict_older_than(&self, max_age: Duration) -> StoreResult<usize> {
        if max_age < Duration::zero() {
            return Err(StoreError::InvalidRecord(format!(
                "eviction age must not be negative, got {} minutes",
                max_age.num_minutes()
            )));
        }
        let mut removed = 0;
        for entry in self.list_all().await? {
            if entry.is_older_than(max_age) && self.store.delete(CONTENT_CACHE, &entry.key).await? {
                removed += 1;
            }
        }
        info!(removed, max_age_minutes = max_age.num_minutes(), "Evicted old content");
        Ok(removed)
    }

    /// Keep at most `max_entries`, dropping the oldest timestamps first.
    pub async fn evict_to_capacity(&self, max_entries: usize) -> StoreResult<usize> {
        let mut entries = self.list_all().await?;
        if entries.len() <= max_entries {
            return Ok(0);
        }
        entries.sort_by_key(|e| e.timestamp);
        let excess = entries.len() - max_entries;
        let mut removed = 0;
        for entry in entries.into_iter().take(excess) {
            if self.store.delete(CONTENT_CACHE, &entry.key).await? {
                removed += 1;
            }
        }
        info!(removed, max_entries, "Evicted content over capacity");
        Ok(removed)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<Fetched<T>>> {
        let entry = match self.get_entry(key).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
        let data = serde_json::from_value(entry.data)
            .map_err(|e| StoreError::read(CONTENT_CACHE, format!("entry {}: {}", key, e)))?;
        Ok(Some(Fetched {
            data,
            source: DataSource::Cache {
                cached_at: entry.timestamp,
            },
            cache_error: None,
        }))
    }

    /// Network first, cache as fallback.
    ///
    /// Online: run `fetch`, cache the result under `key` and return it. A
    /// failed cache write does not fail the call; it is reported in
    /// `Fetched::cache_error`. If the fetch fails, fall back to the cached
    /// copy. Offline: return the cached copy without calling `fetch`.
    pub async fn fetch_with_fallback<T, E, F, Fut>(
        &self,
        key: &str,
        fetch: F,
    ) -> Result<Fetched<T>, FetchError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.is_online() {
            debug!(key, "Offline, serving content from cache");
            return self.cached(key).await?.ok_or(FetchError::Offline);
        }

        match fetch().await {
            Ok(data) => {
                let cache_error = match self.put(key, &data).await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(key, error = %e, "Fetched content could not be cached");
                        Some(e.to_string())
                    }
                };
                Ok(Fetched {
                    data,
                    source: DataSource::Network,
                    cache_error,
                })
            }
            Err(e) => {
                warn!(key, error = %e, "Fetch failed, trying cache");
                self.cached(key).await?.ok_or(FetchError::Fetch(e))
            }
        }
    }
}
