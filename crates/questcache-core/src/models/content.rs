use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::{format_age, minutes_since};

/// A cached piece of remote content. Entries never expire on their own;
/// callers decide staleness from `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ContentCacheEntry {
    pub key: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl ContentCacheEntry {
    pub fn new(key: impl Into<String>, data: Value) -> Self {
        Self {
            key: key.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        minutes_since(self.timestamp)
    }

    pub fn age_display(&self) -> String {
        format_age(self.age_minutes())
    }

    pub fn is_older_than(&self, max_age: Duration) -> bool {
        Utc::now() - self.timestamp > max_age
    }
}
