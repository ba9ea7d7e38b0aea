use std::fmt::Display;

use thiserror::Error;

/// Failures raised by the offline store and the caches built on it.
///
/// A read miss is never an error: lookups return `Ok(None)`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Persistent storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Stored schema version {found} is newer than supported version {supported}")]
    IncompatibleVersion { found: u32, supported: u32 },

    #[error("Unknown table: {0}")]
    UnknownTable(String),

    #[error("Failed to write to {table}: {reason}")]
    Write { table: String, reason: String },

    #[error("Failed to read from {table}: {reason}")]
    Read { table: String, reason: String },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn write(table: &str, reason: impl Display) -> Self {
        StoreError::Write {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn read(table: &str, reason: impl Display) -> Self {
        StoreError::Read {
            table: table.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether the error means offline features must be disabled entirely.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::StorageUnavailable(_) | StoreError::IncompatibleVersion { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_error_message() {
        let err = StoreError::write("content-cache", "quota exceeded");
        assert_eq!(err.to_string(), "Failed to write to content-cache: quota exceeded");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_unavailable_is_fatal() {
        assert!(StoreError::StorageUnavailable("private mode".into()).is_fatal());
        assert!(StoreError::IncompatibleVersion { found: 3, supported: 1 }.is_fatal());
        assert!(!StoreError::read("user-progress", "corrupt").is_fatal());
    }
}
