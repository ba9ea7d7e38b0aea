//! Flushing the pending-update queue to the remote API.
//!
//! The store never talks to the network. `SyncEngine` reads the queue,
//! hands each update to a `Replayer` and removes it only after a confirmed
//! delivery. A crash between delivery and removal resends the update on the
//! next run, so remote endpoints must tolerate duplicates.

pub mod engine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::api::ApiError;
use crate::models::PendingUpdate;

pub use engine::{SyncEngine, SyncEvent, SyncOutcome, SyncReport, SyncTask};

/// Delivers one queued update to wherever it is going.
#[async_trait]
pub trait Replayer: Send + Sync {
    async fn replay(&self, update: &PendingUpdate) -> Result<(), ApiError>;
}

#[async_trait]
impl<R: Replayer + ?Sized> Replayer for std::sync::Arc<R> {
    async fn replay(&self, update: &PendingUpdate) -> Result<(), ApiError> {
        (**self).replay(update).await
    }
}

/// What a sync run does after an update fails to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayPolicy {
    /// Keep the failed update queued and move on to the next one.
    #[default]
    SkipAndContinue,
    /// Stop the run at the first failure, preserving strict ordering.
    HaltOnFirstFailure,
}
