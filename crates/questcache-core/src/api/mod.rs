//! HTTP side of synchronization.
//!
//! `ReplayClient` resends queued updates to the remote JSON API as plain
//! `{method} {url}` requests with the update's data as the body. Any
//! failure comes back as an `ApiError` and leaves the update queued.

pub mod client;
pub mod error;

pub use client::ReplayClient;
pub use error::ApiError;
