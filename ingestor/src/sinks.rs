//! Collaborator contracts for the dispatcher.
//!
//! Each sink owns its own connection and must be safe to share across tasks.
//! The dispatcher holds them behind `Arc<dyn ...>` so tests can swap in
//! in-memory doubles.

use crate::errors::Result;
use crate::model::TelemetryRecord;
use async_trait::async_trait;

/// Durable append-only storage for readings.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    /// Appends one reading for `device_id`. Each call is independent; no batching.
    async fn insert(&self, device_id: &str, record: &TelemetryRecord) -> Result<()>;
}

/// Single-slot latest-value store keyed by device.
#[async_trait]
pub trait LiveCache: Send + Sync {
    /// Unconditionally overwrites `key` with `raw`. No expiry.
    async fn set(&self, key: &str, raw: &[u8]) -> Result<()>;
}

/// Maps a published device name to its internal identifier.
#[async_trait]
pub trait DeviceResolver: Send + Sync {
    async fn resolve(&self, device_name: &str) -> Result<Option<String>>;
}
