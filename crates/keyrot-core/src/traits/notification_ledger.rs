// # Notification Ledger Trait
//
// Defines the interface for the durable set of key indices that have
// already triggered an exhaustion alert.
//
// ## Purpose
//
// A watched key index is alerted at most once across the whole operational
// history of the system. The ledger is the only mechanism that enforces
// this: two concurrent dispatches may race to alert the same index, and the
// idempotent `mark_notified` keeps a single record.
//
// ## Implementations
//
// - File-based: JSON document with atomic replace (`FileNotificationLedger`)
// - In-memory: tests and ephemeral runs (`MemoryNotificationLedger`)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One alerted key index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// 1-based key index (unique)
    pub key_index: usize,
    /// When the alert was first delivered
    pub notified_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Create a record stamped with the current time
    pub fn now(key_index: usize) -> Self {
        Self {
            key_index,
            notified_at: Utc::now(),
        }
    }
}

/// Trait for notification ledger implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple in-flight
/// dispatches. A mutation either completes fully or not at all, even if the
/// calling future is dropped.
#[async_trait]
pub trait NotificationLedger: Send + Sync {
    /// Whether an alert was already delivered for this key index
    async fn has_notified(&self, key_index: usize) -> Result<bool, crate::Error>;

    /// Record that an alert was delivered for this key index
    ///
    /// Idempotent: marking an index that is already present keeps the
    /// original record and returns `Ok(())`.
    async fn mark_notified(&self, key_index: usize) -> Result<(), crate::Error>;

    /// Get the record for a key index
    async fn get_record(&self, key_index: usize) -> Result<Option<NotificationRecord>, crate::Error>;

    /// List all records, ordered by key index
    async fn list_records(&self) -> Result<Vec<NotificationRecord>, crate::Error>;

    /// Remove the record for a key index (manual reset)
    ///
    /// Returns whether a record was removed.
    async fn clear(&self, key_index: usize) -> Result<bool, crate::Error>;

    /// Remove every record (manual reset)
    async fn clear_all(&self) -> Result<(), crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}
