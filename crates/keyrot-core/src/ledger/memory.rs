// # Memory Notification Ledger
//
// In-memory implementation of NotificationLedger.
//
// All records are lost on restart, so a watched key may be alerted again
// after a restart. Useful for tests and for deployments that accept that.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::notification_ledger::{NotificationLedger, NotificationRecord};

/// In-memory notification ledger
///
/// Clones share the same underlying records.
#[derive(Debug, Clone, Default)]
pub struct MemoryNotificationLedger {
    inner: Arc<RwLock<BTreeMap<usize, NotificationRecord>>>,
}

impl MemoryNotificationLedger {
    /// Create a new empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a ledger pre-populated with the given indices
    pub fn with_notified(indices: impl IntoIterator<Item = usize>) -> Self {
        let records = indices
            .into_iter()
            .map(|i| (i, NotificationRecord::now(i)))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(records)),
        }
    }

    /// Number of records
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the ledger is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationLedger for MemoryNotificationLedger {
    async fn has_notified(&self, key_index: usize) -> Result<bool, Error> {
        Ok(self.inner.read().await.contains_key(&key_index))
    }

    async fn mark_notified(&self, key_index: usize) -> Result<(), Error> {
        let mut guard = self.inner.write().await;
        guard
            .entry(key_index)
            .or_insert_with(|| NotificationRecord::now(key_index));
        Ok(())
    }

    async fn get_record(&self, key_index: usize) -> Result<Option<NotificationRecord>, Error> {
        Ok(self.inner.read().await.get(&key_index).cloned())
    }

    async fn list_records(&self) -> Result<Vec<NotificationRecord>, Error> {
        Ok(self.inner.read().await.values().cloned().collect())
    }

    async fn clear(&self, key_index: usize) -> Result<bool, Error> {
        Ok(self.inner.write().await.remove(&key_index).is_some())
    }

    async fn clear_all(&self) -> Result<(), Error> {
        self.inner.write().await.clear();
        Ok(())
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}
