// # Notification Ledger Implementations
//
// This module provides implementations of the NotificationLedger trait for
// different persistence strategies.

pub mod file;
pub mod memory;

pub use file::FileNotificationLedger;
pub use memory::MemoryNotificationLedger;

use crate::config::LedgerConfig;
use crate::error::Result;
use crate::traits::NotificationLedger;

/// Open the ledger backend described by the configuration
pub async fn open_ledger(config: &LedgerConfig) -> Result<Box<dyn NotificationLedger>> {
    config.validate()?;
    match config {
        LedgerConfig::File { path } => Ok(Box::new(FileNotificationLedger::open(path).await?)),
        LedgerConfig::Memory => Ok(Box::new(MemoryNotificationLedger::new())),
    }
}
