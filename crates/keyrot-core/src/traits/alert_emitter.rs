// # Alert Emitter Trait
//
// Delivery channel for "key exhausted" alerts. The transport (mail, chat,
// webhook) is supplied by the embedding application.

use async_trait::async_trait;

use crate::alert::Alert;

/// Trait for alert delivery implementations
///
/// A `false` return means the alert was not delivered. The rotation
/// controller never aborts or alters the key walk because of it; it only
/// leaves the ledger unmarked so a later dispatch can try again.
#[async_trait]
pub trait AlertEmitter: Send + Sync {
    /// Deliver an alert, returning `true` on confirmed delivery
    async fn send(&self, alert: &Alert) -> bool;
}
