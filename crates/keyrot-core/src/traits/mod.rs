//! Core traits for the dispatcher
//!
//! This module defines the abstract interfaces the rotation controller is
//! wired against.
//!
//! - [`UpstreamClient`]: Issue one generation call with one key
//! - [`NotificationLedger`]: Durable record of already-alerted key indices
//! - [`AlertEmitter`]: Deliver a "key exhausted" alert

pub mod alert_emitter;
pub mod notification_ledger;
pub mod upstream_client;

pub use alert_emitter::AlertEmitter;
pub use notification_ledger::{NotificationLedger, NotificationRecord};
pub use upstream_client::{RawOutcome, UpstreamCall, UpstreamClient};
