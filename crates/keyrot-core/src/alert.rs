//! Exhaustion alert messages
//!
//! The subject and body wording is consumed by downstream automation that
//! parses these alerts, so it must stay stable.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::traits::AlertEmitter;

/// A "key exhausted" alert ready for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    /// Subject line
    pub subject: String,
    /// Plain-text body
    pub body: String,
    /// Destination address, if known
    pub recipient: Option<String>,
}

impl Alert {
    /// Build the alert for a watched key index observed rate limited at `at`
    pub fn key_exhausted(key_index: usize, at: DateTime<Utc>, recipient: Option<String>) -> Self {
        let subject = format!(
            "API Key #{} has reached its limit. Please prepare the next batch of 10 keys.",
            key_index
        );
        let body = format!(
            "Automated alert: API Key #{} (1-based index) triggered a rate limit response at {}.\n\n\
             Please prepare the next batch of 10 keys and rotate them into your environment variables.\n\n\
             This is an automated notification from the key-rotating dispatcher.",
            key_index,
            at.to_rfc3339_opts(SecondsFormat::Micros, true)
        );

        Self {
            subject,
            body,
            recipient,
        }
    }
}

/// Emitter used when no alert transport is configured
///
/// Every alert is logged and reported as undelivered, so the ledger is never
/// marked and a later dispatch retries once a transport exists.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledAlertEmitter;

#[async_trait]
impl AlertEmitter for DisabledAlertEmitter {
    async fn send(&self, alert: &Alert) -> bool {
        tracing::warn!(
            "Alert transport not configured; skipping alert to {}: {}",
            alert.recipient.as_deref().unwrap_or("<no recipient>"),
            alert.subject
        );
        false
    }
}
