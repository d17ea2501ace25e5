//! Events emitted by the rotation controller

use std::time::Duration;

use crate::error::ExhaustionReason;
use crate::request::AttemptOutcome;

/// Events emitted by the [`crate::RotationController`]
///
/// Delivered on a bounded channel for monitoring and tests. Events are
/// dropped (with a warning) when nobody drains the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// An upstream call is about to be made
    AttemptStarted {
        key_index: usize,
        attempt: usize,
    },

    /// An upstream call finished and was classified
    AttemptFinished(AttemptOutcome),

    /// The controller is sleeping before the next attempt
    BackoffScheduled {
        /// Attempts made so far
        attempt: usize,
        /// Key that produced the failure
        key_index: usize,
        delay: Duration,
    },

    /// An exhaustion alert was delivered and recorded
    AlertSent { key_index: usize },

    /// The ledger already records an alert for this key
    AlertSuppressed { key_index: usize },

    /// The emitter did not deliver the alert; the ledger was left unmarked
    AlertFailed { key_index: usize },

    /// A key produced a successful response
    Succeeded { key_index: usize, attempts: usize },

    /// The walk ended without a success
    Exhausted {
        reason: ExhaustionReason,
        attempts: usize,
    },
}
