//! Key walk state machine
//!
//! ```text
//! Walking(key_index, attempts) ──Success──────────────▶ Succeeded(key_index, response)
//!        │   ▲
//!        │   └──Retry / FastSkip (next key)
//!        │
//!        └──Abort / no next key / budget spent ───────▶ Exhausted(reason)
//! ```
//!
//! The functions here are pure; the controller performs the I/O and sleeps.

use crate::classify::Verdict;
use crate::error::ExhaustionReason;

/// State of one request's walk over the key pool
#[derive(Debug, Clone, PartialEq)]
pub enum WalkState {
    /// About to attempt `key_index` with `attempts` calls already made
    Walking {
        /// 1-based key index to try next
        key_index: usize,
        /// Upstream calls made so far
        attempts: usize,
    },
    /// A key produced a successful response
    Succeeded {
        /// 1-based key index that succeeded
        key_index: usize,
        /// Upstream calls made, including the successful one
        attempts: usize,
        /// Parsed response payload
        response: serde_json::Value,
    },
    /// The walk ended without a success
    Exhausted {
        /// Why the walk stopped
        reason: ExhaustionReason,
        /// Upstream calls made
        attempts: usize,
    },
}

impl WalkState {
    /// Initial state of every walk
    pub fn start() -> Self {
        WalkState::Walking {
            key_index: 1,
            attempts: 0,
        }
    }
}

/// What the controller does after classifying an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Return the response to the caller
    Finish,
    /// Sleep for the exponential backoff, then move to the next key
    Backoff,
    /// Sleep for the short fixed delay, then move to the next key
    FastSkip,
    /// Stop the walk without trying the remaining keys
    Abort,
}

/// Decision table for a classified attempt
pub fn decide(verdict: Verdict) -> Step {
    match verdict {
        Verdict::Success => Step::Finish,
        Verdict::TransportError | Verdict::RateLimited | Verdict::ServerError => Step::Backoff,
        Verdict::AuthFailure => Step::FastSkip,
        Verdict::OtherFailure => Step::Abort,
    }
}

/// Key index to try after `key_index` failed with `verdict`
///
/// The walk moves strictly forward and never wraps. A pool with a single key
/// cannot rotate, so that key is retried for transient verdicts until the
/// retry budget runs out; an auth failure on it ends the walk.
pub fn next_key_index(key_index: usize, pool_len: usize, verdict: Verdict) -> Option<usize> {
    if key_index < pool_len {
        return Some(key_index + 1);
    }
    match (pool_len, decide(verdict)) {
        (1, Step::Backoff) => Some(1),
        _ => None,
    }
}
