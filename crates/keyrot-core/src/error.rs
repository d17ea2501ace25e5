//! Error types for the dispatcher
//!
//! Only [`Error::NotConfigured`] and [`Error::UpstreamUnavailable`] are ever
//! returned from a dispatch. Per-attempt failures are expressed as a
//! [`crate::Verdict`] and absorbed by the rotation loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for dispatcher operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a key walk ended without a successful response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionReason {
    /// Every key in the pool was tried once
    PoolExhausted,
    /// The per-request attempt budget was spent
    RetryBudgetExceeded,
    /// A response was classified as fatal and the walk was aborted
    FatalResponse,
}

impl std::fmt::Display for ExhaustionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ExhaustionReason::PoolExhausted => "all keys exhausted",
            ExhaustionReason::RetryBudgetExceeded => "retry budget exceeded",
            ExhaustionReason::FatalResponse => "fatal upstream response",
        };
        f.write_str(text)
    }
}

/// Core error type for the dispatcher
#[derive(Error, Debug)]
pub enum Error {
    /// The key pool is empty
    #[error("No API keys configured")]
    NotConfigured,

    /// The key walk ended without a success
    #[error("Upstream unavailable ({reason}) after {attempts} attempt(s): {last_error}")]
    UpstreamUnavailable {
        /// Why the walk stopped
        reason: ExhaustionReason,
        /// Number of upstream calls made
        attempts: usize,
        /// Last error observed before exhaustion
        last_error: String,
    },

    /// Notification ledger errors
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a ledger error
    pub fn ledger(msg: impl Into<String>) -> Self {
        Self::Ledger(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an "upstream unavailable" error
    pub fn upstream_unavailable(
        reason: ExhaustionReason,
        attempts: usize,
        last_error: impl Into<String>,
    ) -> Self {
        Self::UpstreamUnavailable {
            reason,
            attempts,
            last_error: last_error.into(),
        }
    }

    /// Whether this is the "no keys configured" failure
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured)
    }

    /// Whether this is the terminal exhaustion failure
    pub fn is_upstream_unavailable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}
