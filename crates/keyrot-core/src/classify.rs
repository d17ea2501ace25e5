//! Outcome classification
//!
//! [`classify`] maps a [`RawOutcome`] to a closed [`Verdict`]. The rotation
//! controller matches on the verdict exhaustively, so every row of its
//! decision table is a single match arm.

use serde::{Deserialize, Serialize};

use crate::traits::RawOutcome;

/// Body substrings that indicate rate limiting when the status does not
const RATE_LIMIT_MARKERS: &[&str] = &["ratelimit", "rate limit", "quota"];

/// Semantic verdict for one attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// 2xx response
    Success,
    /// 429, or a body mentioning rate limits / quota
    RateLimited,
    /// 401 or 403
    AuthFailure,
    /// 5xx response
    ServerError,
    /// No HTTP response was obtained
    TransportError,
    /// Anything else; aborts the key walk
    OtherFailure,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Verdict::Success => "success",
            Verdict::RateLimited => "rate limited",
            Verdict::AuthFailure => "authentication failure",
            Verdict::ServerError => "server error",
            Verdict::TransportError => "transport error",
            Verdict::OtherFailure => "unexpected failure",
        };
        f.write_str(text)
    }
}

/// Classify a raw upstream outcome
///
/// Statuses are checked first. Only statuses that match none of the known
/// classes have their body scanned (case-insensitively) for rate-limit
/// wording; 401/403 bodies are not scanned. Bodies are treated as opaque
/// text, so malformed JSON never causes a failure here.
pub fn classify(outcome: &RawOutcome) -> Verdict {
    match outcome {
        RawOutcome::TransportFailure { .. } => Verdict::TransportError,
        RawOutcome::Response { status, body } => match *status {
            200..=299 => Verdict::Success,
            429 => Verdict::RateLimited,
            401 | 403 => Verdict::AuthFailure,
            500..=599 => Verdict::ServerError,
            _ if mentions_rate_limit(body) => Verdict::RateLimited,
            _ => Verdict::OtherFailure,
        },
    }
}

/// Whether a response body mentions rate limiting or quota exhaustion
pub fn mentions_rate_limit(body: &str) -> bool {
    let lower = body.to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Interpret a response body for the caller
///
/// JSON objects are returned as-is; anything else is wrapped as
/// `{"raw_text": <body>}`.
pub fn parse_body(body: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        _ => serde_json::json!({ "raw_text": body }),
    }
}
