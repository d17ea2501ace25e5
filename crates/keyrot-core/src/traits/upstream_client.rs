// # Upstream Client Trait
//
// Defines the interface for issuing a single generation call.
//
// ## Implementations
//
// - HTTP/JSON: `keyrot-upstream-http` crate
//
// ## Usage
//
// ```rust,ignore
// use keyrot_core::{RawOutcome, UpstreamCall, UpstreamClient};
//
// let call = UpstreamCall::new("Write a haiku", None, Duration::from_secs(20));
// match client.call("api-key", &call).await {
//     RawOutcome::Response { status, body } => { /* classify */ }
//     RawOutcome::TransportFailure { message } => { /* classify */ }
// }
// ```

use async_trait::async_trait;
use std::time::Duration;

/// Raw result of one upstream call
///
/// Any HTTP-level response is a `Response`, including 4xx and 5xx statuses.
/// Only failures to obtain a response at all (connection refused, DNS
/// failure, timeout) are a `TransportFailure`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// The upstream answered with an HTTP status
    Response {
        /// HTTP status code
        status: u16,
        /// Response body as text (may not be JSON)
        body: String,
    },
    /// No HTTP response was obtained
    TransportFailure {
        /// Human-readable failure description
        message: String,
    },
}

/// Parameters of one upstream call, shared by every attempt of a request
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    /// Prompt text
    pub prompt: String,
    /// Optional opaque metadata forwarded to the upstream
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    /// Upper bound on the call duration
    pub timeout: Duration,
}

impl UpstreamCall {
    /// Create a new call description
    pub fn new(
        prompt: impl Into<String>,
        metadata: Option<serde_json::Map<String, serde_json::Value>>,
        timeout: Duration,
    ) -> Self {
        Self {
            prompt: prompt.into(),
            metadata,
            timeout,
        }
    }
}

/// Trait for upstream client implementations
///
/// # Thread Safety
///
/// Implementations must be usable from many concurrent dispatches.
///
/// # Contract
///
/// - One network call per invocation, no retries and no backoff (owned by
///   [`crate::RotationController`])
/// - Never log the key
/// - Never fail with an error: every outcome is a [`RawOutcome`]
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Perform one generation call with the given key
    async fn call(&self, key: &str, call: &UpstreamCall) -> RawOutcome;

    /// Client name (for logging/debugging)
    fn client_name(&self) -> &'static str;
}
