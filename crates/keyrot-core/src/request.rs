//! Request and result types exchanged with callers

use serde::{Deserialize, Serialize};

use crate::classify::Verdict;

/// One generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Prompt text
    pub prompt: String,

    /// Where exhaustion alerts raised by this request should go
    ///
    /// Falls back to the configured default recipient.
    #[serde(default, alias = "email_to")]
    pub alert_recipient: Option<String>,

    /// Opaque metadata forwarded to the upstream
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl GenerationRequest {
    /// Create a request with only a prompt
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            alert_recipient: None,
            metadata: None,
        }
    }

    /// Set the alert recipient
    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.alert_recipient = Some(recipient.into());
        self
    }

    /// Set the metadata forwarded upstream
    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Classified result of a single attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptOutcome {
    /// 1-based index of the key used
    pub key_index: usize,
    /// Semantic verdict
    pub verdict: Verdict,
    /// HTTP status, absent on transport failures
    pub status_code: Option<u16>,
    /// Response body, or the transport failure message
    pub raw_body: String,
}

/// Result returned once per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Whether any key produced a successful response
    pub success: bool,
    /// 1-based index of the key that succeeded
    pub key_used_index: Option<usize>,
    /// Upstream response payload
    pub raw_response: Option<serde_json::Value>,
    /// Failure description
    pub error: Option<String>,
}

impl DispatchResult {
    /// A successful result
    pub fn succeeded(key_index: usize, raw_response: serde_json::Value) -> Self {
        Self {
            success: true,
            key_used_index: Some(key_index),
            raw_response: Some(raw_response),
            error: None,
        }
    }

    /// A failed result carrying the error text
    pub fn failed(error: &crate::Error) -> Self {
        Self {
            success: false,
            key_used_index: None,
            raw_response: None,
            error: Some(error.to_string()),
        }
    }
}
