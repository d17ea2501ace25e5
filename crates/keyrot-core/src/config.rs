//! Configuration types for the dispatcher
//!
//! A [`DispatchConfig`] is built once at start-up and handed to the
//! [`crate::RotationController`]. Nothing in it changes for the lifetime of
//! the process.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

/// Main dispatcher configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Ordered credential pool
    #[serde(default)]
    pub keys: KeyPool,

    /// Upstream endpoint settings
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Retry budget and backoff settings
    #[serde(default)]
    pub rotation: RotationConfig,

    /// Exhaustion alert settings
    #[serde(default)]
    pub alerts: AlertConfig,

    /// Notification ledger backend
    #[serde(default)]
    pub ledger: LedgerConfig,
}

impl DispatchConfig {
    /// Create a configuration with defaults and the given key pool
    pub fn with_keys(keys: KeyPool) -> Self {
        Self {
            keys,
            ..Self::default()
        }
    }

    /// Validate the configuration
    ///
    /// An empty key pool is accepted here; dispatching against it reports
    /// [`crate::Error::NotConfigured`] instead.
    pub fn validate(&self) -> Result<(), crate::Error> {
        self.upstream.validate()?;
        self.rotation.validate()?;
        self.alerts.validate()?;
        self.ledger.validate()?;
        Ok(())
    }
}

/// Ordered pool of API keys
///
/// Positions are exposed 1-based: the first key has index 1.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPool(Vec<String>);

impl KeyPool {
    /// Create a pool from an ordered list of keys, dropping blank entries
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            keys.into_iter()
                .map(|k| k.into().trim().to_string())
                .filter(|k| !k.is_empty())
                .collect(),
        )
    }

    /// Parse a comma-separated key list (e.g. `"k1, k2,,k3"`)
    pub fn from_csv(raw: &str) -> Self {
        Self::new(raw.split(','))
    }

    /// Number of keys in the pool
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the pool has no keys
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get a key by its 1-based index
    pub fn get(&self, key_index: usize) -> Option<&str> {
        key_index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .map(String::as_str)
    }
}

// Keys are credentials and must never reach logs
impl std::fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPool")
            .field("len", &self.0.len())
            .field("keys", &"<REDACTED>")
            .finish()
    }
}

/// Set of 1-based key indices whose first exhaustion triggers an alert
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchSet(BTreeSet<usize>);

impl WatchSet {
    /// Create a watch set from key indices
    pub fn new(indices: impl IntoIterator<Item = usize>) -> Self {
        Self(indices.into_iter().collect())
    }

    /// A watch set that never alerts
    pub fn empty() -> Self {
        Self(BTreeSet::new())
    }

    /// Parse a comma-separated index list (e.g. `"5,8,10"`)
    pub fn from_csv(raw: &str) -> Result<Self, crate::Error> {
        let mut indices = BTreeSet::new();
        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let index = part.parse::<usize>().map_err(|e| {
                crate::Error::config(format!("Invalid watched key index '{}': {}", part, e))
            })?;
            indices.insert(index);
        }
        Ok(Self(indices))
    }

    /// Whether the given key index is watched
    pub fn contains(&self, key_index: usize) -> bool {
        self.0.contains(&key_index)
    }

    /// Iterate over watched indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Whether no index is watched
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for WatchSet {
    fn default() -> Self {
        Self::new([5, 8, 10])
    }
}

/// Upstream endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Generation endpoint URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model identifier sent with every call
    #[serde(default = "default_model")]
    pub model: String,

    /// `max_tokens` field of the request body
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// `temperature` field of the request body
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-call timeout (in seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// Per-call timeout as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Validate the upstream configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.endpoint.is_empty() {
            return Err(crate::Error::config("Upstream endpoint cannot be empty"));
        }
        if !self.endpoint.starts_with("https://") && !self.endpoint.starts_with("http://") {
            return Err(crate::Error::config(format!(
                "Upstream endpoint must use HTTP or HTTPS scheme. Got: {}",
                self.endpoint
            )));
        }
        if self.model.trim().is_empty() {
            return Err(crate::Error::config("Model identifier cannot be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(crate::Error::config("Upstream timeout must be > 0"));
        }
        if !self.temperature.is_finite() {
            return Err(crate::Error::config("Temperature must be a finite number"));
        }
        Ok(())
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retry budget and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationConfig {
    /// Maximum number of upstream calls per request, across all keys
    #[serde(default = "default_max_total_retries")]
    pub max_total_retries: usize,

    /// Base of the exponential backoff (in seconds)
    #[serde(default = "default_base_backoff_secs")]
    pub base_backoff_secs: f64,

    /// Optional upper bound on a single backoff sleep (in seconds)
    ///
    /// `None` keeps the delay unbounded; the retry budget is then the only
    /// limit on how long a request can take.
    #[serde(default)]
    pub max_backoff_secs: Option<f64>,

    /// Fixed delay after an authentication failure (in milliseconds)
    #[serde(default = "default_auth_failure_delay_ms")]
    pub auth_failure_delay_ms: u64,

    /// Capacity of the dispatch event channel
    ///
    /// When full, new events are dropped (with a warning log).
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl RotationConfig {
    /// Fixed auth-failure delay as a [`Duration`]
    pub fn auth_failure_delay(&self) -> Duration {
        Duration::from_millis(self.auth_failure_delay_ms)
    }

    /// Validate the rotation configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.max_total_retries == 0 {
            return Err(crate::Error::config("max_total_retries must be >= 1"));
        }
        if !self.base_backoff_secs.is_finite() || self.base_backoff_secs < 0.0 {
            return Err(crate::Error::config(format!(
                "base_backoff_secs must be a non-negative number. Got: {}",
                self.base_backoff_secs
            )));
        }
        if let Some(cap) = self.max_backoff_secs
            && (!cap.is_finite() || cap < 0.0)
        {
            return Err(crate::Error::config(format!(
                "max_backoff_secs must be a non-negative number. Got: {}",
                cap
            )));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("event_channel_capacity must be > 0"));
        }
        Ok(())
    }
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_total_retries: default_max_total_retries(),
            base_backoff_secs: default_base_backoff_secs(),
            max_backoff_secs: None,
            auth_failure_delay_ms: default_auth_failure_delay_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Exhaustion alert configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Key indices to alert on
    #[serde(default)]
    pub watched_indices: WatchSet,

    /// Recipient used when a request does not name one
    #[serde(default)]
    pub default_recipient: Option<String>,
}

impl AlertConfig {
    /// Validate the alert configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.watched_indices.contains(0) {
            return Err(crate::Error::config(
                "Watched key indices are 1-based; 0 is not a valid index",
            ));
        }
        Ok(())
    }
}

/// Notification ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerConfig {
    /// JSON file ledger (survives restarts)
    File {
        /// Path to the ledger file
        path: String,
    },

    /// In-memory ledger (not persistent)
    Memory,
}

impl LedgerConfig {
    /// Validate the ledger configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        match self {
            LedgerConfig::File { path } if path.trim().is_empty() => {
                Err(crate::Error::config("Ledger file path cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig::File {
            path: default_ledger_path(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.google.com/gemini/generate".to_string()
}

fn default_model() -> String {
    "gemini-1.0".to_string()
}

fn default_max_tokens() -> u32 {
    800
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_max_total_retries() -> usize {
    30
}

fn default_base_backoff_secs() -> f64 {
    1.0
}

fn default_auth_failure_delay_ms() -> u64 {
    200
}

fn default_event_channel_capacity() -> usize {
    1000
}

fn default_ledger_path() -> String {
    "warnings_state.json".to_string()
}
