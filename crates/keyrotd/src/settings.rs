//! Environment-variable configuration for keyrotd
//!
//! Every setting has a default except `KEYROT_API_KEYS`; an empty key list is
//! still accepted here and reported as "not configured" at dispatch time.

use anyhow::{Context, Result};
use keyrot_core::config::{DispatchConfig, KeyPool, LedgerConfig, WatchSet};
use std::str::FromStr;

/// Raw settings read from the environment
#[derive(Debug)]
pub struct Settings {
    pub dispatch: DispatchConfig,
    pub log_level: String,
}

impl Settings {
    /// Load settings from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mut dispatch = DispatchConfig::with_keys(KeyPool::from_csv(
            &var("KEYROT_API_KEYS").unwrap_or_default(),
        ));

        if let Some(endpoint) = var("KEYROT_ENDPOINT") {
            dispatch.upstream.endpoint = endpoint.trim().to_string();
        }
        if let Some(model) = var("KEYROT_MODEL") {
            dispatch.upstream.model = model.trim().to_string();
        }
        if let Some(max_tokens) = parse_var(&var, "KEYROT_MAX_TOKENS")? {
            dispatch.upstream.max_tokens = max_tokens;
        }
        if let Some(temperature) = parse_var(&var, "KEYROT_TEMPERATURE")? {
            dispatch.upstream.temperature = temperature;
        }
        if let Some(timeout) = parse_var(&var, "KEYROT_TIMEOUT_SECS")? {
            dispatch.upstream.timeout_secs = timeout;
        }

        if let Some(max_retries) = parse_var(&var, "KEYROT_MAX_TOTAL_RETRIES")? {
            dispatch.rotation.max_total_retries = max_retries;
        }
        if let Some(base) = parse_var(&var, "KEYROT_BASE_BACKOFF_SECS")? {
            dispatch.rotation.base_backoff_secs = base;
        }
        dispatch.rotation.max_backoff_secs = parse_var(&var, "KEYROT_MAX_BACKOFF_SECS")?;
        if let Some(delay) = parse_var(&var, "KEYROT_AUTH_FAILURE_DELAY_MS")? {
            dispatch.rotation.auth_failure_delay_ms = delay;
        }

        if let Some(raw) = lookup("KEYROT_WATCH_KEYS") {
            dispatch.alerts.watched_indices = WatchSet::from_csv(&raw)
                .context("KEYROT_WATCH_KEYS must be a comma-separated list of key indices")?;
        }
        dispatch.alerts.default_recipient = var("KEYROT_ALERT_TO").map(|v| v.trim().to_string());

        let ledger_type = var("KEYROT_LEDGER_TYPE").unwrap_or_else(|| "file".to_string());
        dispatch.ledger = match ledger_type.trim().to_lowercase().as_str() {
            "file" => match var("KEYROT_LEDGER_PATH") {
                Some(path) => LedgerConfig::File { path },
                None => LedgerConfig::default(),
            },
            "memory" => LedgerConfig::Memory,
            other => anyhow::bail!(
                "KEYROT_LEDGER_TYPE '{}' is not supported. \
                Supported types: file, memory",
                other
            ),
        };

        Ok(Self {
            dispatch,
            log_level: var("KEYROT_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        self.dispatch.validate()?;

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "KEYROT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        Ok(())
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        None => Ok(None),
    }
}
