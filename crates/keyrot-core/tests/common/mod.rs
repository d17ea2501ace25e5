//! Test doubles and common utilities for dispatcher contract tests
//!
//! The doubles record every interaction so tests can assert on call order
//! and alert delivery without any network I/O.

#![allow(dead_code)]

use keyrot_core::config::{DispatchConfig, KeyPool, LedgerConfig, WatchSet};
use keyrot_core::traits::{
    AlertEmitter, NotificationLedger, NotificationRecord, RawOutcome, UpstreamCall, UpstreamClient,
};
use keyrot_core::{Alert, DispatchEvent, Error};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// An upstream that replays a per-key script of outcomes
///
/// The last scripted outcome of a key repeats once its script is used up.
/// Unscripted keys fail at the transport level.
#[derive(Clone, Default)]
pub struct ScriptedUpstream {
    scripts: Arc<Mutex<HashMap<String, VecDeque<RawOutcome>>>>,
    calls: Arc<Mutex<Vec<String>>>,
    last_call: Arc<Mutex<Option<UpstreamCall>>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcomes for one key
    pub fn script(self, key: &str, outcomes: impl IntoIterator<Item = RawOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.to_string(), outcomes.into_iter().collect());
        self
    }

    /// Keys used, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of upstream calls made
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// The most recent call parameters
    pub fn last_call(&self) -> Option<UpstreamCall> {
        self.last_call.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn call(&self, key: &str, call: &UpstreamCall) -> RawOutcome {
        self.calls.lock().unwrap().push(key.to_string());
        *self.last_call.lock().unwrap() = Some(call.clone());

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(key) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => transport("unscripted key"),
        }
    }

    fn client_name(&self) -> &'static str {
        "scripted"
    }
}

/// An alert emitter that records every alert it is asked to send
#[derive(Clone)]
pub struct RecordingEmitter {
    deliver: Arc<Mutex<bool>>,
    sent: Arc<Mutex<Vec<Alert>>>,
    send_count: Arc<AtomicUsize>,
}

impl RecordingEmitter {
    /// An emitter whose deliveries succeed
    pub fn delivering() -> Self {
        Self::with_delivery(true)
    }

    /// An emitter whose deliveries always fail
    pub fn failing() -> Self {
        Self::with_delivery(false)
    }

    fn with_delivery(deliver: bool) -> Self {
        Self {
            deliver: Arc::new(Mutex::new(deliver)),
            sent: Arc::new(Mutex::new(Vec::new())),
            send_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Change whether future deliveries succeed
    pub fn set_delivering(&self, deliver: bool) {
        *self.deliver.lock().unwrap() = deliver;
    }

    /// Number of send attempts, successful or not
    pub fn send_count(&self) -> usize {
        self.send_count.load(Ordering::SeqCst)
    }

    /// Every alert passed to `send`
    pub fn alerts(&self) -> Vec<Alert> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl AlertEmitter for RecordingEmitter {
    async fn send(&self, alert: &Alert) -> bool {
        self.send_count.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().unwrap().push(alert.clone());
        *self.deliver.lock().unwrap()
    }
}

/// A ledger whose storage is unreadable
///
/// Every call fails; `mark_notified` attempts are counted.
#[derive(Clone, Default)]
pub struct BrokenLedger {
    mark_attempts: Arc<AtomicUsize>,
}

impl BrokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_attempts(&self) -> usize {
        self.mark_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl NotificationLedger for BrokenLedger {
    async fn has_notified(&self, _key_index: usize) -> Result<bool, Error> {
        Err(Error::ledger("storage unavailable"))
    }

    async fn mark_notified(&self, _key_index: usize) -> Result<(), Error> {
        self.mark_attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::ledger("storage unavailable"))
    }

    async fn get_record(&self, _key_index: usize) -> Result<Option<NotificationRecord>, Error> {
        Err(Error::ledger("storage unavailable"))
    }

    async fn list_records(&self) -> Result<Vec<NotificationRecord>, Error> {
        Err(Error::ledger("storage unavailable"))
    }

    async fn clear(&self, _key_index: usize) -> Result<bool, Error> {
        Err(Error::ledger("storage unavailable"))
    }

    async fn clear_all(&self) -> Result<(), Error> {
        Err(Error::ledger("storage unavailable"))
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// HTTP response outcome
pub fn status(code: u16, body: &str) -> RawOutcome {
    RawOutcome::Response {
        status: code,
        body: body.to_string(),
    }
}

/// 200 response with a JSON body
pub fn ok(body: &str) -> RawOutcome {
    status(200, body)
}

/// Transport failure outcome
pub fn transport(message: &str) -> RawOutcome {
    RawOutcome::TransportFailure {
        message: message.to_string(),
    }
}

/// Key names `k1..=kN`
pub fn keys(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("k{}", i)).collect()
}

/// Minimal configuration: no sleeps, no watched keys, in-memory ledger
pub fn minimal_config(keys: &[String]) -> DispatchConfig {
    let mut config = DispatchConfig::with_keys(KeyPool::new(keys.iter().cloned()));
    config.rotation.base_backoff_secs = 0.0;
    config.rotation.auth_failure_delay_ms = 0;
    config.rotation.max_total_retries = 30;
    config.alerts.watched_indices = WatchSet::empty();
    config.ledger = LedgerConfig::Memory;
    config
}

/// Collect every event currently buffered in the channel
pub fn drain_events(rx: &mut mpsc::Receiver<DispatchEvent>) -> Vec<DispatchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Delays of every backoff sleep, in order
pub fn backoff_delays(events: &[DispatchEvent]) -> Vec<std::time::Duration> {
    events
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::BackoffScheduled { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect()
}
