//! Rotation controller
//!
//! The RotationController is responsible for:
//! - Walking the key pool in priority order for each request
//! - Classifying every attempt and deciding how to continue
//! - Sleeping between attempts (exponential or short fixed delay)
//! - Enforcing the per-request retry budget
//! - Alerting once per watched key index, recorded in the ledger
//!
//! ## Architecture
//!
//! ```text
//! GenerationRequest
//!        │
//!        ▼
//! ┌────────────────────┐   call    ┌────────────────┐
//! │ RotationController │──────────▶│ UpstreamClient │
//! └────────────────────┘           └────────────────┘
//!        │        │
//!        │        └─ rate limited & watched ─┐
//!        ▼                                   ▼
//! DispatchResult                ┌──────────────────────┐   ┌──────────────┐
//!                               │ NotificationLedger   │◀──│ AlertEmitter │
//!                               └──────────────────────┘   └──────────────┘
//! ```
//!
//! ## Concurrency
//!
//! `dispatch` takes `&self`; share the controller behind an `Arc` and call it
//! from as many tasks as needed. No lock is held across the upstream call or
//! a sleep. Dropping a dispatch future abandons the in-flight call and any
//! pending sleep; ledger writes complete atomically or not at all.

pub mod backoff;
pub mod events;
pub mod walk;

pub use backoff::BackoffPolicy;
pub use events::DispatchEvent;
pub use walk::{Step, WalkState, decide, next_key_index};

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::alert::Alert;
use crate::classify::{Verdict, classify, parse_body};
use crate::config::DispatchConfig;
use crate::error::{Error, ExhaustionReason, Result};
use crate::request::{AttemptOutcome, DispatchResult, GenerationRequest};
use crate::traits::{AlertEmitter, NotificationLedger, RawOutcome, UpstreamCall, UpstreamClient};

/// Longest response body quoted in an error message
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Credential-rotating dispatcher
///
/// ## Lifecycle
///
/// 1. Create with [`RotationController::new()`]
/// 2. Call [`RotationController::dispatch()`] once per request
/// 3. Drain the returned event receiver, or drop it
pub struct RotationController {
    config: DispatchConfig,
    backoff: BackoffPolicy,
    client: Box<dyn UpstreamClient>,
    ledger: Box<dyn NotificationLedger>,
    emitter: Box<dyn AlertEmitter>,
    event_tx: mpsc::Sender<DispatchEvent>,
}

/// Per-request bookkeeping that is not part of the walk state
struct WalkContext {
    call: UpstreamCall,
    recipient: Option<String>,
    last_error: String,
    /// Watched indices whose alert was already attempted in this walk
    alert_attempted: BTreeSet<usize>,
}

impl RotationController {
    /// Create a new controller
    ///
    /// # Returns
    ///
    /// A tuple of (controller, event_receiver)
    pub fn new(
        config: DispatchConfig,
        client: Box<dyn UpstreamClient>,
        ledger: Box<dyn NotificationLedger>,
        emitter: Box<dyn AlertEmitter>,
    ) -> Result<(Self, mpsc::Receiver<DispatchEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.rotation.event_channel_capacity);
        let backoff = BackoffPolicy::from_config(&config.rotation);

        let controller = Self {
            config,
            backoff,
            client,
            ledger,
            emitter,
            event_tx: tx,
        };

        Ok((controller, rx))
    }

    /// The configuration this controller was built with
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The notification ledger consulted for alerts
    pub fn ledger(&self) -> &dyn NotificationLedger {
        self.ledger.as_ref()
    }

    /// Dispatch one generation request
    ///
    /// # Returns
    ///
    /// - `Ok(DispatchResult)`: A key produced a successful response
    /// - `Err(Error::NotConfigured)`: The key pool is empty; no call was made
    /// - `Err(Error::UpstreamUnavailable)`: The walk ended without a success
    pub async fn dispatch(&self, request: GenerationRequest) -> Result<DispatchResult> {
        if self.config.keys.is_empty() {
            warn!("Dispatch rejected: no API keys configured");
            return Err(Error::NotConfigured);
        }

        let recipient = request
            .alert_recipient
            .or_else(|| self.config.alerts.default_recipient.clone());
        let mut ctx = WalkContext {
            call: UpstreamCall::new(request.prompt, request.metadata, self.config.upstream.timeout()),
            recipient,
            last_error: String::new(),
            alert_attempted: BTreeSet::new(),
        };

        let mut state = WalkState::start();
        loop {
            state = match state {
                WalkState::Walking {
                    key_index,
                    attempts,
                } => self.step(key_index, attempts, &mut ctx).await,
                WalkState::Succeeded {
                    key_index,
                    attempts,
                    response,
                } => {
                    info!(
                        "Successful response with key index {} after {} attempt(s)",
                        key_index, attempts
                    );
                    self.emit_event(DispatchEvent::Succeeded {
                        key_index,
                        attempts,
                    });
                    return Ok(DispatchResult::succeeded(key_index, response));
                }
                WalkState::Exhausted { reason, attempts } => {
                    let last_error = if ctx.last_error.is_empty() {
                        reason.to_string()
                    } else {
                        ctx.last_error
                    };
                    error!(
                        "Dispatch exhausted ({}) after {} attempt(s): {}",
                        reason, attempts, last_error
                    );
                    self.emit_event(DispatchEvent::Exhausted { reason, attempts });
                    return Err(Error::upstream_unavailable(reason, attempts, last_error));
                }
            };
        }
    }

    /// Perform one attempt and compute the next walk state
    async fn step(&self, key_index: usize, attempts: usize, ctx: &mut WalkContext) -> WalkState {
        let max_attempts = self.config.rotation.max_total_retries;
        if attempts >= max_attempts {
            return WalkState::Exhausted {
                reason: ExhaustionReason::RetryBudgetExceeded,
                attempts,
            };
        }

        let Some(key) = self.config.keys.get(key_index) else {
            return WalkState::Exhausted {
                reason: ExhaustionReason::PoolExhausted,
                attempts,
            };
        };

        let attempts = attempts + 1;
        info!(
            "Attempting {} request with key index {}/{} (attempt #{})",
            self.client.client_name(),
            key_index,
            self.config.keys.len(),
            attempts
        );
        self.emit_event(DispatchEvent::AttemptStarted {
            key_index,
            attempt: attempts,
        });

        let raw = self.client.call(key, &ctx.call).await;
        let verdict = classify(&raw);
        let (status_code, raw_body) = match raw {
            RawOutcome::Response { status, body } => (Some(status), body),
            RawOutcome::TransportFailure { message } => (None, message),
        };
        self.emit_event(DispatchEvent::AttemptFinished(AttemptOutcome {
            key_index,
            verdict,
            status_code,
            raw_body: raw_body.clone(),
        }));

        match verdict {
            Verdict::Success => {
                return WalkState::Succeeded {
                    key_index,
                    attempts,
                    response: parse_body(&raw_body),
                };
            }
            Verdict::TransportError => {
                warn!("Network error using key index {}: {}", key_index, raw_body);
                ctx.last_error = raw_body;
            }
            Verdict::RateLimited => {
                warn!("Rate limit detected for key index {}", key_index);
                ctx.last_error = format!("Rate limit for key index {}", key_index);
                self.alert_if_watched(key_index, ctx).await;
            }
            Verdict::AuthFailure => {
                ctx.last_error = status_error(status_code, &raw_body);
                warn!(
                    "Authentication failed for key index {}: {}",
                    key_index, ctx.last_error
                );
            }
            Verdict::ServerError | Verdict::OtherFailure => {
                ctx.last_error = status_error(status_code, &raw_body);
                if verdict == Verdict::OtherFailure {
                    error!(
                        "Non-retryable status {} for key index {}; aborting key walk",
                        status_code.unwrap_or_default(),
                        key_index
                    );
                    return WalkState::Exhausted {
                        reason: ExhaustionReason::FatalResponse,
                        attempts,
                    };
                }
                warn!(
                    "Server error {} for key index {}",
                    status_code.unwrap_or_default(),
                    key_index
                );
            }
        }

        let Some(next_key) = next_key_index(key_index, self.config.keys.len(), verdict) else {
            return WalkState::Exhausted {
                reason: ExhaustionReason::PoolExhausted,
                attempts,
            };
        };

        // no sleep when nothing follows it
        if attempts >= max_attempts {
            return WalkState::Exhausted {
                reason: ExhaustionReason::RetryBudgetExceeded,
                attempts,
            };
        }

        let delay = match decide(verdict) {
            Step::FastSkip => self.config.rotation.auth_failure_delay(),
            _ => self.backoff.delay(attempts),
        };
        self.pause(attempts, key_index, delay).await;

        WalkState::Walking {
            key_index: next_key,
            attempts,
        }
    }

    /// Alert on the first observed exhaustion of a watched key
    ///
    /// Alert failures are logged and never change the walk.
    async fn alert_if_watched(&self, key_index: usize, ctx: &mut WalkContext) {
        if !self.config.alerts.watched_indices.contains(key_index) {
            return;
        }
        if !ctx.alert_attempted.insert(key_index) {
            return;
        }

        match self.ledger.has_notified(key_index).await {
            Ok(true) => {
                debug!("Key index {} already notified; suppressing alert", key_index);
                self.emit_event(DispatchEvent::AlertSuppressed { key_index });
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(
                    "Failed to read ledger for key index {}: {}. Skipping alert.",
                    key_index, e
                );
                return;
            }
        }

        let alert = Alert::key_exhausted(key_index, Utc::now(), ctx.recipient.clone());
        if !self.emitter.send(&alert).await {
            warn!(
                "Failed to send notification for key index {}. Continuing rotation.",
                key_index
            );
            self.emit_event(DispatchEvent::AlertFailed { key_index });
            return;
        }

        match self.ledger.mark_notified(key_index).await {
            Ok(()) => {
                info!("Alert sent for key index {}", key_index);
                self.emit_event(DispatchEvent::AlertSent { key_index });
            }
            Err(e) => {
                error!(
                    "Alert sent for key index {} but ledger update failed: {}",
                    key_index, e
                );
            }
        }
    }

    async fn pause(&self, attempt: usize, key_index: usize, delay: Duration) {
        debug!(
            "Waiting {:?} before next attempt (after attempt #{})",
            delay, attempt
        );
        self.emit_event(DispatchEvent::BackoffScheduled {
            attempt,
            key_index,
            delay,
        });
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Emit a dispatch event
    fn emit_event(&self, event: DispatchEvent) {
        // a dropped receiver means nobody is listening
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(
                "Dispatch event channel full, dropping event. Consider increasing event_channel_capacity."
            );
        }
    }
}

/// `Status <code>: <body>` with the body cut to a readable length
fn status_error(status_code: Option<u16>, body: &str) -> String {
    format!(
        "Status {}: {}",
        status_code.unwrap_or_default(),
        truncate(body, MAX_ERROR_BODY_CHARS)
    )
}

/// Truncate text to at most `max_chars` characters
fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
