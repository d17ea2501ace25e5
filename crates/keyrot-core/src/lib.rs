// # keyrot-core
//
// Core library for the credential-rotating request dispatcher.
//
// ## Architecture Overview
//
// A generation request is attempted against an upstream text-generation API
// using a pool of API keys in fixed priority order:
// - **UpstreamClient**: Trait for issuing one generation call with one key
// - **classify**: Maps a raw upstream outcome to a closed `Verdict`
// - **RotationController**: Walks the key pool, backs off, enforces the retry budget
// - **NotificationLedger**: Durable set of key indices that were already alerted
// - **AlertEmitter**: Trait for delivering "key exhausted" alerts
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Dispatch logic is separate from transports
// 2. **Explicit Configuration**: One immutable `DispatchConfig`, no globals
// 3. **Library-First**: The binary is a thin wiring layer over this crate
// 4. **At-most-once alerts**: The ledger's idempotent mark is the dedup mechanism

pub mod alert;
pub mod classify;
pub mod config;
pub mod error;
pub mod ledger;
pub mod request;
pub mod rotation;
pub mod traits;

// Re-export core types for convenience
pub use alert::{Alert, DisabledAlertEmitter};
pub use classify::{Verdict, classify};
pub use config::{AlertConfig, DispatchConfig, KeyPool, LedgerConfig, RotationConfig, UpstreamConfig, WatchSet};
pub use error::{Error, ExhaustionReason, Result};
pub use ledger::{FileNotificationLedger, MemoryNotificationLedger, open_ledger};
pub use request::{AttemptOutcome, DispatchResult, GenerationRequest};
pub use rotation::{DispatchEvent, RotationController};
pub use traits::{AlertEmitter, NotificationLedger, NotificationRecord, RawOutcome, UpstreamCall, UpstreamClient};
