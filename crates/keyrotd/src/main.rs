// # keyrotd - Key-Rotating Dispatcher
//
// Thin command-line layer over keyrot-core:
// 1. Reading configuration from environment variables
// 2. Initializing logging and the runtime
// 3. Wiring the HTTP upstream, the notification ledger and the alert emitter
// 4. Running one command and mapping its outcome to an exit code
//
// Rotation, classification, backoff and alert deduplication all live in
// keyrot-core; nothing here retries or inspects upstream responses.
//
// ## Configuration
//
// ### Keys and upstream
// - `KEYROT_API_KEYS`: Comma-separated, ordered key pool
// - `KEYROT_ENDPOINT`: Generation endpoint URL
// - `KEYROT_MODEL`: Model identifier
// - `KEYROT_MAX_TOKENS`, `KEYROT_TEMPERATURE`: Request body fields
// - `KEYROT_TIMEOUT_SECS`: Per-call timeout
//
// ### Rotation
// - `KEYROT_MAX_TOTAL_RETRIES`: Upstream calls allowed per request
// - `KEYROT_BASE_BACKOFF_SECS`: Base of the exponential backoff
// - `KEYROT_MAX_BACKOFF_SECS`: Optional cap on a single backoff sleep
// - `KEYROT_AUTH_FAILURE_DELAY_MS`: Fixed delay after an auth failure
//
// ### Alerts and ledger
// - `KEYROT_WATCH_KEYS`: Comma-separated 1-based key indices to alert on
// - `KEYROT_ALERT_TO`: Default alert recipient
// - `KEYROT_LEDGER_TYPE`: `file` (default) or `memory`
// - `KEYROT_LEDGER_PATH`: Ledger file (default `warnings_state.json`)
//
// ### Logging
// - `KEYROT_LOG_LEVEL`: trace, debug, info (default), warn, error
//
// ## Example
//
// ```bash
// export KEYROT_API_KEYS=key-one,key-two,key-three
// export KEYROT_LEDGER_PATH=/var/lib/keyrot/warnings_state.json
//
// keyrotd generate --prompt "Write a haiku about rust"
// keyrotd ledger list
// keyrotd ledger clear 5
// ```

mod cli;
mod settings;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, LedgerCommands};
use keyrot_core::{
    DisabledAlertEmitter, DispatchEvent, DispatchResult, Error as CoreError, GenerationRequest,
    RotationController, open_ledger,
};
use keyrot_upstream_http::HttpUpstreamClient;
use settings::Settings;
use std::process::ExitCode;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Level, debug, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit codes for the different outcomes
///
/// - 0: Success
/// - 1: Configuration error (including an empty key pool)
/// - 2: Runtime error (including an unavailable upstream)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyrotExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<KeyrotExitCode> for ExitCode {
    fn from(code: KeyrotExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return KeyrotExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {:#}", e);
        return KeyrotExitCode::ConfigError.into();
    }

    let log_level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // stdout carries JSON results only
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return KeyrotExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return KeyrotExitCode::RuntimeError.into();
        }
    };

    let code = rt.block_on(async {
        match run(cli.command, settings).await {
            Ok(code) => code,
            Err(e) => {
                error!("keyrotd error: {:#}", e);
                exit_code_for(&e)
            }
        }
    });

    code.into()
}

/// Map a command error to an exit code
fn exit_code_for(err: &anyhow::Error) -> KeyrotExitCode {
    match err.downcast_ref::<CoreError>() {
        Some(CoreError::Config(_)) | Some(CoreError::NotConfigured) => KeyrotExitCode::ConfigError,
        _ => KeyrotExitCode::RuntimeError,
    }
}

async fn run(command: Commands, settings: Settings) -> Result<KeyrotExitCode> {
    match command {
        Commands::Generate {
            prompt,
            recipient,
            metadata,
        } => {
            let mut request = GenerationRequest::new(prompt);
            if let Some(recipient) = recipient {
                request = request.with_recipient(recipient);
            }
            if let Some(raw) = metadata {
                request = request.with_metadata(parse_metadata(&raw)?);
            }
            generate(settings, request).await
        }
        Commands::Ledger { cmd } => ledger(settings, cmd).await,
    }
}

/// Parse `--metadata`, which must be a JSON object
fn parse_metadata(raw: &str) -> Result<serde_json::Map<String, serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(_) => Err(CoreError::config("--metadata must be a JSON object").into()),
        Err(e) => Err(CoreError::config(format!("--metadata is not valid JSON: {}", e)).into()),
    }
}

async fn generate(settings: Settings, request: GenerationRequest) -> Result<KeyrotExitCode> {
    let config = settings.dispatch;
    info!(
        "Dispatching request over {} key(s) (budget {})",
        config.keys.len(),
        config.rotation.max_total_retries
    );

    let client = HttpUpstreamClient::new(&config.upstream)?;
    let ledger = open_ledger(&config.ledger).await?;
    let (controller, event_rx) = RotationController::new(
        config,
        Box::new(client),
        ledger,
        Box::new(DisabledAlertEmitter),
    )?;

    let events = tokio::spawn(log_events(event_rx));

    let outcome = controller.dispatch(request).await;
    if let Err(e) = controller.ledger().flush().await {
        error!("Failed to flush notification ledger: {}", e);
    }

    // closes the event channel so the logger drains and exits
    drop(controller);
    if let Err(e) = events.await {
        debug!("Event logger ended abnormally: {}", e);
    }

    let (result, code) = match outcome {
        Ok(result) => (result, KeyrotExitCode::Success),
        Err(e) => {
            let code = if e.is_not_configured() {
                KeyrotExitCode::ConfigError
            } else {
                KeyrotExitCode::RuntimeError
            };
            error!("Dispatch failed: {}", e);
            (DispatchResult::failed(&e), code)
        }
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(code)
}

async fn log_events(rx: mpsc::Receiver<DispatchEvent>) {
    let mut stream = ReceiverStream::new(rx);
    while let Some(event) = stream.next().await {
        debug!(?event, "Dispatch event");
    }
}

async fn ledger(settings: Settings, cmd: LedgerCommands) -> Result<KeyrotExitCode> {
    let ledger = open_ledger(&settings.dispatch.ledger).await?;

    match cmd {
        LedgerCommands::List => {
            let records = ledger.list_records().await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        LedgerCommands::Clear { all: true, .. } => {
            ledger.clear_all().await?;
            info!("Cleared every notification record");
        }
        LedgerCommands::Clear {
            index: Some(index), ..
        } => {
            if ledger.clear(index).await? {
                info!("Cleared notification record for key index {}", index);
            } else {
                info!("Key index {} had no notification record", index);
            }
        }
        LedgerCommands::Clear { index: None, .. } => {
            anyhow::bail!(CoreError::config("ledger clear needs a key index or --all"));
        }
    }

    ledger.flush().await?;
    Ok(KeyrotExitCode::Success)
}
