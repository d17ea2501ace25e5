use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "keyrotd")]
#[command(about = "Key-rotating dispatcher for a rate-limited generation API")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Dispatch one generation request and print the result as JSON
    Generate {
        /// Prompt text sent to the upstream
        #[arg(long)]
        prompt: String,

        /// Alert recipient (defaults to KEYROT_ALERT_TO)
        #[arg(long)]
        recipient: Option<String>,

        /// Opaque JSON object forwarded to the upstream
        #[arg(long)]
        metadata: Option<String>,
    },

    /// Inspect or reset the notification ledger
    Ledger {
        #[command(subcommand)]
        cmd: LedgerCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum LedgerCommands {
    /// Print every notified key index as JSON
    List,

    /// Forget a notified key index so it can alert again
    Clear {
        /// 1-based key index
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        index: Option<usize>,

        /// Forget every notified key index
        #[arg(long)]
        all: bool,
    },
}
