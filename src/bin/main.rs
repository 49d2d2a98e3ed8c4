//! relaylink binary.
//!
//! Runs a relay link with a built-in message processor, or prints the
//! effective configuration.

use anyhow::Context;
use clap::Parser;
use relaylink_core::{
    cli::commands::Commands,
    cli::handlers::{handle_config, handle_serve},
    cli::logging::init_logging,
    config::Settings,
};
use tracing::info;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(cmd) => {
            let settings =
                Settings::load(&cmd.config).context("Failed to load configuration")?;
            let _log_guard = init_logging(cli.verbose, &settings.logging);

            info!("relaylink v{} starting up", env!("CARGO_PKG_VERSION"));
            handle_serve(settings).await
        }
        Commands::Config(cmd) => {
            let settings =
                Settings::load(&cmd.config).context("Failed to load configuration")?;
            handle_config(&settings)
        }
    }
}
