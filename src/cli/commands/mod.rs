pub mod config;
pub mod serve;

pub use config::ConfigCommand;
pub use serve::ServeCommand;

use clap::Subcommand;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a relay link
    Serve(ServeCommand),
    /// Print the effective configuration as JSON
    Config(ConfigCommand),
}
