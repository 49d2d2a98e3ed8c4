use crate::config::ConfigArgs;
use clap::Args;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(flatten)]
    pub config: ConfigArgs,
}
