use crate::config::ConfigArgs;
use clap::Args;

#[derive(Args)]
pub struct ServeCommand {
    #[command(flatten)]
    pub config: ConfigArgs,
}
