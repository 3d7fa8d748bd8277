use super::info::cmd_info;
use super::monitor::cmd_monitor;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(command: Commands, ctx: &CliContext) -> Result<()> {
    match command {
        Commands::Monitor(args) => cmd_monitor(args, ctx).await,
        Commands::Info => cmd_info(ctx).await,
    }
}
