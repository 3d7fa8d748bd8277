use clap::Subcommand;

use super::monitor::MonitorArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Attach to a running browser and capture its activity
    Monitor(MonitorArgs),

    /// Show version, build and configuration details
    Info,
}
