//! CLI command definitions

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run one or more YAML scenario files against the debugger
    Run {
        /// Scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Configuration file (default: the user config directory)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Run the transports one after another
        #[arg(long)]
        sequential: bool,

        /// Only run the local transport
        #[arg(long)]
        local_only: bool,

        /// Echo the debugger's output while scenarios run
        #[arg(long)]
        echo: bool,

        /// Also write a detailed log file with this name to the log directory
        #[arg(long)]
        log_file: Option<String>,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,
    },

    /// Validate scenario files without running them
    Check {
        /// Scenario files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}
