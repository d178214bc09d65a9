//! console-harness - drives a debugger REPL through scripted scenarios
//!
//! Each scenario runs against the debugger over a local PTY and, when
//! enabled, through its UNIX domain socket and TCP/IP remote transports.

use clap::Parser;
use console_harness::common::{logging, paths};
use console_harness::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "console-harness", about = "Scripted console tests for debugger REPLs")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Run { log_file, .. } => log_file.clone(),
        _ => None,
    };

    // Held until exit so the file writer is flushed
    let _guard = match log_file {
        Some(name) => {
            let dir = paths::log_dir().unwrap_or_else(std::env::temp_dir);
            match logging::init_file(&dir, &name) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    eprintln!("Error: cannot open log file in {}: {e}", dir.display());
                    std::process::exit(1);
                }
            }
        }
        None => {
            logging::init_cli();
            None
        }
    };

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
