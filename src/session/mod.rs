//! Driving one debugger session over a PTY
//!
//! [`run_session`] spawns the debugger, hands its output to a
//! [`SessionReader`], and then always tears everything down: the remote
//! debuggee first, then the debugger's own terminal and process.

mod reader;
mod rules;
mod state;

pub use reader::{LineSink, SessionReader};
pub use rules::{check_error, LineKind, LineRules};
pub use state::{InternalInfo, RunState};

use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::common::config::Config;
use crate::common::Error;
use crate::pty::{CommandSpec, PtyProcess};
use crate::report::RunFailure;

/// Timing and diagnostics for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Budget from spawn to stream end
    pub timeout: Duration,
    /// How long each process may take to exit after its terminal closes
    pub exit_wait: Duration,
    pub echo: bool,
}

impl SessionOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeouts.session_secs),
            exit_wait: Duration::from_secs(config.timeouts.exit_wait_secs),
            echo: config.run.echo_output,
        }
    }
}

/// Run `command` against `state` and clean up whatever the outcome
pub async fn run_session(
    command: &CommandSpec,
    mut state: RunState,
    rules: &LineRules,
    options: &SessionOptions,
    mut cancel: CancelSignal,
) -> Result<(), RunFailure> {
    let mode = state.mode();
    tracing::debug!(mode = %mode, command = %command.display(), "Starting session");

    let (mut process, mut lines) = match PtyProcess::spawn("debugger", command) {
        Ok(spawned) => spawned,
        Err(e) => {
            state.terminate_remote(options.exit_wait).await;
            return Err(RunFailure::new(e, &state));
        }
    };

    let outcome = SessionReader::new(rules, options.timeout)
        .echo(options.echo)
        .run(&mut state, &mut lines, &mut process, &mut cancel)
        .await;

    state.terminate_remote(options.exit_wait).await;
    drop(lines);
    if !process.shutdown(options.exit_wait).await {
        state.set_failed_process(process.name());
    }

    let cleanup = state
        .failed_process()
        .map(|name| Error::CleanupFailure(name.to_string()));

    match (outcome, cleanup) {
        (Ok(()), None) => {
            tracing::debug!(mode = %mode, "Session finished");
            Ok(())
        }
        (Ok(()), Some(cleanup)) => Err(RunFailure::new(cleanup, &state)),
        (Err(e), _) if e.is_cancelled() => Err(RunFailure::new(e, &state)),
        (Err(e), cleanup) => Err(RunFailure::with_cleanup(e, cleanup, &state)),
    }
}
