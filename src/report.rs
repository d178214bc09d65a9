//! Failure reports
//!
//! A failing run is surfaced as one text block holding what the debugger
//! session showed, what the remote debuggee showed (socket transports only)
//! and the failure message tagged with the transport mode.

use std::fmt;

use crate::common::Error;
use crate::session::RunState;
use crate::transport::TransportMode;

const DEBUGGER_HEADER: &str = "| Debugger Session |";
const DEBUGGEE_HEADER: &str = "| Debuggee Session |";
const FAILURE_HEADER: &str = "| Failure Message |";

/// Render the report for `messages` against everything `state` collected
pub fn render(messages: &[String], state: &RunState) -> String {
    let debuggee = state
        .mode()
        .is_remote()
        .then(|| state.debuggee_backlog());
    render_parts(state.backlog(), debuggee.as_deref(), messages, state.mode())
}

fn render_parts(
    backlog: &[String],
    debuggee: Option<&[String]>,
    messages: &[String],
    mode: TransportMode,
) -> String {
    let mut sections = vec![section(DEBUGGER_HEADER, &quote(backlog))];
    if let Some(lines) = debuggee {
        sections.push(section(DEBUGGEE_HEADER, &quote(lines)));
    }
    let failure = messages
        .iter()
        .map(|message| format!("{} on {} mode", message, mode.label()))
        .collect::<Vec<_>>()
        .join("\n");
    sections.push(section(FAILURE_HEADER, &failure));

    format!("\n{}", sections.join("\n\n"))
}

fn section(header: &str, body: &str) -> String {
    let ruler = "-".repeat(header.len());
    format!("{ruler}\n{header}\n{ruler}\n\n{body}")
}

fn quote(lines: &[String]) -> String {
    if lines.is_empty() {
        return "> ".to_string();
    }
    lines
        .iter()
        .map(|line| format!("> {}", line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The outcome of a failed transport run
#[derive(Debug)]
pub struct RunFailure {
    pub error: Error,
    /// A process that would not finish, reported after the main failure
    pub cleanup: Option<Error>,
    pub mode: TransportMode,
    report: String,
}

impl RunFailure {
    pub fn new(error: Error, state: &RunState) -> Self {
        Self::with_cleanup(error, None, state)
    }

    pub fn with_cleanup(error: Error, cleanup: Option<Error>, state: &RunState) -> Self {
        let mut messages = vec![error.to_string()];
        messages.extend(cleanup.iter().map(Error::to_string));
        let report = render(&messages, state);
        Self {
            error,
            cleanup,
            mode: state.mode(),
            report,
        }
    }

    /// A failure that happened before any session output existed
    pub fn without_session(error: Error, mode: TransportMode) -> Self {
        let report = render_parts(&[], None, &[error.to_string()], mode);
        Self {
            error,
            cleanup: None,
            mode,
            report,
        }
    }

    pub fn report(&self) -> &str {
        &self.report
    }

    pub fn is_cancelled(&self) -> bool {
        self.error.is_cancelled()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report)
    }
}

impl std::error::Error for RunFailure {}
