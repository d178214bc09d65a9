//! The session reader: consumes output lines and drives the scenario queue

use std::io;
use std::time::Duration;

use tokio::sync::mpsc;

use super::rules::{check_error, LineKind, LineRules};
use super::state::{InternalInfo, RunState};
use crate::cancel::CancelSignal;
use crate::common::{Error, Result};
use crate::pty::{is_stream_closed, PtyProcess};
use crate::scenario::Directive;

/// Where dispatched commands are written
pub trait LineSink {
    fn send_line(&mut self, line: &str) -> io::Result<()>;
}

impl LineSink for PtyProcess {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.write_line(line)
    }
}

impl LineSink for Vec<String> {
    fn send_line(&mut self, line: &str) -> io::Result<()> {
        self.push(line.to_string());
        Ok(())
    }
}

/// Reads one session to completion
pub struct SessionReader<'a> {
    rules: &'a LineRules,
    timeout: Duration,
    echo: bool,
}

impl<'a> SessionReader<'a> {
    pub fn new(rules: &'a LineRules, timeout: Duration) -> Self {
        Self {
            rules,
            timeout,
            echo: false,
        }
    }

    /// Log every line at info level instead of trace
    pub fn echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Read until the stream ends, a failure is detected, the run times out,
    /// or `cancel` fires
    pub async fn run<S: LineSink>(
        &self,
        state: &mut RunState,
        lines: &mut mpsc::Receiver<io::Result<String>>,
        sink: &mut S,
        cancel: &mut CancelSignal,
    ) -> Result<()> {
        match tokio::time::timeout(self.timeout, self.read_loop(state, lines, sink, cancel)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::SessionTimeout(self.timeout.as_secs())),
        }
    }

    async fn read_loop<S: LineSink>(
        &self,
        state: &mut RunState,
        lines: &mut mpsc::Receiver<io::Result<String>>,
        sink: &mut S,
        cancel: &mut CancelSignal,
    ) -> Result<()> {
        loop {
            let item = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                item = lines.recv() => item,
            };

            match item {
                Some(Ok(line)) => self.on_line(state, line, sink)?,
                Some(Err(e)) if is_stream_closed(&e) => return self.finish(state, Some(&e)),
                Some(Err(e)) => return Err(Error::Io(e)),
                None => return self.finish(state, None),
            }
        }
    }

    /// Handle one line of output
    pub fn on_line<S: LineSink>(
        &self,
        state: &mut RunState,
        line: String,
        sink: &mut S,
    ) -> Result<()> {
        if self.echo {
            tracing::info!(mode = %state.mode(), line = %line, "session");
        } else {
            tracing::trace!(mode = %state.mode(), line = %line, "session");
        }

        let next = match self.rules.classify(&line, state.prompt()) {
            LineKind::Marker(payload) => {
                // Markers never reach the backlogs
                let info = InternalInfo::parse(payload)?;
                state.set_internal_info(info);
                return dispatch(state, sink);
            }
            LineKind::Confirmation => AfterLine::RunPending,
            LineKind::Prompt => AfterLine::CheckReplError,
            LineKind::Output => AfterLine::Continue,
        };

        state.push_line(line);
        match next {
            AfterLine::RunPending => run_pending(state),
            AfterLine::CheckReplError => check_error(self.rules.repl_error(), state.segment()),
            AfterLine::Continue => Ok(()),
        }
    }

    /// Checks made once the stream has ended
    pub fn finish(&self, state: &RunState, closed_by: Option<&io::Error>) -> Result<()> {
        check_error(self.rules.debuggee_exception(), state.segment())?;

        if state.remaining() == 0 {
            return Ok(());
        }

        let mut message = format!(
            "Expected all commands/assertions to be executed. Still have {} left.",
            state.remaining()
        );
        if let Some(e) = closed_by {
            message.push_str(&format!("\nAssociated exception: {:?} - {}", e.kind(), e));
        }
        Err(Error::ProtocolDesync(message))
    }
}

enum AfterLine {
    RunPending,
    CheckReplError,
    Continue,
}

/// Pop directives until one hands control back to the process
fn dispatch<S: LineSink>(state: &mut RunState, sink: &mut S) -> Result<()> {
    state.reset_confirmation();

    loop {
        let directive = state.queue.pop().ok_or_else(|| {
            Error::ProtocolDesync("Expected the REPL prompt to finish".to_string())
        })?;

        match directive {
            Directive::Callback(callback) => {
                if state.confirming {
                    state.pending.push_back(callback);
                } else {
                    callback(state)?;
                }
            }
            Directive::TerminalCallback(callback) => {
                callback(state)?;
                return Ok(());
            }
            Directive::InteractivePrompt(text) => {
                sink.send_line(&text)?;
                state.confirming = true;
            }
            Directive::Literal(text) => {
                sink.send_line(&text)?;
                state.clear_segment();
                return Ok(());
            }
        }
    }
}

/// Run the assertions deferred behind a confirmation prompt
///
/// Each deferred assertion runs once, on the first confirmation line.
/// Later `[y/n]` lines before the next marker find the list empty.
fn run_pending(state: &mut RunState) -> Result<()> {
    while let Some(callback) = state.pending.pop_front() {
        callback(state)?;
    }
    Ok(())
}
