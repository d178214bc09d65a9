//! Error types for the console harness
//!
//! Every failure a transport run can hit is one variant here. The session
//! reader turns them into a single structured report (see [`crate::report`])
//! instead of letting them escape as raw faults.

use std::io;
use std::path::Path;
use thiserror::Error;

use crate::report::RunFailure;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the console harness
#[derive(Error, Debug)]
pub enum Error {
    // === Protocol Errors ===
    /// Scripted expectations did not match the observed output cadence
    #[error("{0}")]
    ProtocolDesync(String),

    /// The backlog contains a REPL-side error or a debuggee exception marker
    #[error("Debugger terminated because of: {0}")]
    RuntimeFault(String),

    /// A scripted assertion did not hold
    #[error("{0}")]
    TestAssertion(String),

    // === Timeout Errors ===
    #[error("Remote debuggee was not reachable within {secs} seconds ({what})")]
    SetupTimeout { secs: u64, what: String },

    #[error("TIMEOUT ERROR ({0} sec)")]
    SessionTimeout(u64),

    // === Lifecycle Errors ===
    #[error("Expected the {0} program to finish")]
    CleanupFailure(String),

    #[error("Remote debuggee exited before becoming reachable: {0}")]
    DebuggeeExited(String),

    #[error("Failed to spawn '{program}': {reason}")]
    Spawn { program: String, reason: String },

    /// A sibling transport failed first and this run was asked to stop
    #[error("Run cancelled")]
    Cancelled,

    #[error("Worker for {mode} mode panicked: {message}")]
    WorkerPanicked { mode: String, message: String },

    /// A transport run failed; displays the full report
    #[error("{0}")]
    RunFailed(Box<RunFailure>),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario file: {0}")]
    ScenarioParse(String),

    #[error("Invalid test program: {0}")]
    InvalidProgram(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a spawn error for a program that failed to start
    pub fn spawn(program: impl AsRef<std::ffi::OsStr>, reason: impl ToString) -> Self {
        Self::Spawn {
            program: program.as_ref().to_string_lossy().into_owned(),
            reason: reason.to_string(),
        }
    }

    /// Create a setup timeout error for a socket path that never appeared
    pub fn socket_timeout(secs: u64, path: &Path) -> Self {
        Self::SetupTimeout {
            secs,
            what: format!("socket {} never appeared", path.display()),
        }
    }

    /// Create a setup timeout error for a TCP port that was never announced
    pub fn port_timeout(secs: u64) -> Self {
        Self::SetupTimeout {
            secs,
            what: "no TCP/IP port was announced".to_string(),
        }
    }

    /// Create an invalid pattern error
    pub fn invalid_pattern(pattern: &str, err: &regex::Error) -> Self {
        Self::InvalidPattern {
            pattern: pattern.to_string(),
            reason: err.to_string(),
        }
    }

    /// Whether this outcome stems from cooperative cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// The failed transport run behind this error, if any
    pub fn run_failure(&self) -> Option<&RunFailure> {
        match self {
            Error::RunFailed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<RunFailure> for Error {
    fn from(failure: RunFailure) -> Self {
        Error::RunFailed(Box::new(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_messages() {
        assert_eq!(Error::SessionTimeout(10).to_string(), "TIMEOUT ERROR (10 sec)");

        let err = Error::socket_timeout(3, Path::new("/tmp/x.sock"));
        let msg = err.to_string();
        assert!(msg.contains("within 3 seconds"), "{msg}");
        assert!(msg.contains("/tmp/x.sock"), "{msg}");
    }

    #[test]
    fn test_cleanup_failure_message() {
        let err = Error::CleanupFailure("remote".to_string());
        assert_eq!(err.to_string(), "Expected the remote program to finish");
    }

    #[test]
    fn test_is_cancelled() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::SessionTimeout(1).is_cancelled());
    }
}
