//! console-harness - scripted console tests for debugger REPLs
//!
//! A scenario is a queue of commands and assertions. The harness starts the
//! debugger under a pseudo-terminal, reads its output line by line and
//! releases the next command whenever the prompt appears. The same scenario
//! runs locally and through the debugger's UNIX domain socket and TCP/IP
//! remote modes.

pub mod cancel;
pub mod cli;
pub mod commands;
pub mod common;
pub mod coordinator;
pub mod harness;
pub mod program;
pub mod pty;
pub mod report;
pub mod scenario;
pub mod session;
pub mod testing;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use harness::ConsoleTest;
pub use report::RunFailure;
pub use scenario::{Scenario, ScenarioBuilder};
pub use transport::TransportMode;
