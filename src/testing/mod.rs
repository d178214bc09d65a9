//! YAML scenario runner
//!
//! Lets scenarios be written as data and run from the command line
//! instead of as Rust tests.

mod config;
mod runner;

pub use config::*;
pub use runner::{check_scenario, run_scenario, CheckedScenario, TestResult};
