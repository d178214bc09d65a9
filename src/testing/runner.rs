//! Scenario runner
//!
//! Loads a YAML scenario, drives it through [`ConsoleTest`] and prints a
//! colored summary per transport.

use std::path::Path;
use std::time::Instant;

use colored::Colorize;

use crate::common::{Error, Result};
use crate::coordinator::Coordinator;
use crate::harness::ConsoleTest;
use crate::program::Program;
use crate::scenario::Scenario;
use crate::transport::TransportMode;

use super::config::TestScenario;

/// Result of a test run
#[derive(Debug)]
pub struct TestResult {
    pub name: String,
    pub passed: bool,
    /// Transports the scenario was scheduled on
    pub modes: Vec<TransportMode>,
    /// Transport that failed first, if any
    pub failed_mode: Option<TransportMode>,
    pub steps_total: usize,
    pub error: Option<String>,
}

/// A scenario that has been parsed and validated but not run
#[derive(Debug)]
pub struct CheckedScenario {
    pub scenario: TestScenario,
    pub program: Program,
    /// The steps, ready to run
    pub steps: Scenario,
}

/// Parse a scenario file and everything it refers to without running it
pub fn check_scenario(path: &Path) -> Result<CheckedScenario> {
    let scenario = TestScenario::load(path)?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    let program = Program::parse(&scenario.program_source(base_dir)?)?;
    program.check_line_numbers()?;
    let steps = scenario.build()?;
    Ok(CheckedScenario {
        scenario,
        program,
        steps,
    })
}

/// Run a test scenario from a YAML file
///
/// Failures of the scenario itself end up in the returned [`TestResult`];
/// only problems loading the file are returned as errors.
pub async fn run_scenario(harness: &ConsoleTest, path: &Path, verbose: bool) -> Result<TestResult> {
    let CheckedScenario {
        scenario,
        program,
        steps,
    } = check_scenario(path)?;

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let modes = if scenario.command.is_some() {
        vec![TransportMode::Local]
    } else {
        let run = &harness.config().run;
        Coordinator::new(run.parallel, scenario.remote && run.remote).modes()
    };

    if verbose {
        let labels: Vec<&str> = modes.iter().map(|m| m.label()).collect();
        println!("  Transports: {}", labels.join(", ").dimmed());
        println!("  Steps: {}", scenario.steps.len().to_string().dimmed());
    }

    let started = Instant::now();
    let outcome = match &scenario.command {
        Some(command) => {
            harness
                .command_scenario(&program, &command.executable, command.args.as_slice(), &steps)
                .await
        }
        None => {
            harness
                .debug_scenario(&program, steps, scenario.remote)
                .await
        }
    };
    tracing::debug!(name = %scenario.name, elapsed = ?started.elapsed(), "Scenario finished");

    let steps_total = scenario.steps.len();
    match outcome {
        Ok(()) => {
            for mode in &modes {
                println!("  {} {}", "✓".green(), mode.label());
            }
            println!("\n{} {}\n", "✓".green().bold(), "Test Passed".green().bold());
            Ok(TestResult {
                name: scenario.name,
                passed: true,
                modes,
                failed_mode: None,
                steps_total,
                error: None,
            })
        }
        Err(e) => {
            let failed_mode = e.run_failure().map(|f| f.mode);
            match failed_mode {
                Some(mode) => println!("  {} {}", "✗".red(), mode.label()),
                None => println!("  {} {}", "✗".red(), summary(&e)),
            }
            println!("{}", e);
            println!("\n{} {}\n", "✗".red().bold(), "Test Failed".red().bold());
            Ok(TestResult {
                name: scenario.name,
                passed: false,
                modes,
                failed_mode,
                steps_total,
                error: Some(e.to_string()),
            })
        }
    }
}

/// One-line description of errors that carry no report
fn summary(e: &Error) -> String {
    match e {
        Error::SessionTimeout(secs) => format!("overall timeout after {} sec", secs),
        Error::InvalidProgram(_) => "program line numbers".to_string(),
        _ => "run aborted".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_check_scenario_accepts_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "ok.yml",
            "name: ok\nprogram: |\n  1| a = 1\n  2| b = 2\nsteps:\n  - action: type\n    command: c\n",
        );

        let checked = check_scenario(&path).unwrap();
        assert_eq!(checked.scenario.name, "ok");
        assert_eq!(checked.program.code(), "a = 1\nb = 2\n");
        assert_eq!(checked.steps.len(), 1);
    }

    #[test]
    fn test_check_scenario_rejects_misnumbered_program() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.yml",
            "name: bad\nprogram: |\n  1| a = 1\n  3| b = 2\nsteps: []\n",
        );

        assert!(matches!(
            check_scenario(&path),
            Err(Error::InvalidProgram(_))
        ));
    }

    #[test]
    fn test_check_scenario_missing_file() {
        let err = check_scenario(Path::new("/nonexistent/scenario.yml")).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }

    #[test]
    fn test_summary_for_overall_timeout() {
        assert_eq!(
            summary(&Error::SessionTimeout(90)),
            "overall timeout after 90 sec"
        );
    }
}
