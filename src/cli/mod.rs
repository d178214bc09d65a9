//! CLI command handling
//!
//! Dispatches CLI commands and formats the summary.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::harness::ConsoleTest;
use crate::testing::{self, TestResult};

/// Overrides given on the command line, applied after the environment
#[derive(Debug, Default, Clone, Copy)]
pub struct RunOverrides {
    pub sequential: bool,
    pub local_only: bool,
    pub echo: bool,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) {
        if self.sequential {
            config.run.parallel = false;
        }
        if self.local_only {
            config.run.remote = false;
        }
        if self.echo {
            config.run.echo_output = true;
        }
    }
}

/// Load the configuration the way `run` sees it
pub fn load_config(path: Option<&Path>, overrides: RunOverrides) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.apply_env();
    overrides.apply(&mut config);
    Ok(config)
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            paths,
            config,
            sequential,
            local_only,
            echo,
            log_file: _,
            verbose,
        } => {
            let overrides = RunOverrides {
                sequential,
                local_only,
                echo,
            };
            let config = load_config(config.as_deref(), overrides)?;
            tracing::debug!(?config, "Loaded configuration");
            let harness = ConsoleTest::new(config)?;

            let mut results = Vec::with_capacity(paths.len());
            for path in &paths {
                results.push(testing::run_scenario(&harness, path, verbose).await?);
            }
            print_summary(&results);

            let failed = results.iter().filter(|r| !r.passed).count();
            if failed > 0 {
                return Err(Error::TestAssertion(format!(
                    "{} of {} scenarios failed",
                    failed,
                    results.len()
                )));
            }
            Ok(())
        }

        Commands::Check { paths } => {
            let mut invalid: Vec<(PathBuf, Error)> = Vec::new();
            for path in paths {
                match testing::check_scenario(&path) {
                    Ok(checked) => println!(
                        "  {} {} ({} steps)",
                        "✓".green(),
                        checked.scenario.name,
                        checked.scenario.steps.len()
                    ),
                    Err(e) => {
                        println!("  {} {}: {}", "✗".red(), path.display(), e);
                        invalid.push((path, e));
                    }
                }
            }
            if invalid.is_empty() {
                Ok(())
            } else {
                Err(Error::ScenarioParse(format!(
                    "{} invalid scenario file(s)",
                    invalid.len()
                )))
            }
        }
    }
}

fn print_summary(results: &[TestResult]) {
    if results.len() < 2 {
        return;
    }
    println!("{}", "Summary:".cyan());
    for result in results {
        if result.passed {
            println!("  {} {}", "✓".green(), result.name);
        } else {
            let mode = result
                .failed_mode
                .map(|m| format!(" ({})", m.label()))
                .unwrap_or_default();
            println!("  {} {}{}", "✗".red(), result.name, mode);
        }
    }
}
