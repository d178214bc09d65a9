//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenarios.

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::scenario::{Scenario, ScenarioBuilder};

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug)]
pub struct TestScenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Program text, usually with `N|` line numbers
    pub program: Option<String>,
    /// Program file, relative to the scenario file
    pub program_file: Option<PathBuf>,
    /// Run the socket transports too (default: true)
    #[serde(default = "default_remote")]
    pub remote: bool,
    /// Run this command line instead of the debugger (local only)
    pub command: Option<CustomCommand>,
    /// The sequence of steps to execute
    pub steps: Vec<TestStep>,
}

fn default_remote() -> bool {
    true
}

/// A command line run in place of the debugger
#[derive(Deserialize, Debug)]
pub struct CustomCommand {
    /// Executable, resolved through PATH when bare
    pub executable: PathBuf,
    /// Arguments; `{program}` is the staged program
    #[serde(default)]
    pub args: Vec<String>,
}

/// A single scripted step
#[derive(Deserialize, Debug)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum TestStep {
    /// Send a command line
    Type { command: String },
    /// Send a command that is answered by a `[y/n]` question
    TypeInteractive { command: String },
    /// Check the current line number
    AssertLineNum { line: u64 },
    /// Check that the last command's output contains `text`
    AssertLineText { text: String },
    /// Check that the last command's output matches `pattern`
    AssertLineMatch { pattern: String },
    /// Check that the last command's output does not contain `text`
    AssertNoLineText { text: String },
    /// Check the remote debuggee's own output (skipped for local runs)
    AssertDebuggeeLineText { text: String },
    /// Check a local variable reported by the debugger
    AssertLocal { name: String, value: String },
    /// Fail the scenario when reached
    FlunkFinish { message: String },
}

impl TestStep {
    /// Add this step to a scenario being built
    pub fn apply(&self, builder: &mut ScenarioBuilder) -> Result<()> {
        match self {
            TestStep::Type { command } => {
                builder.type_cmd(command.as_str());
            }
            TestStep::TypeInteractive { command } => {
                builder.type_interactive(command.as_str());
            }
            TestStep::AssertLineNum { line } => {
                builder.assert_line_num(*line);
            }
            TestStep::AssertLineText { text } => {
                builder.assert_line_text(text.as_str());
            }
            TestStep::AssertLineMatch { pattern } => {
                let re = Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, &e))?;
                builder.assert_line_text(re);
            }
            TestStep::AssertNoLineText { text } => {
                builder.assert_no_line_text(text.as_str());
            }
            TestStep::AssertDebuggeeLineText { text } => {
                builder.assert_debuggee_line_text(text.as_str());
            }
            TestStep::AssertLocal { name, value } => {
                let name = name.clone();
                let expected = value.clone();
                builder.assert_with(move |state| {
                    let actual = state
                        .internal_info()
                        .and_then(|info| info.local(&name))
                        .map(render_value);
                    if actual.as_deref() == Some(expected.as_str()) {
                        return Ok(());
                    }
                    Err(Error::TestAssertion(format!(
                        "Expected local `{}` to be {:?}, but was {}",
                        name,
                        expected,
                        actual.map_or_else(|| "undefined".to_string(), |v| format!("{:?}", v))
                    )))
                });
            }
            TestStep::FlunkFinish { message } => {
                builder.flunk_finish(message.as_str());
            }
        }
        Ok(())
    }
}

/// Locals arrive as JSON; strings compare without their quotes
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TestScenario {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| Error::ScenarioParse(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    /// Build the scenario from the steps
    pub fn build(&self) -> Result<Scenario> {
        let mut builder = ScenarioBuilder::new();
        for step in &self.steps {
            step.apply(&mut builder)?;
        }
        Ok(builder.freeze())
    }

    /// The program text, reading `program_file` relative to `base_dir`
    pub fn program_source(&self, base_dir: &Path) -> Result<String> {
        match (&self.program, &self.program_file) {
            (Some(text), None) => Ok(text.clone()),
            (None, Some(file)) => {
                let path = if file.is_relative() {
                    base_dir.join(file)
                } else {
                    file.clone()
                };
                std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })
            }
            (Some(_), Some(_)) => Err(Error::ScenarioParse(
                "'program' and 'program_file' are mutually exclusive".to_string(),
            )),
            (None, None) => Err(Error::ScenarioParse(
                "one of 'program' or 'program_file' is required".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Directive;

    const YAML: &str = r#"
name: eval on every transport
description: evaluates an expression and continues
program: |
  1| a = 1
  2| b = a + 1
steps:
  - action: type
    command: "p 1+1"
  - action: assert_line_text
    text: "=> 2"
  - action: assert_line_match
    pattern: '=> \d+'
  - action: type
    command: "q"
  - action: type
    command: "y"
"#;

    #[test]
    fn test_parse_and_build() {
        let scenario = TestScenario::from_yaml(YAML).unwrap();
        assert_eq!(scenario.name, "eval on every transport");
        assert!(scenario.remote);
        assert!(scenario.command.is_none());
        assert_eq!(scenario.steps.len(), 5);

        let built = scenario.build().unwrap();
        let directives = built.directives();
        assert!(matches!(&directives[0], Directive::Literal(c) if c == "p 1+1"));
        assert!(matches!(&directives[1], Directive::Callback(_)));
        assert!(matches!(&directives[3], Directive::InteractivePrompt(c) if c == "q"));
    }

    #[test]
    fn test_program_source_inline() {
        let scenario = TestScenario::from_yaml(YAML).unwrap();
        let source = scenario.program_source(Path::new("/nonexistent")).unwrap();
        assert!(source.starts_with("1| a = 1"));
    }

    #[test]
    fn test_program_file_is_relative_to_scenario() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("target.rb"), "puts 1\n").unwrap();
        let scenario = TestScenario::from_yaml(
            "name: file\nprogram_file: target.rb\nremote: false\nsteps: []\n",
        )
        .unwrap();

        assert!(!scenario.remote);
        assert_eq!(scenario.program_source(dir.path()).unwrap(), "puts 1\n");
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let scenario = TestScenario::from_yaml("name: none\nsteps: []\n").unwrap();
        assert!(matches!(
            scenario.program_source(Path::new(".")),
            Err(Error::ScenarioParse(_))
        ));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let err = TestScenario::from_yaml(
            "name: bad\nprogram: x\nsteps:\n  - action: teleport\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::ScenarioParse(_)));
    }

    #[test]
    fn test_invalid_match_pattern() {
        let scenario = TestScenario::from_yaml(
            "name: bad\nprogram: x\nsteps:\n  - action: assert_line_match\n    pattern: '('\n",
        )
        .unwrap();
        assert!(matches!(
            scenario.build(),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_custom_command() {
        let scenario = TestScenario::from_yaml(
            "name: plain\nprogram: x\ncommand:\n  executable: ruby\n  args: ['-r', 'debug/start', '{program}']\nsteps: []\n",
        )
        .unwrap();
        let command = scenario.command.unwrap();
        assert_eq!(command.executable, PathBuf::from("ruby"));
        assert_eq!(command.args, vec!["-r", "debug/start", "{program}"]);
    }
}
