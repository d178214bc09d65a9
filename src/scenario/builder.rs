//! The fixed step vocabulary used to write scenarios

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::{Callback, Directive, Scenario};
use crate::common::{Error, Result};
use crate::session::RunState;
use crate::transport::TransportMode;

/// Commands that make the REPL ask for confirmation before acting
pub const CONFIRMATION_COMMANDS: &[&str] = &["quit", "q", "delete", "del", "kill", "undisplay"];

/// Literal text or a regular expression to look for in output
#[derive(Clone, Debug)]
pub enum TextPattern {
    Text(String),
    Regex(Regex),
}

impl TextPattern {
    pub fn is_match(&self, haystack: &str) -> bool {
        match self {
            TextPattern::Text(text) => haystack.contains(text.as_str()),
            TextPattern::Regex(re) => re.is_match(haystack),
        }
    }
}

impl fmt::Display for TextPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextPattern::Text(text) => write!(f, "{:?}", text),
            TextPattern::Regex(re) => write!(f, "/{}/", re.as_str()),
        }
    }
}

impl From<&str> for TextPattern {
    fn from(text: &str) -> Self {
        TextPattern::Text(text.to_string())
    }
}

impl From<String> for TextPattern {
    fn from(text: String) -> Self {
        TextPattern::Text(text)
    }
}

impl From<Regex> for TextPattern {
    fn from(re: Regex) -> Self {
        TextPattern::Regex(re)
    }
}

/// Collects directives while a scenario's steps are being defined
#[derive(Default)]
pub struct ScenarioBuilder {
    directives: Vec<Directive>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send a command line
    ///
    /// Confirmation commands (see [`CONFIRMATION_COMMANDS`]) are queued as
    /// interactive prompts so that assertions after them wait for the
    /// `[y/n]` question.
    pub fn type_cmd(&mut self, text: impl Into<String>) -> &mut Self {
        let text = text.into();
        if CONFIRMATION_COMMANDS.contains(&text.as_str()) {
            self.directives.push(Directive::InteractivePrompt(text));
        } else {
            self.directives.push(Directive::Literal(text));
        }
        self
    }

    /// Send a command line that is answered by a confirmation prompt
    pub fn type_interactive(&mut self, text: impl Into<String>) -> &mut Self {
        self.directives.push(Directive::InteractivePrompt(text.into()));
        self
    }

    /// Queue an arbitrary assertion
    pub fn assert_with<F>(&mut self, check: F) -> &mut Self
    where
        F: Fn(&mut RunState) -> Result<()> + Send + Sync + 'static,
    {
        self.directives.push(Directive::Callback(Arc::new(check)));
        self
    }

    /// Assert the line reported by the last synchronization marker
    pub fn assert_line_num(&mut self, expected: u64) -> &mut Self {
        self.assert_with(move |state| {
            let actual = state.internal_info().and_then(|info| info.line());
            if actual == Some(expected) {
                return Ok(());
            }
            let actual = actual.map_or_else(|| "unknown".to_string(), |n| n.to_string());
            Err(Error::TestAssertion(format!(
                "Expected line number to be {}, but was {}",
                expected, actual
            )))
        })
    }

    /// Assert that output since the last command contains `pattern`
    pub fn assert_line_text(&mut self, pattern: impl Into<TextPattern>) -> &mut Self {
        let pattern = pattern.into();
        self.assert_with(move |state| {
            let recent = state.recent_output();
            if pattern.is_match(&recent) {
                return Ok(());
            }
            Err(Error::TestAssertion(format!(
                "Expected to include `{}` in\n(\n{})\n",
                pattern, recent
            )))
        })
    }

    /// Assert that output since the last command does not contain `pattern`
    pub fn assert_no_line_text(&mut self, pattern: impl Into<TextPattern>) -> &mut Self {
        let pattern = pattern.into();
        self.assert_with(move |state| {
            let recent = state.recent_output();
            if !pattern.is_match(&recent) {
                return Ok(());
            }
            Err(Error::TestAssertion(format!(
                "Expected not to include `{}` in\n(\n{})\n",
                pattern, recent
            )))
        })
    }

    /// Assert on the remote debuggee's own output; skipped for local runs
    pub fn assert_debuggee_line_text(&mut self, pattern: impl Into<TextPattern>) -> &mut Self {
        let pattern = pattern.into();
        self.assert_with(move |state| {
            if state.mode() == TransportMode::Local {
                return Ok(());
            }
            let output = state.debuggee_backlog().join("\n");
            if pattern.is_match(&output) {
                return Ok(());
            }
            Err(Error::TestAssertion(format!(
                "Expected to include `{}` in\n(\n{})\n",
                pattern, output
            )))
        })
    }

    /// Fail unconditionally when reached
    pub fn flunk_finish(&mut self, message: impl Into<String>) -> &mut Self {
        let message = message.into();
        let flunk: Callback = Arc::new(move |_state: &mut RunState| {
            Err(Error::TestAssertion(message.clone()))
        });
        self.directives.push(Directive::TerminalCallback(flunk));
        self
    }

    /// Queue a raw directive
    pub fn push(&mut self, directive: Directive) -> &mut Self {
        self.directives.push(directive);
        self
    }

    pub fn freeze(self) -> Scenario {
        Scenario::from_directives(self.directives)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_commands_become_prompts() {
        let scenario = Scenario::build(|s| {
            s.type_cmd("q");
            s.type_cmd("quit");
            s.type_cmd("quit!");
            s.type_cmd("kill 3");
        });

        let d = scenario.directives();
        assert!(matches!(&d[0], Directive::InteractivePrompt(t) if t == "q"));
        assert!(matches!(&d[1], Directive::InteractivePrompt(t) if t == "quit"));
        assert!(matches!(&d[2], Directive::Literal(t) if t == "quit!"));
        assert!(matches!(&d[3], Directive::Literal(t) if t == "kill 3"));
    }

    #[test]
    fn test_flunk_finish_is_terminal() {
        let scenario = Scenario::build(|s| {
            s.flunk_finish("stop here");
        });
        assert!(matches!(
            scenario.directives()[0],
            Directive::TerminalCallback(_)
        ));
    }

    #[test]
    fn test_text_pattern_matching() {
        let text = TextPattern::from("=> 2");
        assert!(text.is_match("(rdbg) p 1+1\n=> 2"));
        assert!(!text.is_match("=> 3"));
        assert_eq!(text.to_string(), "\"=> 2\"");

        let re = TextPattern::from(Regex::new(r"=> \d+").unwrap());
        assert!(re.is_match("=> 42"));
        assert_eq!(re.to_string(), r"/=> \d+/");
    }
}
