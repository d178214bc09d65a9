//! Line classification rules
//!
//! Rules are tried in order (marker, confirmation, prompt) and the first
//! match wins; anything else is plain output.

use regex::Regex;

use crate::common::config::PatternConfig;
use crate::common::{Error, Result};

/// What a single output line means to the session reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind<'a> {
    /// Synchronization marker carrying a payload
    Marker(&'a str),
    /// `[y/n]` question
    Confirmation,
    /// The transport's REPL prompt
    Prompt,
    Output,
}

/// Compiled classification and error-scan patterns
#[derive(Debug, Clone)]
pub struct LineRules {
    marker: Regex,
    confirmation: Regex,
    repl_error: Regex,
    debuggee_exception: Regex,
}

impl LineRules {
    pub fn from_config(patterns: &PatternConfig) -> Result<Self> {
        Ok(Self {
            marker: compile(&patterns.marker)?,
            confirmation: compile(&patterns.confirmation)?,
            repl_error: compile(&patterns.repl_error)?,
            debuggee_exception: compile(&patterns.debuggee_exception)?,
        })
    }

    pub fn classify<'a>(&self, line: &'a str, prompt: &Regex) -> LineKind<'a> {
        if let Some(caps) = self.marker.captures(line) {
            let payload = caps.get(1).map_or("", |m| m.as_str());
            return LineKind::Marker(payload);
        }
        if self.confirmation.is_match(line) {
            return LineKind::Confirmation;
        }
        if prompt.is_match(line) {
            return LineKind::Prompt;
        }
        LineKind::Output
    }

    pub fn repl_error(&self) -> &Regex {
        &self.repl_error
    }

    pub fn debuggee_exception(&self) -> &Regex {
        &self.debuggee_exception
    }
}

/// Fail with every line from the first `pattern` match onward
pub fn check_error(pattern: &Regex, lines: &[String]) -> Result<()> {
    match lines.iter().position(|line| pattern.is_match(line)) {
        Some(index) => Err(Error::RuntimeFault(lines[index..].join("\n"))),
        None => Ok(()),
    }
}

pub(crate) fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, &e))
}
