//! Test programs
//!
//! Programs are usually written with line numbers so scenarios can refer to
//! them, e.g.
//!
//! ```text
//!  1| a = 1
//!  2| b = a + 1
//! ```
//!
//! The numbers are stripped before the program is staged to disk.

use std::io::Write;

use regex::Regex;
use tempfile::NamedTempFile;

use crate::common::{Error, Result};

const NUMBERED_LINE: &str = r"^\s*(\d+)\| ?(.*)$";

/// A test program, with or without line numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    source: String,
    code: String,
    numbered: bool,
}

impl Program {
    /// Parse program text
    ///
    /// Text whose first non-blank line starts with `N|` is treated as
    /// numbered and every numbered prefix is stripped. Anything else is used
    /// verbatim.
    pub fn parse(source: &str) -> Result<Self> {
        let pattern = numbered_line()?;
        let numbered = source
            .lines()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| pattern.is_match(line));

        let code = if numbered {
            let mut code = source
                .lines()
                .map(|line| match pattern.captures(line) {
                    Some(caps) => caps.get(2).map_or("", |m| m.as_str()).to_string(),
                    None => line.to_string(),
                })
                .collect::<Vec<_>>()
                .join("\n");
            code.push('\n');
            code
        } else {
            source.to_string()
        };

        Ok(Self {
            source: source.to_string(),
            code,
            numbered,
        })
    }

    /// The program as the debugger will see it
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn is_numbered(&self) -> bool {
        self.numbered
    }

    /// Verify that numbered lines count up from 1 without gaps
    pub fn check_line_numbers(&self) -> Result<()> {
        if !self.numbered {
            return Ok(());
        }
        let pattern = numbered_line()?;

        let lines = self.source.lines().filter(|line| !line.trim().is_empty());
        for (index, line) in lines.enumerate() {
            let expected = index + 1;
            let actual = pattern
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|n| n.as_str().parse::<usize>().ok());
            if actual != Some(expected) {
                return Err(Error::InvalidProgram(format!(
                    "line {} should be numbered {}: {:?}",
                    expected, expected, line
                )));
            }
        }
        Ok(())
    }

    /// Write the program to a temporary file that lives as long as the handle
    pub fn stage(&self, suffix: &str) -> Result<NamedTempFile> {
        let mut file = tempfile::Builder::new()
            .prefix("debug-")
            .suffix(suffix)
            .tempfile()?;
        file.write_all(self.code.as_bytes())?;
        file.flush()?;
        tracing::debug!(path = %file.path().display(), "Staged test program");
        Ok(file)
    }
}

fn numbered_line() -> Result<Regex> {
    Regex::new(NUMBERED_LINE).map_err(|e| Error::invalid_pattern(NUMBERED_LINE, &e))
}
