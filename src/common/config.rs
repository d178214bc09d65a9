//! Configuration file handling
//!
//! Everything the harness needs to know about the debugger under test lives
//! here: how to invoke it for each transport, which prompts it prints, which
//! environment the child gets, and the timeouts. Nothing is read from or
//! written to the harness's own process environment at spawn time; the
//! `child_env` table is materialised per child.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// How to launch the debugger front-end (the driven process)
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// How to launch the remote debuggee for socket transports
    #[serde(default)]
    pub debuggee: DebuggeeConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Run mode settings
    #[serde(default)]
    pub run: RunConfig,

    /// Line classification patterns
    #[serde(default)]
    pub patterns: PatternConfig,

    /// Environment given to every spawned child
    #[serde(default = "default_child_env")]
    pub child_env: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debugger: DebuggerConfig::default(),
            debuggee: DebuggeeConfig::default(),
            timeouts: Timeouts::default(),
            run: RunConfig::default(),
            patterns: PatternConfig::default(),
            child_env: default_child_env(),
        }
    }
}

fn default_child_env() -> BTreeMap<String, String> {
    [
        ("CONSOLE_NO_COLOR", "true"),
        ("CONSOLE_TEST_UI", "terminal"),
        ("CONSOLE_NO_RELINE", "true"),
        ("CONSOLE_HISTORY_FILE", ""),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Debugger front-end invocation
///
/// Argument templates may contain `{program}`, `{sock_path}` and `{port}`.
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggerConfig {
    /// Debugger executable, resolved through PATH when relative
    #[serde(default = "default_debugger_path")]
    pub path: PathBuf,

    /// Arguments for the local transport
    #[serde(default = "default_local_args")]
    pub local_args: Vec<String>,

    /// Arguments for attaching over a unix domain socket
    #[serde(default = "default_unix_attach_args")]
    pub unix_attach_args: Vec<String>,

    /// Arguments for attaching over TCP/IP
    #[serde(default = "default_tcp_attach_args")]
    pub tcp_attach_args: Vec<String>,

    /// Prompt printed by a local session
    #[serde(default = "default_local_prompt")]
    pub local_prompt: String,

    /// Prompt printed by an attached session
    #[serde(default = "default_remote_prompt")]
    pub remote_prompt: String,

    /// File suffix for staged test programs
    #[serde(default = "default_program_suffix")]
    pub program_suffix: String,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: default_debugger_path(),
            local_args: default_local_args(),
            unix_attach_args: default_unix_attach_args(),
            tcp_attach_args: default_tcp_attach_args(),
            local_prompt: default_local_prompt(),
            remote_prompt: default_remote_prompt(),
            program_suffix: default_program_suffix(),
        }
    }
}

fn default_debugger_path() -> PathBuf {
    PathBuf::from("rdbg")
}
fn default_local_args() -> Vec<String> {
    vec!["{program}".to_string()]
}
fn default_unix_attach_args() -> Vec<String> {
    vec!["-A".to_string(), "{sock_path}".to_string()]
}
fn default_tcp_attach_args() -> Vec<String> {
    vec!["-A".to_string(), "{port}".to_string()]
}
fn default_local_prompt() -> String {
    r"\(rdbg\)".to_string()
}
fn default_remote_prompt() -> String {
    r"\(rdbg:remote\)".to_string()
}
fn default_program_suffix() -> String {
    ".rb".to_string()
}

/// Remote debuggee invocation
#[derive(Debug, Deserialize, Clone)]
pub struct DebuggeeConfig {
    /// Debuggee executable; defaults to the debugger executable
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Arguments to open a unix domain socket
    #[serde(default = "default_debuggee_unix_args")]
    pub unix_args: Vec<String>,

    /// Arguments to open a TCP/IP port
    #[serde(default = "default_debuggee_tcp_args")]
    pub tcp_args: Vec<String>,

    /// Pattern whose first capture group is the announced port
    #[serde(default = "default_port_pattern")]
    pub port_pattern: String,
}

impl Default for DebuggeeConfig {
    fn default() -> Self {
        Self {
            path: None,
            unix_args: default_debuggee_unix_args(),
            tcp_args: default_debuggee_tcp_args(),
            port_pattern: default_port_pattern(),
        }
    }
}

fn default_debuggee_unix_args() -> Vec<String> {
    vec![
        "-O".to_string(),
        "--sock-path={sock_path}".to_string(),
        "{program}".to_string(),
    ]
}
fn default_debuggee_tcp_args() -> Vec<String> {
    vec!["-O".to_string(), "--port=0".to_string(), "{program}".to_string()]
}
fn default_port_pattern() -> String {
    r"Debugger can attach via TCP/IP \(.*:(\d+)\)".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Budget for one transport run from spawn to stream end
    #[serde(default = "default_session")]
    pub session_secs: u64,

    /// Budget for a remote debuggee to become reachable
    #[serde(default = "default_setup")]
    pub setup_secs: u64,

    /// Budget for a whole `debug_code` call across all transports
    #[serde(default = "default_overall")]
    pub overall_secs: u64,

    /// How long a process may take to exit once its terminal is closed
    #[serde(default = "default_exit_wait")]
    pub exit_wait_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            session_secs: default_session(),
            setup_secs: default_setup(),
            overall_secs: default_overall(),
            exit_wait_secs: default_exit_wait(),
        }
    }
}

impl Timeouts {
    /// Deadline for `runs` transport runs back to back
    ///
    /// Never below `overall_secs`. Each run may use its setup and session
    /// budgets plus an exit wait for both the debugger and the debuggee.
    pub fn overall_deadline(&self, runs: usize) -> u64 {
        let per_run = self
            .setup_secs
            .saturating_add(self.session_secs)
            .saturating_add(self.exit_wait_secs.saturating_mul(2));
        self.overall_secs
            .max(per_run.saturating_mul(runs as u64))
    }
}

fn default_session() -> u64 {
    10
}
fn default_setup() -> u64 {
    10
}
fn default_overall() -> u64 {
    30
}
fn default_exit_wait() -> u64 {
    10
}

/// Run mode settings
#[derive(Debug, Deserialize, Clone)]
pub struct RunConfig {
    /// Run the three transports concurrently
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Exercise the socket transports at all
    #[serde(default = "default_true")]
    pub remote: bool,

    /// Log every line read from the driven process at info level
    #[serde(default)]
    pub echo_output: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            remote: true,
            echo_output: false,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Line classification patterns (regular expressions)
#[derive(Debug, Deserialize, Clone)]
pub struct PatternConfig {
    /// Synchronization marker; capture group 1 is the JSON payload
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Confirmation prompt
    #[serde(default = "default_confirmation")]
    pub confirmation: String,

    /// REPL-side failure, checked whenever a prompt line is seen
    #[serde(default = "default_repl_error")]
    pub repl_error: String,

    /// Debuggee exception, checked at stream end
    #[serde(default = "default_debuggee_exception")]
    pub debuggee_exception: String,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            confirmation: default_confirmation(),
            repl_error: default_repl_error(),
            debuggee_exception: default_debuggee_exception(),
        }
    }
}

fn default_marker() -> String {
    r"INTERNAL_INFO:\s(.*)".to_string()
}
fn default_confirmation() -> String {
    r"(?i)\[y/n\]".to_string()
}
fn default_repl_error() -> String {
    "REPL ERROR".to_string()
}
fn default_debuggee_exception() -> String {
    "DEBUGGEE Exception".to_string()
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Apply `CONSOLE_HARNESS_*` environment overrides
    pub fn apply_env(&mut self) {
        if env_flag("CONSOLE_HARNESS_NO_REMOTE") == Some(true) {
            self.run.remote = false;
        }
        if env_flag("CONSOLE_HARNESS_SEQUENTIAL") == Some(true) {
            self.run.parallel = false;
        }
        if let Some(echo) = env_flag("CONSOLE_HARNESS_ECHO") {
            self.run.echo_output = echo;
        }
        if let Some(secs) = std::env::var("CONSOLE_HARNESS_TIMEOUT_SEC")
            .ok()
            .and_then(|v| v.trim().parse().ok())
        {
            self.timeouts.session_secs = secs;
        }
    }

    /// Resolve the debugger executable
    pub fn debugger_path(&self) -> Result<PathBuf> {
        resolve_executable(&self.debugger.path)
    }

    /// Resolve the debuggee executable, falling back to the debugger
    pub fn debuggee_path(&self) -> Result<PathBuf> {
        match &self.debuggee.path {
            Some(path) => resolve_executable(path),
            None => self.debugger_path(),
        }
    }
}

/// Resolve a bare executable name through PATH
///
/// Paths with a directory component are returned unchanged.
pub fn resolve_executable(path: &Path) -> Result<PathBuf> {
    if path.components().count() > 1 || path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    which::which(path).map_err(|e| {
        Error::Config(format!(
            "Executable '{}' not found in PATH: {}",
            path.display(),
            e
        ))
    })
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" | "" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.run.parallel);
        assert!(config.run.remote);
        assert_eq!(config.timeouts.session_secs, 10);
        assert_eq!(config.timeouts.overall_secs, 30);
        assert_eq!(config.child_env.get("CONSOLE_TEST_UI").unwrap(), "terminal");
        assert_eq!(config.child_env.get("CONSOLE_HISTORY_FILE").unwrap(), "");
    }

    #[test]
    fn test_overall_deadline_covers_sequential_runs() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.overall_deadline(1), 40);
        assert_eq!(timeouts.overall_deadline(3), 120);

        let timeouts = Timeouts {
            session_secs: 1,
            setup_secs: 1,
            overall_secs: 30,
            exit_wait_secs: 1,
        };
        assert_eq!(timeouts.overall_deadline(3), 30);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
[debugger]
path = "/opt/bin/mydbg"
local_prompt = '\(my\)'

[timeouts]
setup_secs = 2

[run]
parallel = false
"#,
        )
        .unwrap();

        assert_eq!(config.debugger.path, PathBuf::from("/opt/bin/mydbg"));
        assert_eq!(config.debugger.local_prompt, r"\(my\)");
        assert_eq!(config.debugger.remote_prompt, r"\(rdbg:remote\)");
        assert_eq!(config.timeouts.setup_secs, 2);
        assert_eq!(config.timeouts.session_secs, 10);
        assert!(!config.run.parallel);
        assert!(config.run.remote);
        assert_eq!(config.patterns.marker, r"INTERNAL_INFO:\s(.*)");
    }

    #[test]
    fn test_invalid_toml() {
        let err = Config::from_toml("[run]\nparallel = \"maybe\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_absolute_executable_is_unchanged() {
        let path = resolve_executable(Path::new("/definitely/not/here")).unwrap();
        assert_eq!(path, PathBuf::from("/definitely/not/here"));
    }

    #[test]
    fn test_debuggee_defaults_to_debugger() {
        let mut config = Config::default();
        config.debugger.path = PathBuf::from("/usr/local/bin/dbg");
        assert_eq!(
            config.debuggee_path().unwrap(),
            PathBuf::from("/usr/local/bin/dbg")
        );
    }
}
