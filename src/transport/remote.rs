//! Remote debuggee collaborators for the socket transports

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use tokio::task::JoinHandle;

use super::TransportMode;
use crate::common::config::Config;
use crate::common::{expand_template, Error, Result};
use crate::pty::{CommandSpec, PtyProcess};

/// Where an attaching debugger can reach a remote debuggee
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    UnixSocket(PathBuf),
    Tcp(u16),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::UnixSocket(path) => write!(f, "{}", path.display()),
            Endpoint::Tcp(port) => write!(f, "port {}", port),
        }
    }
}

/// What a socket transport asks of its debuggee
#[derive(Debug, Clone)]
pub struct DebuggeeRequest {
    pub mode: TransportMode,
    pub program: PathBuf,
    /// Socket to bind; only set for [`TransportMode::UnixDomainSocket`]
    pub sock_path: Option<PathBuf>,
}

/// A running debuggee that a debugger can attach to
#[async_trait]
pub trait RemoteDebuggee: Send {
    /// The endpoint once it is reachable, `None` before that
    fn endpoint(&self) -> Option<Endpoint>;

    /// Everything the debuggee printed so far
    fn backlog(&self) -> Vec<String>;

    fn has_exited(&mut self) -> bool;

    /// Stop the debuggee; `false` if it had to be killed
    async fn terminate(&mut self, wait: Duration) -> bool;
}

/// Starts remote debuggees for the socket transports
#[async_trait]
pub trait DebuggeeSpawner: Send + Sync {
    async fn spawn(&self, request: DebuggeeRequest) -> Result<Box<dyn RemoteDebuggee>>;
}

/// Starts the configured debuggee command on its own PTY
#[derive(Debug, Clone)]
pub struct PtySpawner {
    config: Arc<Config>,
    port_pattern: Regex,
    env: BTreeMap<String, String>,
}

impl PtySpawner {
    pub fn from_config(config: &Config, home: &Path) -> Result<Self> {
        let port_pattern = Regex::new(&config.debuggee.port_pattern)
            .map_err(|e| Error::invalid_pattern(&config.debuggee.port_pattern, &e))?;

        let mut env = config.child_env.clone();
        env.insert("HOME".to_string(), home.display().to_string());

        Ok(Self {
            config: Arc::new(config.clone()),
            port_pattern,
            env,
        })
    }

    fn command(&self, request: &DebuggeeRequest) -> Result<(CommandSpec, Readiness)> {
        let program = request.program.display().to_string();
        let (templates, readiness) = match request.mode {
            TransportMode::UnixDomainSocket => {
                let sock_path = request.sock_path.clone().ok_or_else(|| {
                    Error::Internal("unix socket debuggee requested without a socket path".into())
                })?;
                (&self.config.debuggee.unix_args, Readiness::Socket(sock_path))
            }
            TransportMode::TcpIp => (
                &self.config.debuggee.tcp_args,
                Readiness::Port(self.port_pattern.clone()),
            ),
            TransportMode::Local => {
                return Err(Error::Internal(
                    "the local transport has no remote debuggee".into(),
                ))
            }
        };

        let sock_path = request
            .sock_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let vars = [("program", program.as_str()), ("sock_path", sock_path.as_str())];

        let spec = CommandSpec::new(self.config.debuggee_path()?)
            .args(templates.iter().map(|t| expand_template(t, &vars)))
            .envs(&self.env);
        Ok((spec, readiness))
    }
}

#[async_trait]
impl DebuggeeSpawner for PtySpawner {
    async fn spawn(&self, request: DebuggeeRequest) -> Result<Box<dyn RemoteDebuggee>> {
        let (spec, readiness) = self.command(&request)?;
        tracing::debug!(mode = %request.mode, command = %spec.display(), "Starting remote debuggee");
        let debuggee = PtyDebuggee::spawn(&spec, readiness)?;
        Ok(Box::new(debuggee))
    }
}

#[derive(Debug, Clone)]
enum Readiness {
    /// Reachable once the socket file exists
    Socket(PathBuf),
    /// Reachable once the output announces a port (capture group 1)
    Port(Regex),
}

/// A debuggee process on its own PTY with its output collected in the background
pub struct PtyDebuggee {
    process: PtyProcess,
    backlog: Arc<Mutex<Vec<String>>>,
    readiness: Readiness,
    collector: JoinHandle<()>,
}

impl PtyDebuggee {
    fn spawn(spec: &CommandSpec, readiness: Readiness) -> Result<Self> {
        let (process, mut lines) = PtyProcess::spawn("remote", spec)?;
        let backlog = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&backlog);
        let collector = tokio::spawn(async move {
            while let Some(Ok(line)) = lines.recv().await {
                tracing::trace!(line = %line, "debuggee");
                if let Ok(mut backlog) = sink.lock() {
                    backlog.push(line);
                }
            }
        });

        Ok(Self {
            process,
            backlog,
            readiness,
            collector,
        })
    }
}

#[async_trait]
impl RemoteDebuggee for PtyDebuggee {
    fn endpoint(&self) -> Option<Endpoint> {
        match &self.readiness {
            Readiness::Socket(path) => crate::pty::socket_ready(path)
                .then(|| Endpoint::UnixSocket(path.clone())),
            Readiness::Port(pattern) => {
                let backlog = self.backlog.lock().ok()?;
                backlog.iter().find_map(|line| {
                    pattern
                        .captures(line)
                        .and_then(|caps| caps.get(1))
                        .and_then(|port| port.as_str().parse().ok())
                        .map(Endpoint::Tcp)
                })
            }
        }
    }

    fn backlog(&self) -> Vec<String> {
        self.backlog
            .lock()
            .map(|backlog| backlog.clone())
            .unwrap_or_default()
    }

    fn has_exited(&mut self) -> bool {
        self.process.has_exited()
    }

    async fn terminate(&mut self, wait: Duration) -> bool {
        let finished = self.process.shutdown(wait).await;
        if let Readiness::Socket(path) = &self.readiness {
            if path.exists() {
                let _ = std::fs::remove_file(path);
            }
        }
        finished
    }
}

impl Drop for PtyDebuggee {
    fn drop(&mut self) {
        self.collector.abort();
        // Dropped without terminate() when an outer deadline aborts the run
        if let Readiness::Socket(path) = &self.readiness {
            let _ = std::fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawner() -> PtySpawner {
        let mut config = Config::default();
        config.debugger.path = PathBuf::from("/opt/dbg/bin/rdbg");
        PtySpawner::from_config(&config, Path::new("/tmp/home")).unwrap()
    }

    #[test]
    fn test_unix_command_expands_templates() {
        let request = DebuggeeRequest {
            mode: TransportMode::UnixDomainSocket,
            program: PathBuf::from("/tmp/target.rb"),
            sock_path: Some(PathBuf::from("/tmp/s/debuggee-1.sock")),
        };
        let (spec, readiness) = spawner().command(&request).unwrap();

        assert_eq!(spec.program, PathBuf::from("/opt/dbg/bin/rdbg"));
        assert_eq!(
            spec.args,
            vec!["-O", "--sock-path=/tmp/s/debuggee-1.sock", "/tmp/target.rb"]
        );
        assert_eq!(spec.env.get("HOME").unwrap(), "/tmp/home");
        assert!(matches!(readiness, Readiness::Socket(p) if p.ends_with("debuggee-1.sock")));
    }

    #[test]
    fn test_tcp_command_starts_on_port_zero() {
        let request = DebuggeeRequest {
            mode: TransportMode::TcpIp,
            program: PathBuf::from("/tmp/target.rb"),
            sock_path: None,
        };
        let (spec, readiness) = spawner().command(&request).unwrap();

        assert_eq!(spec.args, vec!["-O", "--port=0", "/tmp/target.rb"]);
        match readiness {
            Readiness::Port(re) => {
                let caps = re
                    .captures("DEBUGGER: Debugger can attach via TCP/IP (127.0.0.1:40123)")
                    .unwrap();
                assert_eq!(&caps[1], "40123");
            }
            other => panic!("unexpected readiness {:?}", other),
        }
    }

    #[test]
    fn test_debuggee_path_overrides_debugger() {
        let mut config = Config::default();
        config.debugger.path = PathBuf::from("/opt/dbg/bin/rdbg");
        config.debuggee.path = Some(PathBuf::from("/opt/dbg/bin/ruby"));
        let spawner = PtySpawner::from_config(&config, Path::new("/tmp/home")).unwrap();

        let request = DebuggeeRequest {
            mode: TransportMode::TcpIp,
            program: PathBuf::from("/tmp/target.rb"),
            sock_path: None,
        };
        let (spec, _) = spawner.command(&request).unwrap();
        assert_eq!(spec.program, PathBuf::from("/opt/dbg/bin/ruby"));
    }

    #[test]
    fn test_local_has_no_debuggee() {
        let request = DebuggeeRequest {
            mode: TransportMode::Local,
            program: PathBuf::from("/tmp/target.rb"),
            sock_path: None,
        };
        assert!(matches!(
            spawner().command(&request),
            Err(Error::Internal(_))
        ));
    }

    #[test]
    fn test_endpoint_display() {
        assert_eq!(Endpoint::Tcp(1234).to_string(), "port 1234");
        assert_eq!(
            Endpoint::UnixSocket(PathBuf::from("/tmp/a.sock")).to_string(),
            "/tmp/a.sock"
        );
    }
}
