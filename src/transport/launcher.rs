//! Builds the debugger command and run state for each transport

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;

use super::remote::{DebuggeeRequest, DebuggeeSpawner, Endpoint, RemoteDebuggee};
use super::TransportMode;
use crate::cancel::CancelSignal;
use crate::common::config::Config;
use crate::common::paths::unique_socket_path;
use crate::common::{expand_template, Error, Result};
use crate::pty::CommandSpec;
use crate::report::RunFailure;
use crate::scenario::Scenario;
use crate::session::RunState;

/// How often a starting debuggee is checked for reachability
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A launched transport: the debugger command plus its fresh run state
pub type Launch = (CommandSpec, RunState);

/// Starts transports from configuration
#[derive(Clone)]
pub struct Launcher {
    config: Arc<Config>,
    home: PathBuf,
    spawner: Arc<dyn DebuggeeSpawner>,
}

impl Launcher {
    pub fn new(config: Arc<Config>, home: PathBuf, spawner: Arc<dyn DebuggeeSpawner>) -> Self {
        Self {
            config,
            home,
            spawner,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Launch `mode` against the staged `program`
    pub async fn launch(
        &self,
        mode: TransportMode,
        scenario: &Scenario,
        program: &Path,
        cancel: &mut CancelSignal,
    ) -> std::result::Result<Launch, RunFailure> {
        match mode {
            TransportMode::Local => self.launch_local(scenario, program),
            TransportMode::UnixDomainSocket => self.launch_unix(scenario, program, cancel).await,
            TransportMode::TcpIp => self.launch_tcp(scenario, program, cancel).await,
        }
    }

    /// The debugger runs the program directly
    pub fn launch_local(
        &self,
        scenario: &Scenario,
        program: &Path,
    ) -> std::result::Result<Launch, RunFailure> {
        let mode = TransportMode::Local;
        let program = program.display().to_string();
        let command = self
            .debugger_command(
                &self.config.debugger.local_args,
                &[("program", program.as_str())],
            )
            .map_err(|e| RunFailure::without_session(e, mode))?;
        let state = self.run_state(mode, scenario)?;
        Ok((command, state))
    }

    /// The debugger attaches to a debuggee listening on a unix domain socket
    pub async fn launch_unix(
        &self,
        scenario: &Scenario,
        program: &Path,
        cancel: &mut CancelSignal,
    ) -> std::result::Result<Launch, RunFailure> {
        let mode = TransportMode::UnixDomainSocket;
        let sock_path =
            unique_socket_path().map_err(|e| RunFailure::without_session(e.into(), mode))?;
        let request = DebuggeeRequest {
            mode,
            program: program.to_path_buf(),
            sock_path: Some(sock_path.clone()),
        };

        let secs = self.config.timeouts.setup_secs;
        let (state, endpoint) = self
            .start_remote(request, scenario, cancel, || {
                Error::socket_timeout(secs, &sock_path)
            })
            .await?;

        let sock_path = match endpoint {
            Endpoint::UnixSocket(path) => path.display().to_string(),
            other => return Err(self.reject_endpoint(other, state).await),
        };
        let command = self
            .debugger_command(
                &self.config.debugger.unix_attach_args,
                &[("sock_path", sock_path.as_str())],
            )
            .map_err(|e| RunFailure::new(e, &state))?;
        Ok((command, state))
    }

    /// The debugger attaches to a debuggee listening on a TCP port
    pub async fn launch_tcp(
        &self,
        scenario: &Scenario,
        program: &Path,
        cancel: &mut CancelSignal,
    ) -> std::result::Result<Launch, RunFailure> {
        let mode = TransportMode::TcpIp;
        let request = DebuggeeRequest {
            mode,
            program: program.to_path_buf(),
            sock_path: None,
        };

        let secs = self.config.timeouts.setup_secs;
        let (state, endpoint) = self
            .start_remote(request, scenario, cancel, || Error::port_timeout(secs))
            .await?;

        let port = match endpoint {
            Endpoint::Tcp(port) => port.to_string(),
            other => return Err(self.reject_endpoint(other, state).await),
        };
        let command = self
            .debugger_command(
                &self.config.debugger.tcp_attach_args,
                &[("port", port.as_str())],
            )
            .map_err(|e| RunFailure::new(e, &state))?;
        Ok((command, state))
    }

    /// Run an arbitrary command line as a local session
    ///
    /// The command inherits the child environment; its own entries win.
    pub fn launch_custom(
        &self,
        scenario: &Scenario,
        command: CommandSpec,
    ) -> std::result::Result<Launch, RunFailure> {
        let mode = TransportMode::Local;
        let mut env = self.child_env();
        env.extend(command.env.clone());
        let command = CommandSpec { env, ..command };
        let state = self.run_state(mode, scenario)?;
        Ok((command, state))
    }

    fn run_state(
        &self,
        mode: TransportMode,
        scenario: &Scenario,
    ) -> std::result::Result<RunState, RunFailure> {
        let prompt = self
            .prompt(mode)
            .map_err(|e| RunFailure::without_session(e, mode))?;
        Ok(RunState::new(mode, prompt, scenario.duplicate()))
    }

    async fn start_remote<F>(
        &self,
        request: DebuggeeRequest,
        scenario: &Scenario,
        cancel: &mut CancelSignal,
        on_timeout: F,
    ) -> std::result::Result<(RunState, Endpoint), RunFailure>
    where
        F: FnOnce() -> Error,
    {
        let mode = request.mode;
        let state = self.run_state(mode, scenario)?;
        let mut remote = self
            .spawner
            .spawn(request)
            .await
            .map_err(|e| RunFailure::new(e, &state))?;

        let setup = Duration::from_secs(self.config.timeouts.setup_secs);
        let reachable = wait_until_reachable(remote.as_mut(), setup, on_timeout, cancel).await;
        let mut state = state.with_remote(remote);

        match reachable {
            Ok(endpoint) => {
                tracing::debug!(mode = %mode, endpoint = %endpoint, "Remote debuggee is reachable");
                Ok((state, endpoint))
            }
            Err(e) => {
                tracing::debug!(mode = %mode, error = %e, "Remote debuggee setup failed");
                let exit_wait = Duration::from_secs(self.config.timeouts.exit_wait_secs);
                state.terminate_remote(exit_wait).await;
                Err(RunFailure::new(e, &state))
            }
        }
    }

    /// Tear down a debuggee that announced the other transport's endpoint
    async fn reject_endpoint(&self, endpoint: Endpoint, mut state: RunState) -> RunFailure {
        let error = Error::Internal(format!(
            "{} debuggee announced {}",
            state.mode().label(),
            endpoint
        ));
        let exit_wait = Duration::from_secs(self.config.timeouts.exit_wait_secs);
        state.terminate_remote(exit_wait).await;
        RunFailure::new(error, &state)
    }

    fn prompt(&self, mode: TransportMode) -> Result<Regex> {
        let pattern = if mode.is_remote() {
            &self.config.debugger.remote_prompt
        } else {
            &self.config.debugger.local_prompt
        };
        Regex::new(pattern).map_err(|e| Error::invalid_pattern(pattern, &e))
    }

    fn child_env(&self) -> BTreeMap<String, String> {
        let mut env = self.config.child_env.clone();
        env.insert("HOME".to_string(), self.home.display().to_string());
        env
    }

    fn debugger_command(&self, templates: &[String], vars: &[(&str, &str)]) -> Result<CommandSpec> {
        Ok(CommandSpec::new(self.config.debugger_path()?)
            .args(templates.iter().map(|t| expand_template(t, vars)))
            .envs(&self.child_env()))
    }
}

/// Poll `remote` until it is reachable, it exits, `setup` elapses or the run
/// is cancelled
async fn wait_until_reachable<F>(
    remote: &mut dyn RemoteDebuggee,
    setup: Duration,
    on_timeout: F,
    cancel: &mut CancelSignal,
) -> Result<Endpoint>
where
    F: FnOnce() -> Error,
{
    let deadline = Instant::now() + setup;
    loop {
        if let Some(endpoint) = remote.endpoint() {
            return Ok(endpoint);
        }
        if remote.has_exited() {
            let last = remote
                .backlog()
                .last()
                .cloned()
                .unwrap_or_else(|| "no output".to_string());
            return Err(Error::DebuggeeExited(last));
        }
        if Instant::now() >= deadline {
            return Err(on_timeout());
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(READY_POLL_INTERVAL) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Becomes reachable after a number of polls
    struct FakeDebuggee {
        polls_until_ready: Mutex<usize>,
        exited: bool,
        terminated: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl RemoteDebuggee for FakeDebuggee {
        fn endpoint(&self) -> Option<Endpoint> {
            let mut left = self.polls_until_ready.lock().unwrap();
            if *left == 0 {
                return Some(Endpoint::Tcp(4711));
            }
            *left -= 1;
            None
        }

        fn backlog(&self) -> Vec<String> {
            vec!["DEBUGGER: Debugger can attach via TCP/IP (127.0.0.1:4711)".to_string()]
        }

        fn has_exited(&mut self) -> bool {
            self.exited
        }

        async fn terminate(&mut self, _wait: Duration) -> bool {
            *self.terminated.lock().unwrap() = true;
            true
        }
    }

    struct FakeSpawner {
        polls_until_ready: usize,
        exited: bool,
        terminated: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl DebuggeeSpawner for FakeSpawner {
        async fn spawn(&self, _request: DebuggeeRequest) -> Result<Box<dyn RemoteDebuggee>> {
            Ok(Box::new(FakeDebuggee {
                polls_until_ready: Mutex::new(self.polls_until_ready),
                exited: self.exited,
                terminated: Arc::clone(&self.terminated),
            }))
        }
    }

    fn launcher(spawner: FakeSpawner, setup_secs: u64) -> Launcher {
        let mut config = Config::default();
        config.debugger.path = PathBuf::from("/opt/dbg/bin/rdbg");
        config.timeouts.setup_secs = setup_secs;
        Launcher::new(Arc::new(config), PathBuf::from("/tmp/home"), Arc::new(spawner))
    }

    fn spawner(polls_until_ready: usize, exited: bool) -> (FakeSpawner, Arc<Mutex<bool>>) {
        let terminated = Arc::new(Mutex::new(false));
        (
            FakeSpawner {
                polls_until_ready,
                exited,
                terminated: Arc::clone(&terminated),
            },
            terminated,
        )
    }

    #[test]
    fn test_local_command() {
        let (fake, _) = spawner(0, false);
        let scenario = Scenario::build(|s| {
            s.type_cmd("c");
        });
        let (command, state) = launcher(fake, 1)
            .launch_local(&scenario, Path::new("/tmp/t.rb"))
            .unwrap();

        assert_eq!(command.program, PathBuf::from("/opt/dbg/bin/rdbg"));
        assert_eq!(command.args, vec!["/tmp/t.rb"]);
        assert_eq!(command.env.get("HOME").unwrap(), "/tmp/home");
        assert_eq!(command.env.get("CONSOLE_NO_COLOR").unwrap(), "true");
        assert_eq!(state.mode(), TransportMode::Local);
        assert_eq!(state.remaining(), 1);
        assert!(state.prompt().is_match("(rdbg) "));
    }

    #[tokio::test]
    async fn test_tcp_waits_for_port() {
        let (fake, _) = spawner(3, false);
        let scenario = Scenario::build(|_| {});
        let (command, state) = launcher(fake, 5)
            .launch_tcp(&scenario, Path::new("/tmp/t.rb"), &mut CancelSignal::never())
            .await
            .unwrap();

        assert_eq!(command.args, vec!["-A", "4711"]);
        assert_eq!(state.mode(), TransportMode::TcpIp);
        assert!(state.prompt().is_match("(rdbg:remote) "));
        assert_eq!(state.debuggee_backlog().len(), 1);
    }

    #[tokio::test]
    async fn test_setup_timeout_tears_down_debuggee() {
        let (fake, terminated) = spawner(usize::MAX, false);
        let scenario = Scenario::build(|_| {});
        let failure = launcher(fake, 0)
            .launch_tcp(&scenario, Path::new("/tmp/t.rb"), &mut CancelSignal::never())
            .await
            .err().unwrap();

        assert!(matches!(failure.error, Error::SetupTimeout { .. }));
        assert!(*terminated.lock().unwrap());
        assert!(failure.report().ends_with("on TCP/IP mode"));
        assert!(failure.report().contains("| Debuggee Session |"));
    }

    #[tokio::test]
    async fn test_unix_rejects_tcp_endpoint() {
        let (fake, terminated) = spawner(0, false);
        let scenario = Scenario::build(|_| {});
        let failure = launcher(fake, 5)
            .launch_unix(&scenario, Path::new("/tmp/t.rb"), &mut CancelSignal::never())
            .await
            .err().unwrap();

        assert!(matches!(failure.error, Error::Internal(_)), "{}", failure);
        assert!(failure.report().contains("announced port 4711"));
        assert!(*terminated.lock().unwrap());
    }

    #[tokio::test]
    async fn test_exited_debuggee_stops_polling() {
        let (fake, _) = spawner(usize::MAX, true);
        let scenario = Scenario::build(|_| {});
        let failure = launcher(fake, 30)
            .launch_tcp(&scenario, Path::new("/tmp/t.rb"), &mut CancelSignal::never())
            .await
            .err().unwrap();
        assert!(matches!(failure.error, Error::DebuggeeExited(_)));
    }

    #[test]
    fn test_custom_command_keeps_its_env() {
        let (fake, _) = spawner(0, false);
        let scenario = Scenario::build(|_| {});
        let custom = CommandSpec::new("/usr/bin/ruby")
            .args(["-r", "debug/start", "/tmp/t.rb"])
            .env("CONSOLE_NO_COLOR", "false");
        let (command, state) = launcher(fake, 1)
            .launch_custom(&scenario, custom)
            .unwrap();

        assert_eq!(command.program, PathBuf::from("/usr/bin/ruby"));
        assert_eq!(command.env.get("CONSOLE_NO_COLOR").unwrap(), "false");
        assert_eq!(command.env.get("CONSOLE_TEST_UI").unwrap(), "terminal");
        assert_eq!(state.mode(), TransportMode::Local);
    }
}
