//! Entry points used by tests: `debug_code` and `run_command`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelSignal;
use crate::common::config::{resolve_executable, Config};
use crate::common::paths::PtyHome;
use crate::common::{expand_template, Error, Result};
use crate::coordinator::{Coordinator, RunResult};
use crate::program::Program;
use crate::pty::CommandSpec;
use crate::scenario::{Scenario, ScenarioBuilder};
use crate::session::{run_session, LineRules, SessionOptions};
use crate::transport::{DebuggeeSpawner, Launcher, PtySpawner, TransportMode};

/// Runs scenarios against the configured debugger
///
/// One instance can run any number of tests; each call stages its own
/// program and builds its own scenario.
pub struct ConsoleTest {
    config: Arc<Config>,
    rules: Arc<LineRules>,
    home: PtyHome,
    spawner: Arc<dyn DebuggeeSpawner>,
}

impl ConsoleTest {
    pub fn new(config: Config) -> Result<Self> {
        let home = PtyHome::create()?;
        let rules = LineRules::from_config(&config.patterns)?;
        let spawner = PtySpawner::from_config(&config, home.path())?;
        Ok(Self {
            config: Arc::new(config),
            rules: Arc::new(rules),
            home,
            spawner: Arc::new(spawner),
        })
    }

    /// Load the user configuration and apply environment overrides
    pub fn from_env() -> Result<Self> {
        let mut config = Config::load()?;
        config.apply_env();
        Self::new(config)
    }

    /// Replace how remote debuggees are started
    pub fn with_spawner(mut self, spawner: Arc<dyn DebuggeeSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Debug `program` on every enabled transport
    pub async fn debug_code<F>(&self, program: &str, steps: F) -> Result<()>
    where
        F: FnOnce(&mut ScenarioBuilder),
    {
        self.debug_code_with(program, true, steps).await
    }

    /// Like [`debug_code`](Self::debug_code); `remote = false` runs the local
    /// transport only
    pub async fn debug_code_with<F>(&self, program: &str, remote: bool, steps: F) -> Result<()>
    where
        F: FnOnce(&mut ScenarioBuilder),
    {
        let program = Program::parse(program)?;
        let scenario = Scenario::build(steps);
        self.debug_scenario(&program, scenario, remote).await
    }

    /// Debug an already parsed program with an already built scenario
    pub async fn debug_scenario(
        &self,
        program: &Program,
        scenario: Scenario,
        remote: bool,
    ) -> Result<()> {
        let staged = program.stage(&self.config.debugger.program_suffix)?;
        let program_path = staged.path().to_path_buf();

        let coordinator =
            Coordinator::new(self.config.run.parallel, remote && self.config.run.remote);
        let launcher = self.launcher();
        let rules = Arc::clone(&self.rules);
        let options = SessionOptions::from_config(&self.config);
        let scenario = Arc::new(scenario);

        let run = coordinator.run(move |mode, cancel| {
            let launcher = launcher.clone();
            let rules = Arc::clone(&rules);
            let options = options.clone();
            let scenario = Arc::clone(&scenario);
            let program_path = program_path.clone();
            async move {
                run_transport(
                    mode,
                    &launcher,
                    &scenario,
                    &program_path,
                    &rules,
                    &options,
                    cancel,
                )
                .await
            }
        });

        let runs = if self.config.run.parallel {
            1
        } else {
            coordinator.modes().len()
        };
        self.with_deadline(runs, run).await?;
        program.check_line_numbers()
    }

    /// Run a custom command line as a local session
    ///
    /// `{program}` in `args` is replaced by the staged program path.
    pub async fn run_command<F>(
        &self,
        program: &str,
        executable: impl AsRef<Path>,
        args: &[&str],
        steps: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut ScenarioBuilder),
    {
        let program = Program::parse(program)?;
        let scenario = Scenario::build(steps);
        self.command_scenario(&program, executable.as_ref(), args, &scenario)
            .await
    }

    /// Run a custom command line with an already built scenario
    pub async fn command_scenario<S: AsRef<str>>(
        &self,
        program: &Program,
        executable: &Path,
        args: &[S],
        scenario: &Scenario,
    ) -> Result<()> {
        let staged = program.stage(&self.config.debugger.program_suffix)?;
        let path = staged.path().display().to_string();

        let executable = resolve_executable(executable)?;
        let vars = [("program", path.as_str())];
        let command = CommandSpec::new(executable)
            .args(args.iter().map(|arg| expand_template(arg.as_ref(), &vars)));

        let (command, state) = self.launcher().launch_custom(scenario, command)?;
        let options = SessionOptions::from_config(&self.config);
        let run = run_session(&command, state, &self.rules, &options, CancelSignal::never());

        self.with_deadline(1, run).await?;
        program.check_line_numbers()
    }

    fn launcher(&self) -> Launcher {
        Launcher::new(
            Arc::clone(&self.config),
            self.home.path().to_path_buf(),
            Arc::clone(&self.spawner),
        )
    }

    /// Bound `runs` transport runs; on expiry the workers are dropped, which
    /// kills their processes
    async fn with_deadline<Fut>(&self, runs: usize, run: Fut) -> Result<()>
    where
        Fut: std::future::Future<Output = RunResult>,
    {
        let overall = self.config.timeouts.overall_deadline(runs);
        match tokio::time::timeout(Duration::from_secs(overall), run).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(Error::SessionTimeout(overall)),
        }
    }
}

/// One worker: launch the transport, then drive its session
async fn run_transport(
    mode: TransportMode,
    launcher: &Launcher,
    scenario: &Scenario,
    program: &Path,
    rules: &LineRules,
    options: &SessionOptions,
    mut cancel: CancelSignal,
) -> RunResult {
    let (command, state) = launcher.launch(mode, scenario, program, &mut cancel).await?;
    run_session(&command, state, rules, options, cancel).await
}
