//! End-to-end integration tests for the console harness
//!
//! These tests drive the `mock_repl` binary through every transport:
//! 1. Staging a small program
//! 2. Running a scenario against the mock debugger over a PTY
//! 3. Verifying prompts, assertions, failure reports and cleanup

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use console_harness::common::config::Config;
use console_harness::common::logging;
use console_harness::testing;
use console_harness::{ConsoleTest, Error, TransportMode};

const PROGRAM: &str = "\
 1| a = 1
 2| puts 'hello'
 3| b = a + 1
 4| puts b
";

/// Test context with a configuration pointing at the mock debugger
struct TestContext {
    config: Config,
    /// Scratch directory for scenario files
    temp_dir: tempfile::TempDir,
}

impl TestContext {
    fn new() -> Self {
        logging::init_test();

        let mut config = Config::default();
        config.debugger.path = mock_binary();
        config.debugger.local_prompt = r"\(mock\)".to_string();
        config.debugger.remote_prompt = r"\(mock:remote\)".to_string();
        config.debugger.program_suffix = ".mock".to_string();
        config.timeouts.session_secs = 10;
        config.timeouts.setup_secs = 5;
        config.timeouts.overall_secs = 30;
        config.timeouts.exit_wait_secs = 2;

        Self {
            config,
            temp_dir: tempfile::tempdir().expect("Failed to create temp dir"),
        }
    }

    fn local_only(mut self) -> Self {
        self.config.run.remote = false;
        self
    }

    fn harness(&self) -> ConsoleTest {
        ConsoleTest::new(self.config.clone()).expect("Failed to create harness")
    }

    fn write_scenario(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write scenario");
        path
    }
}

fn mock_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_mock_repl"))
}

fn failure_mode(err: &Error) -> TransportMode {
    err.run_failure()
        .map(|f| f.mode)
        .unwrap_or_else(|| panic!("expected a run failure, got: {err}"))
}

#[tokio::test]
async fn test_eval_and_step_on_every_transport() {
    let ctx = TestContext::new();
    ctx.harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("n");
            s.assert_line_num(2);
            s.type_cmd("p a + 1");
            s.assert_line_text("=> 2");
            s.type_cmd("n");
            s.type_cmd("n");
            s.assert_line_num(4);
            s.type_cmd("p b");
            s.assert_line_text("=> 2");
            s.assert_debuggee_line_text("hello");
            s.type_cmd("c");
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_sequential_mode() {
    let mut ctx = TestContext::new();
    ctx.config.run.parallel = false;
    ctx.harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("b 3");
            s.type_cmd("c");
            s.assert_line_num(3);
            s.type_cmd("c");
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_locals_from_marker() {
    let ctx = TestContext::new().local_only();
    ctx.harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("n");
            s.assert_with(|state| {
                let info = state.internal_info().expect("marker seen");
                assert_eq!(info.local("a").and_then(|v| v.as_i64()), Some(1));
                Ok(())
            });
            s.type_cmd("c");
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_repl_error_fails_the_run() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("frobnicate");
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    assert_eq!(failure_mode(&err), TransportMode::Local);
    let report = err.to_string();
    assert!(report.contains("| Debugger Session |"), "{report}");
    assert!(report.contains("REPL ERROR: unknown command: frobnicate"), "{report}");
    assert!(report.contains("on LOCAL mode"), "{report}");
}

#[tokio::test]
async fn test_leftover_commands_are_reported() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("c");
            s.type_cmd("p a");
        })
        .await
        .unwrap_err();

    let report = err.to_string();
    assert!(
        report.contains("Expected all commands/assertions to be executed. Still have 1 left."),
        "{report}"
    );
}

#[tokio::test]
async fn test_running_out_of_commands_is_a_desync() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("n");
        })
        .await
        .unwrap_err();

    let failure = err.run_failure().expect("run failure");
    assert!(matches!(failure.error, Error::ProtocolDesync(_)));
    assert!(err.to_string().contains("Expected the REPL prompt to finish"));
}

#[tokio::test]
async fn test_debuggee_exception_is_reported() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(" 1| a = 1\n 2| raise 'boom'\n", |s| {
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    let failure = err.run_failure().expect("run failure");
    assert!(matches!(failure.error, Error::RuntimeFault(_)));
    assert!(err.to_string().contains("DEBUGGEE Exception: boom"), "{err}");
}

#[tokio::test]
async fn test_confirmation_defers_assertions() {
    let ctx = TestContext::new();
    let checked = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&checked);

    ctx.harness()
        .debug_code(PROGRAM, move |s| {
            s.type_cmd("q");
            s.assert_with(move |_| {
                seen.store(true, Ordering::SeqCst);
                Ok(())
            });
            s.type_cmd("y");
        })
        .await
        .unwrap();

    assert!(checked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_flunk_finish() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("n");
            s.flunk_finish("stop here");
        })
        .await
        .unwrap_err();

    assert!(err.to_string().ends_with("stop here on LOCAL mode"), "{err}");
}

#[tokio::test]
async fn test_misnumbered_program_is_rejected_after_run() {
    let ctx = TestContext::new().local_only();
    let err = ctx
        .harness()
        .debug_code(" 1| a = 1\n 3| puts a\n", |s| {
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidProgram(_)), "{err}");
}

#[tokio::test]
async fn test_run_command() {
    let ctx = TestContext::new();
    ctx.harness()
        .run_command(PROGRAM, mock_binary(), &["{program}"], |s| {
            s.type_cmd("p 40 + 2");
            s.assert_line_text("=> 42");
            s.type_cmd("c");
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_process_recorded_as_unfinished_fails_the_run() {
    let ctx = TestContext::new();
    let err = ctx
        .harness()
        .run_command(PROGRAM, mock_binary(), &["{program}"], |s| {
            s.type_cmd("n");
            s.assert_with(|state| {
                state.set_failed_process("debuggee");
                Ok(())
            });
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    let failure = err.run_failure().expect("run failure");
    assert!(matches!(&failure.error, Error::CleanupFailure(name) if name == "debuggee"));
    assert!(
        err.to_string()
            .ends_with("Expected the debuggee program to finish on LOCAL mode"),
        "{err}"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_debugger_ignoring_hangup_is_killed() {
    let mut ctx = TestContext::new();
    ctx.config.timeouts.session_secs = 2;
    ctx.config.timeouts.exit_wait_secs = 1;

    let err = ctx
        .harness()
        .run_command(PROGRAM, "sh", &["-c", "trap '' HUP; exec sleep 30"], |s| {
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    let failure = err.run_failure().expect("run failure");
    assert!(matches!(failure.error, Error::SessionTimeout(2)), "{err}");
    assert!(matches!(&failure.cleanup, Some(Error::CleanupFailure(name)) if name == "debugger"));

    let report = err.to_string();
    assert!(report.contains("TIMEOUT ERROR (2 sec) on LOCAL mode"), "{report}");
    assert!(
        report.ends_with("Expected the debugger program to finish on LOCAL mode"),
        "{report}"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreachable_debuggee_times_out() {
    let mut ctx = TestContext::new();
    ctx.config.debuggee.path = Some(PathBuf::from("sleep"));
    ctx.config.debuggee.unix_args = vec!["30".to_string()];
    ctx.config.debuggee.tcp_args = vec!["30".to_string()];
    ctx.config.timeouts.setup_secs = 1;

    let err = ctx
        .harness()
        .debug_code(PROGRAM, |s| {
            s.type_cmd("c");
        })
        .await
        .unwrap_err();

    let failure = err.run_failure().expect("run failure");
    assert!(failure.mode.is_remote());
    assert!(
        matches!(failure.error, Error::SetupTimeout { secs: 1, .. }),
        "{err}"
    );
}

#[tokio::test]
async fn test_yaml_scenario() {
    let ctx = TestContext::new();
    let path = ctx.write_scenario(
        "eval.yml",
        r#"
name: eval
program: |
  1| a = 1
  2| b = a + 1
steps:
  - action: type
    command: "n"
  - action: assert_local
    name: a
    value: "1"
  - action: type
    command: "p a + 41"
  - action: assert_line_match
    pattern: '=> \d+'
  - action: type
    command: "c"
"#,
    );

    let result = testing::run_scenario(&ctx.harness(), &path, false)
        .await
        .unwrap();
    assert!(result.passed, "{:?}", result.error);
    assert_eq!(result.modes.len(), 3);
}

#[tokio::test]
async fn test_yaml_scenario_failure_is_a_result() {
    let ctx = TestContext::new().local_only();
    let path = ctx.write_scenario(
        "flunk.yml",
        "name: flunk\nprogram: |\n  1| a = 1\nsteps:\n  - action: flunk_finish\n    message: nope\n",
    );

    let result = testing::run_scenario(&ctx.harness(), &path, false)
        .await
        .unwrap();
    assert!(!result.passed);
    assert_eq!(result.failed_mode, Some(TransportMode::Local));
    assert!(result.error.unwrap().contains("nope on LOCAL mode"));
}
