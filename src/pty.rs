//! Pseudo-terminal process handling
//!
//! Both the debugger front-end and the remote debuggee run on their own PTY.
//! Output is read on a dedicated thread and forwarded line by line over a
//! tokio channel; the session side never blocks the runtime on a read.

use std::collections::BTreeMap;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 200;

/// Capacity of the line channel between the reader thread and the session
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Grace period between SIGTERM and SIGKILL
const TERM_GRACE: Duration = Duration::from_millis(200);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lines read from a PTY; an `Err` is the last item before the channel closes
pub type LineReceiver = mpsc::Receiver<io::Result<String>>;

/// A command line plus the environment it runs with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
        self.env
            .extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// The command as a shell-like string, for logs and reports
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A child process attached to a pseudo-terminal
pub struct PtyProcess {
    /// Name used when the process fails to finish ("debugger", "remote")
    name: String,
    child: Box<dyn Child + Send + Sync>,
    master: Option<Box<dyn MasterPty + Send>>,
    writer: Option<Box<dyn Write + Send>>,
}

impl PtyProcess {
    /// Spawn `spec` on a fresh PTY and start forwarding its output
    pub fn spawn(name: &str, spec: &CommandSpec) -> Result<(Self, LineReceiver)> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::spawn(&spec.program, format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &spec.cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::spawn(&spec.program, e))?;

        // Drop the slave so reads see EOF/EIO once the child is gone
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::spawn(&spec.program, e))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::spawn(&spec.program, e))?;

        tracing::debug!(
            name,
            pid = child.process_id(),
            command = %spec.display(),
            "Spawned PTY process"
        );

        let lines = spawn_line_reader(name, reader);

        Ok((
            Self {
                name: name.to_string(),
                child,
                master: Some(pair.master),
                writer: Some(writer),
            },
            lines,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Write one line to the child's terminal
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "PTY already closed"))?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    /// Whether the child has exited (a failed status query counts as exited)
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Close our ends of the terminal and make sure the child goes away
    ///
    /// The child gets a hangup like it would from a closed terminal and then
    /// `wait` to exit on its own. Returns `false` when it had to be killed,
    /// which callers report as "failed to finish".
    pub async fn shutdown(&mut self, wait: Duration) -> bool {
        self.writer.take();
        self.master.take();

        if self.has_exited() {
            return true;
        }

        self.hangup();
        if self.wait_for_exit(wait).await {
            return true;
        }

        tracing::warn!(
            name = %self.name,
            pid = self.pid(),
            "Process did not finish within {:?}, killing it",
            wait
        );
        self.force_kill().await;
        false
    }

    async fn wait_for_exit(&mut self, wait: Duration) -> bool {
        let start = Instant::now();
        loop {
            if self.has_exited() {
                return true;
            }
            if start.elapsed() >= wait {
                return false;
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) {
        if let Some(pid) = self.pid() {
            // SAFETY: plain kill(2) on our own child's pid
            unsafe {
                libc::kill(pid as libc::pid_t, signal);
            }
        }
    }

    #[cfg(unix)]
    fn hangup(&mut self) {
        self.signal(libc::SIGHUP);
    }

    #[cfg(not(unix))]
    fn hangup(&mut self) {
        let _ = self.child.kill();
    }

    #[cfg(unix)]
    async fn force_kill(&mut self) {
        self.signal(libc::SIGTERM);
        if self.wait_for_exit(TERM_GRACE).await {
            return;
        }
        self.signal(libc::SIGKILL);
        let _ = self.wait_for_exit(TERM_GRACE).await;
    }

    #[cfg(not(unix))]
    async fn force_kill(&mut self) {
        let _ = self.child.kill();
        let _ = self.wait_for_exit(TERM_GRACE).await;
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            let _ = self.child.kill();
        }
    }
}

/// Forward `reader` to a channel one line at a time on a dedicated thread
///
/// Trailing `\r\n` is stripped. A partial last line is flushed before the
/// channel closes, and a read error is forwarded as the final item.
pub fn spawn_line_reader(name: &str, reader: Box<dyn Read + Send>) -> LineReceiver {
    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
    let name = name.to_string();

    std::thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        loop {
            let mut buf = Vec::new();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => {
                    tracing::trace!(name = %name, "PTY reader: EOF");
                    break;
                }
                Ok(_) => {
                    if tx.blocking_send(Ok(chomp(&buf))).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::trace!(name = %name, error = %e, "PTY reader error");
                    if !buf.is_empty() {
                        let _ = tx.blocking_send(Ok(chomp(&buf)));
                    }
                    let _ = tx.blocking_send(Err(e));
                    break;
                }
            }
        }
    });

    rx
}

fn chomp(buf: &[u8]) -> String {
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

/// Whether a read error means "the other side is gone" rather than a fault
///
/// Reading a PTY master after the child exits reports EIO on Linux instead
/// of a zero-length read.
pub fn is_stream_closed(err: &io::Error) -> bool {
    #[cfg(unix)]
    if err.raw_os_error() == Some(libc::EIO) {
        return true;
    }
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Whether `path` exists, used as the readiness signal for socket debuggees
pub fn socket_ready(path: &Path) -> bool {
    path.exists()
}
