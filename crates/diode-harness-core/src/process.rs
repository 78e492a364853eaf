//! Child process handles for pipeline stages.
//!
//! A [`ProcessHandle`] owns one OS process together with the exact command
//! it was started with, so a restart can reproduce it, and a bounded tail of
//! its stdout/stderr. Output is drained continuously so a verbose stage never
//! blocks on a full pipe.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::types::{FailureReason, Signal, StageStatus};

/// Maximum number of output bytes kept per process.
pub const CAPTURE_LIMIT: usize = 64 * 1024;

/// Program and arguments used to launch a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// Executable path.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl StageCommand {
    /// Creates a command with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends a flag followed by its value.
    #[must_use]
    pub fn flag(self, name: &str, value: impl ToString) -> Self {
        self.arg(name).arg(value.to_string())
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Returns true if `flag` appears in the arguments.
    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|a| a == flag)
    }

    /// Value following `flag`, if present.
    #[must_use]
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }
}

impl fmt::Display for StageCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Bounded tail of a process's combined output.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    buf: Arc<Mutex<VecDeque<u8>>>,
}

impl OutputCapture {
    /// Appends a line, discarding the oldest bytes past [`CAPTURE_LIMIT`].
    pub fn push_line(&self, line: &str) {
        let mut buf = self.buf.lock();
        buf.extend(line.as_bytes());
        buf.push_back(b'\n');
        let excess = buf.len().saturating_sub(CAPTURE_LIMIT);
        buf.drain(..excess);
    }

    /// Captured text, lossily decoded.
    #[must_use]
    pub fn text(&self) -> String {
        let buf = self.buf.lock();
        let (a, b) = buf.as_slices();
        let mut bytes = Vec::with_capacity(a.len() + b.len());
        bytes.extend_from_slice(a);
        bytes.extend_from_slice(b);
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// One running (or exited) child process.
pub struct ProcessHandle {
    label: String,
    command: StageCommand,
    child: Child,
    pid: Option<u32>,
    capture: OutputCapture,
    drains: Vec<JoinHandle<()>>,
    exit: Option<StageStatus>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("exit", &self.exit)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Spawns `command`. Must be called from within a Tokio runtime.
    ///
    /// With `capture` set, stdout and stderr are drained into the handle's
    /// output buffer and forwarded to `tracing` at trace level; otherwise
    /// they are discarded.
    ///
    /// # Errors
    /// Returns an error if the executable cannot be started.
    pub fn spawn(label: impl Into<String>, command: StageCommand, capture: bool) -> std::io::Result<Self> {
        let label = label.into();
        let stdio = || if capture { Stdio::piped() } else { Stdio::null() };

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdio())
            .stderr(stdio())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id();
        let output = OutputCapture::default();
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain(stdout, label.clone(), output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain(stderr, label.clone(), output.clone()));
        }

        tracing::info!(process = %label, pid = ?pid, command = %command, "spawned");

        Ok(Self {
            label,
            command,
            child,
            pid,
            capture: output,
            drains,
            exit: None,
        })
    }

    /// Label used in logs (stage binary name).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process ID.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// The command this process was started with.
    #[must_use]
    pub const fn command(&self) -> &StageCommand {
        &self.command
    }

    /// Captured output so far.
    #[must_use]
    pub fn output(&self) -> String {
        self.capture.text()
    }

    /// Waits (bounded) for the output pipes to reach EOF, then returns the
    /// captured output. Used after the process has exited.
    pub async fn collect_output(&mut self) -> String {
        for drain in self.drains.drain(..) {
            let _ = tokio::time::timeout(Duration::from_millis(500), drain).await;
        }
        self.output()
    }

    /// Non-blocking status probe.
    ///
    /// # Errors
    /// Returns an error if the OS cannot report the child's state.
    pub fn status(&mut self) -> std::io::Result<StageStatus> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        match self.child.try_wait()? {
            Some(status) => {
                let status = convert_exit(status);
                self.exit = Some(status);
                Ok(status)
            }
            None => Ok(StageStatus::Running),
        }
    }

    /// Returns true if the process is still alive.
    pub fn is_running(&mut self) -> bool {
        matches!(self.status(), Ok(StageStatus::Running))
    }

    /// Sends `sig` to the process. Sending to an exited process is a no-op.
    ///
    /// # Errors
    /// Returns an error if the signal cannot be delivered.
    pub fn signal(&mut self, sig: Signal) -> std::io::Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let Some(pid) = self.pid else {
            return Ok(());
        };

        #[cfg(unix)]
        {
            use nix::errno::Errno;
            use nix::sys::signal::{self, Signal as NixSignal};
            use nix::unistd::Pid;

            let nix_sig = match sig {
                Signal::Term => NixSignal::SIGTERM,
                Signal::Kill => NixSignal::SIGKILL,
            };
            match signal::kill(Pid::from_raw(pid as i32), nix_sig) {
                Ok(()) | Err(Errno::ESRCH) => {
                    tracing::debug!(process = %self.label, pid = pid, signal = ?sig, "sent signal");
                    Ok(())
                }
                Err(e) => Err(std::io::Error::from(e)),
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (pid, sig);
            self.child.start_kill()
        }
    }

    /// Waits up to `timeout` for the process to exit.
    ///
    /// # Errors
    /// Returns an error if the OS cannot report the child's state.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> std::io::Result<Option<StageStatus>> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                let status = convert_exit(status?);
                self.exit = Some(status);
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Graceful stop: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// # Errors
    /// Returns an error if the process cannot be signalled or reaped.
    pub async fn stop(&mut self, grace: Duration) -> std::io::Result<StageStatus> {
        let start = Instant::now();
        self.signal(Signal::Term)?;
        if let Some(status) = self.wait_timeout(grace).await? {
            tracing::info!(process = %self.label, elapsed = ?start.elapsed(), "stopped gracefully");
            return Ok(status);
        }
        tracing::warn!(process = %self.label, "graceful stop timed out, sending SIGKILL");
        self.kill().await?;
        self.status()
    }

    /// Immediate kill. Killing an exited process is a no-op.
    ///
    /// # Errors
    /// Returns an error if the process cannot be reaped.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        match self.child.kill().await {
            Ok(()) => {}
            // Already reaped by a concurrent wait.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => return Err(e),
        }
        let status = self.status()?;
        tracing::debug!(process = %self.label, pid = ?self.pid, status = ?status, "killed");
        Ok(())
    }

    /// Synchronous best-effort kill, for drop paths.
    pub fn start_kill(&mut self) {
        if self.exit.is_none() {
            let _ = self.child.start_kill();
        }
    }
}

fn drain<R>(reader: R, label: String, capture: OutputCapture) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = String::from_utf8_lossy(&line);
                    let text = text.trim_end();
                    tracing::trace!(process = %label, "{text}");
                    capture.push_line(text);
                }
            }
        }
    })
}

fn convert_exit(status: std::process::ExitStatus) -> StageStatus {
    if status.success() {
        return StageStatus::Stopped;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map_or_else(
            || StageStatus::Failed(FailureReason::ExitCode(status.code().unwrap_or(-1))),
            |sig| StageStatus::Failed(FailureReason::Signal(sig)),
        )
    }
    #[cfg(not(unix))]
    {
        StageStatus::Failed(FailureReason::ExitCode(status.code().unwrap_or(-1)))
    }
}
