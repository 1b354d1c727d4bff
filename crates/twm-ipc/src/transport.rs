//! Process transport for the `twm` CLI
//!
//! Both the event stream and one-shot queries talk to the window manager by
//! running its CLI as a child process:
//!
//! ```text
//! twm --format json <subcommand> [args...]
//! twm --format json listen --events window_created,window_closed
//! ```
//!
//! Standard output carries protocol data. Standard error is diagnostics only
//! and is never parsed.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{SpawnError, TransportError};

/// Program name looked up on `$PATH` when nothing else is configured
pub const DEFAULT_PROGRAM: &str = "twm";

/// How to invoke the window manager CLI
///
/// `base_args` are placed before the `--format json` convention. They are
/// empty for a normal install but let callers wrap the tool, e.g. in a
/// shell or a remote runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tool {
    program: String,
    base_args: Vec<String>,
}

impl Tool {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            base_args: Vec::new(),
        }
    }

    pub fn with_base_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for `<tool> --format json <args...>`, excluding the program
    pub fn json_args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.base_args
            .iter()
            .cloned()
            .chain(["--format".to_string(), "json".to_string()])
            .chain(args.into_iter().map(|a| a.as_ref().to_string()))
            .collect()
    }

    /// Command for `<tool> --format json <args...>` with stdout and stderr piped
    pub(crate) fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.json_args(args))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for Tool {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

/// Launch `<tool> --format json <args...>` as a long-running child
///
/// # Errors
///
/// Returns `SpawnError::NotFound` when the executable cannot be located,
/// `SpawnError::PermissionDenied` when it may not be executed, and
/// `SpawnError::Io` for any other launch failure.
///
/// # Example
///
/// ```ignore
/// let mut process = spawn(&Tool::default(), &["listen", "--events", "window_created"])?;
/// let stdout = process.take_stdout()?;
/// ```
pub fn spawn<I, S>(tool: &Tool, args: I) -> Result<ProcessHandle, SpawnError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let child = tool
        .command(args)
        .spawn()
        .map_err(|e| SpawnError::from_io(tool.program(), e))?;

    debug!(program = %tool.program(), pid = ?child.id(), "Spawned twm process");

    Ok(ProcessHandle::new(child, tool.program().to_string()))
}

/// Owner of one running `twm` child process
///
/// Dropping the handle kills the child if it is still running.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    program: String,
    pid: Option<u32>,
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
    status: Option<ExitStatus>,
}

impl ProcessHandle {
    fn new(mut child: Child, program: String) -> Self {
        let pid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        Self {
            child,
            program,
            pid,
            stdout,
            stderr,
            status: None,
        }
    }

    /// OS process id assigned at spawn time
    ///
    /// Kept after the child has been reaped, for diagnostics only.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Take the protocol channel; can only be done once
    pub fn take_stdout(&mut self) -> Result<ChildStdout, SpawnError> {
        self.stdout.take().ok_or_else(|| SpawnError::MissingPipe {
            program: self.program.clone(),
            stream: "stdout",
        })
    }

    /// Take the diagnostics channel for custom handling
    pub fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.stderr.take()
    }

    /// Spawn a task that drains the child's stderr
    ///
    /// Each non-empty line is logged under the `twm_ipc::tool` target, at
    /// warn level when `forward` is set and at trace level otherwise. The
    /// pipe is drained either way so a chatty tool never blocks on a full
    /// stderr buffer. Returns `None` if stderr was already taken.
    pub fn drain_stderr(&mut self, forward: bool) -> Option<JoinHandle<()>> {
        let stderr = self.stderr.take()?;
        let program = self.program.clone();

        Some(tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim_end();
                        if line.is_empty() {
                            continue;
                        }
                        if forward {
                            warn!(target: "twm_ipc::tool", program = %program, "{}", line);
                        } else {
                            trace!(target: "twm_ipc::tool", program = %program, "{}", line);
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        debug!("Stopped reading {} stderr: {}", program, e);
                        break;
                    }
                }
            }
        }))
    }

    /// Exit status if the child has already exited, without blocking
    pub fn try_status(&mut self) -> Result<Option<ExitStatus>, TransportError> {
        if self.status.is_none() {
            self.status = self.child.try_wait().map_err(TransportError::Wait)?;
        }
        Ok(self.status)
    }

    /// Wait for the child to exit
    ///
    /// May be called any number of times; later calls return the cached
    /// status.
    pub async fn wait(&mut self) -> Result<ExitStatus, TransportError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let status = self.child.wait().await.map_err(TransportError::Wait)?;
        self.status = Some(status);
        Ok(status)
    }

    /// Wait for the child to exit, giving up after `limit`
    pub async fn wait_timeout(
        &mut self,
        limit: Duration,
    ) -> Result<Option<ExitStatus>, TransportError> {
        match tokio::time::timeout(limit, self.wait()).await {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Stop the child and return its exit status
    ///
    /// Sends SIGTERM (a plain kill on non-Unix platforms), waits up to
    /// `grace` for the child to exit, then kills it outright. Calling this
    /// on a child that already exited just returns the recorded status, so
    /// repeated termination is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Signal` if the signal cannot be delivered
    /// and `TransportError::Wait` if reaping the child fails.
    pub async fn terminate(&mut self, grace: Duration) -> Result<ExitStatus, TransportError> {
        if let Some(status) = self.try_status()? {
            return Ok(status);
        }

        self.request_exit()?;

        if let Some(status) = self.wait_timeout(grace).await? {
            debug!(pid = ?self.pid, ?status, "twm process exited after termination request");
            return Ok(status);
        }

        warn!(
            pid = ?self.pid,
            grace_ms = grace.as_millis() as u64,
            "twm process ignored termination request, killing"
        );

        match self.child.start_kill() {
            Ok(()) => {}
            // Exited between the timeout and the kill
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
            Err(e) => {
                return Err(TransportError::Signal {
                    pid: self.pid.unwrap_or_default(),
                    source: e,
                })
            }
        }
        self.wait().await
    }

    #[cfg(unix)]
    fn request_exit(&mut self) -> Result<(), TransportError> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        // `None` once tokio has reaped the child; never signal a recycled pid
        let Some(pid) = self.child.id() else {
            return Ok(());
        };

        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(TransportError::Signal {
                pid,
                source: std::io::Error::from(errno),
            }),
        }
    }

    #[cfg(not(unix))]
    fn request_exit(&mut self) -> Result<(), TransportError> {
        match self.child.start_kill() {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(e) => Err(TransportError::Signal {
                pid: self.pid.unwrap_or_default(),
                source: e,
            }),
        }
    }
}
