//! Builder for executing external tool commands.
//!
//! [`ToolCommand::execute`] runs a short-lived tool to completion with a
//! timeout (used for probing). [`ToolCommand::spawn_stdout`] starts a
//! long-lived producer whose standard output is read incrementally (used for
//! decoding).

use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;

/// Default command timeout: 30 seconds.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
}

/// Failure modes of [`ToolCommand::execute`], kept separate from
/// [`vf_core::Error`] so callers can map them onto their own variant.
#[derive(Debug, thiserror::Error)]
pub enum CommandFailure {
    /// The program could not be spawned.
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),
    /// The process did not finish in time and was killed.
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    /// Waiting on the process failed.
    #[error("I/O error waiting for process: {0}")]
    Wait(#[source] std::io::Error),
    /// The process exited unsuccessfully.
    #[error("exited with status {status}: {}", stderr.trim())]
    Exit { status: ExitStatus, stderr: String },
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use vf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .args(["-v", "quiet", "-show_streams"])
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await;
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time for [`execute`](Self::execute).
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// Short name of the program, for log and error messages.
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    /// The full command line, space separated.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// The child is killed if the timeout expires.
    pub async fn execute(&self) -> Result<ToolOutput, CommandFailure> {
        tracing::debug!("Executing: {}", self.command_line());

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(CommandFailure::Spawn)?;

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(CommandFailure::Exit {
                        status: output.status,
                        stderr: tool_output.stderr,
                    });
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(CommandFailure::Wait(e)),
            // Dropping the wait future drops the child, and kill_on_drop reaps it.
            Err(_elapsed) => Err(CommandFailure::TimedOut(self.timeout)),
        }
    }

    /// Spawn the command with stdout piped and stdin/stderr discarded.
    ///
    /// The caller owns the returned child and must reap it.
    pub fn spawn_stdout(&self) -> std::io::Result<Child> {
        tracing::debug!("Spawning: {}", self.command_line());

        std::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
    }
}
