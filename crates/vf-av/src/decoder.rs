//! Decoder subprocess management.
//!
//! A [`DecoderLauncher`] starts something that produces raw frames as a
//! plain byte stream, and a [`DecodeStream`] is the running producer. The
//! ffmpeg implementation ([`FfmpegLauncher`] / [`DecoderProcess`]) owns the
//! child process and its stdout pipe as one resource, so the process is
//! reaped on every exit path, including drop.

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::{Child, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use vf_core::config::DecoderConfig;
use vf_core::{Error, VideoMetadata};

use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, FFMPEG};

/// Interval between exit checks while waiting out the close grace period.
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Forcefully stops a running producer from another thread.
pub trait Terminate: Send + Sync {
    fn terminate(&self);
}

/// A running producer of raw frame bytes.
pub trait DecodeStream: Read + Send {
    /// Handle that can kill the producer while a read is blocked on it.
    fn terminator(&self) -> Arc<dyn Terminate>;

    /// Release the stream and reap the producer.
    ///
    /// Must be idempotent and must not block indefinitely.
    fn close(&mut self) -> io::Result<()>;
}

/// Starts decode streams for probed videos.
pub trait DecoderLauncher: Send + Sync {
    type Stream: DecodeStream;

    /// Start decoding `metadata`'s file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LaunchFailed`] if the producer cannot be started or
    /// its output cannot be attached.
    fn launch(&self, metadata: &VideoMetadata) -> vf_core::Result<Self::Stream>;
}

// ---------------------------------------------------------------------------
// ffmpeg
// ---------------------------------------------------------------------------

/// Launches ffmpeg to emit packed 8-bit RGB frames on stdout.
#[derive(Debug, Clone)]
pub struct FfmpegLauncher {
    ffmpeg: PathBuf,
    close_grace: Duration,
}

impl FfmpegLauncher {
    /// Create a launcher using the ffmpeg found in `tools`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ToolMissing`] if ffmpeg is not available.
    pub fn new(tools: &ToolRegistry, config: &DecoderConfig) -> vf_core::Result<Self> {
        Ok(Self {
            ffmpeg: tools.require(FFMPEG)?.to_path_buf(),
            close_grace: config.close_grace(),
        })
    }

    /// The decode invocation for a file: primary video stream, raw rgb24,
    /// every frame in display order, no logging, written to stdout.
    pub fn decode_command(&self, metadata: &VideoMetadata) -> ToolCommand {
        let mut cmd = ToolCommand::new(self.ffmpeg.clone());
        cmd.args(["-loglevel", "quiet", "-nostdin", "-i"]);
        cmd.arg(metadata.path().to_string_lossy().as_ref());
        cmd.args([
            "-map", "0:v:0",
            "-f", "rawvideo",
            "-pix_fmt", "rgb24",
            "-vcodec", "rawvideo",
            "-",
        ]);
        cmd
    }
}

impl DecoderLauncher for FfmpegLauncher {
    type Stream = DecoderProcess;

    fn launch(&self, metadata: &VideoMetadata) -> vf_core::Result<DecoderProcess> {
        let cmd = self.decode_command(metadata);
        let mut child = cmd
            .spawn_stdout()
            .map_err(|e| Error::launch_failed(format!("{}: {e}", cmd.program_name())))?;

        let Some(stdout) = child.stdout.take() else {
            discard_child(&mut child);
            return Err(Error::launch_failed("decoder stdout could not be attached"));
        };

        tracing::info!(
            "Started decoder (pid {}) for {}",
            child.id(),
            metadata.path().display()
        );

        Ok(DecoderProcess {
            child: Arc::new(ChildHandle {
                child: Mutex::new(child),
                terminated: AtomicBool::new(false),
            }),
            stdout: Some(stdout),
            close_grace: self.close_grace,
            reached_eof: false,
            reaped: false,
        })
    }
}

/// Kill and reap a child that never became a usable decoder.
fn discard_child(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!("Decoder (pid {}) kill: {e}", child.id());
    }
    match child.wait() {
        Ok(status) => tracing::debug!("Discarded decoder (pid {}) exited ({status})", child.id()),
        Err(e) => tracing::debug!("Decoder (pid {}) wait: {e}", child.id()),
    }
}

/// Shared ownership of the child so a watcher can kill it mid-read.
struct ChildHandle {
    child: Mutex<Child>,
    terminated: AtomicBool,
}

impl Terminate for ChildHandle {
    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        let mut child = self.child.lock();
        if let Err(e) = child.kill() {
            tracing::debug!("Decoder (pid {}) kill: {e}", child.id());
        }
    }
}

/// A running ffmpeg decoder and its stdout pipe.
pub struct DecoderProcess {
    child: Arc<ChildHandle>,
    stdout: Option<ChildStdout>,
    close_grace: Duration,
    reached_eof: bool,
    reaped: bool,
}

impl DecoderProcess {
    /// Wait up to the grace period for the decoder to exit, then kill it.
    fn reap(&mut self) -> io::Result<ExitStatus> {
        let deadline = Instant::now() + self.close_grace;
        loop {
            if let Some(status) = self.child.child.lock().try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(REAP_POLL_INTERVAL);
        }

        let mut child = self.child.child.lock();
        tracing::debug!(
            "Decoder (pid {}) still running after {:?}; killing",
            child.id(),
            self.close_grace
        );
        // Kill can race with a natural exit; wait reports either way.
        let _ = child.kill();
        child.wait()
    }

    fn log_exit(&self, status: ExitStatus) {
        if self.child.terminated.load(Ordering::SeqCst) {
            tracing::info!("Decoder terminated by interrupt ({status})");
        } else if status.success() {
            tracing::debug!("Decoder exited ({status})");
        } else if self.reached_eof {
            tracing::warn!("Decoder exited unsuccessfully ({status})");
        } else {
            // Closing the pipe early makes ffmpeg fail its next write.
            tracing::debug!("Decoder stopped before end of stream ({status})");
        }
    }
}

impl Read for DecoderProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(0);
        };
        let n = stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.reached_eof = true;
        }
        Ok(n)
    }
}

impl DecodeStream for DecoderProcess {
    fn terminator(&self) -> Arc<dyn Terminate> {
        self.child.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        drop(self.stdout.take());
        if self.reaped {
            return Ok(());
        }
        let status = self.reap()?;
        self.reaped = true;
        self.log_exit(status);
        Ok(())
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to reap decoder: {e}");
        }
    }
}

impl std::fmt::Debug for DecoderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderProcess")
            .field("open", &self.stdout.is_some())
            .field("reached_eof", &self.reached_eof)
            .field("reaped", &self.reaped)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn launcher_for(program: PathBuf) -> FfmpegLauncher {
        FfmpegLauncher {
            ffmpeg: program,
            close_grace: Duration::from_millis(200),
        }
    }

    #[test]
    fn decode_command_shape() {
        let launcher = launcher_for(PathBuf::from("/usr/bin/ffmpeg"));
        let meta = VideoMetadata::with_dimensions("/videos/in put.mp4", 2, 2);
        let cmd = launcher.decode_command(&meta);
        assert_eq!(
            cmd.command_line(),
            "/usr/bin/ffmpeg -loglevel quiet -nostdin -i /videos/in put.mp4 \
             -map 0:v:0 -f rawvideo -pix_fmt rgb24 -vcodec rawvideo -"
        );
    }

    #[test]
    fn new_requires_ffmpeg() {
        let err = FfmpegLauncher::new(&ToolRegistry::default(), &DecoderConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::ToolMissing { ref tool } if tool == "ffmpeg"));
    }

    #[test]
    fn launch_nonexistent_program_fails() {
        let launcher = launcher_for(PathBuf::from("/nonexistent/ffmpeg_xyz_12345"));
        let meta = VideoMetadata::with_dimensions("in.mp4", 2, 2);
        let err = launcher.launch(&meta).unwrap_err();
        assert!(matches!(err, Error::LaunchFailed { .. }));
    }

    #[test]
    fn close_is_idempotent_on_real_process() {
        // `true` ignores its arguments and exits immediately.
        let Ok(program) = which::which("true") else {
            return;
        };
        let launcher = launcher_for(program);
        let meta = VideoMetadata::with_dimensions(Path::new("ignored.mp4"), 2, 2);
        let mut process = launcher.launch(&meta).unwrap();
        let mut buf = [0u8; 16];
        assert_eq!(process.read(&mut buf).unwrap(), 0);
        process.close().unwrap();
        process.close().unwrap();
        assert_eq!(process.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_kills_process_that_outlives_grace() {
        // `yes` writes forever; after stdout is closed it dies on SIGPIPE,
        // and if it somehow survives the grace period it is killed.
        let Ok(program) = which::which("yes") else {
            return;
        };
        let launcher = launcher_for(program);
        let meta = VideoMetadata::with_dimensions("ignored.mp4", 2, 2);
        let mut process = launcher.launch(&meta).unwrap();
        let started = Instant::now();
        process.close().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn discard_child_reaps_running_process() {
        let Ok(program) = which::which("sleep") else {
            return;
        };
        let mut child = ToolCommand::new(program).arg("30").spawn_stdout().unwrap();
        let started = Instant::now();
        discard_child(&mut child);
        assert!(started.elapsed() < Duration::from_secs(5));
        // Already reaped: the exit status is cached and no process remains.
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn discard_child_tolerates_exited_process() {
        let Ok(program) = which::which("true") else {
            return;
        };
        let mut child = ToolCommand::new(program).spawn_stdout().unwrap();
        child.wait().unwrap();
        discard_child(&mut child);
        assert!(child.try_wait().unwrap().is_some());
    }

    #[test]
    fn terminator_unblocks_reader() {
        let Ok(program) = which::which("sleep") else {
            return;
        };
        // `sleep` rejects ffmpeg's arguments, so use a launcher-free spawn
        // with the same resource layout.
        let mut child = ToolCommand::new(program).arg("30").spawn_stdout().unwrap();
        let stdout = child.stdout.take().unwrap();
        let mut process = DecoderProcess {
            child: Arc::new(ChildHandle {
                child: Mutex::new(child),
                terminated: AtomicBool::new(false),
            }),
            stdout: Some(stdout),
            close_grace: Duration::from_millis(200),
            reached_eof: false,
            reaped: false,
        };

        let terminator = process.terminator();
        let killer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            terminator.terminate();
        });

        let mut buf = [0u8; 8];
        assert_eq!(process.read(&mut buf).unwrap(), 0);
        killer.join().unwrap();
        process.close().unwrap();
        assert!(process.child.terminated.load(Ordering::SeqCst));
    }
}
