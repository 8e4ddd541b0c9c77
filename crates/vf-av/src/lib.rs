//! # vf-av
//!
//! External tool plumbing and the raw frame source for vidframe.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache the paths to
//!   ffmpeg and ffprobe.
//! - **Command execution** ([`ToolCommand`]) -- builder for short-lived
//!   tool runs with a timeout, and for piped long-lived producers.
//! - **Probing** ([`Prober`], [`FfprobeProber`]) -- turn a file into
//!   [`vf_core::VideoMetadata`].
//! - **Decoding** ([`DecoderLauncher`], [`FfmpegLauncher`]) -- start ffmpeg
//!   emitting packed RGB frames on stdout.
//! - **Frame source** ([`FrameSource`]) -- pull frames one at a time into a
//!   reusable buffer.
//! - **Cancellation** ([`CancelScope`]) -- terminate every running decoder
//!   on operator interrupt and wait for teardown.
//!
//! ## Example
//!
//! ```no_run
//! use vf_av::CancelScope;
//! use vf_core::config::Config;
//!
//! let rt = tokio::runtime::Runtime::new()?;
//! let scope = CancelScope::new(rt.handle().clone());
//!
//! let mut source = vf_av::open_video("/path/to/video.mp4", &Config::default(), scope)?;
//! while source.next_frame() {
//!     let rgb = source.frame();
//!     println!("{} bytes", rgb.len());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cancel;
pub mod command;
pub mod decoder;
pub mod frame_source;
pub mod probe;
pub mod tools;

// ---- Re-exports for convenience ----

pub use cancel::CancelScope;
pub use command::{ToolCommand, ToolOutput};
pub use decoder::{DecodeStream, DecoderLauncher, DecoderProcess, FfmpegLauncher, Terminate};
pub use frame_source::{FrameSource, SourceState};
pub use probe::{FfprobeProber, Prober};
pub use tools::{ToolInfo, ToolRegistry};

use std::path::Path;
use std::sync::Arc;

use vf_core::config::Config;

/// Probe a file and return an uninitialized ffmpeg-backed frame source.
///
/// The source is attached to `scope`: cancelling it terminates the decoder
/// once the source is running.
///
/// # Errors
///
/// Fails with `NotFound`, `ToolMissing`, `ProbeFailed` or `NoVideoStream`
/// as described on [`Prober::probe`].
pub fn open_video(
    path: impl AsRef<Path>,
    config: &Config,
    scope: CancelScope,
) -> vf_core::Result<FrameSource> {
    let path = path.as_ref();
    if !path.is_file() {
        return Err(vf_core::Error::not_found(path));
    }

    let tools = ToolRegistry::discover(&config.tools);
    tools.require_all()?;

    let launcher = FfmpegLauncher::new(&tools, &config.decoder)?;
    let metadata = FfprobeProber::new(tools, &config.decoder).probe(path)?;
    Ok(FrameSource::new(Arc::new(metadata), Arc::new(launcher)).with_scope(scope))
}
