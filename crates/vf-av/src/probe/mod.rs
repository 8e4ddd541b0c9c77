//! Metadata probing.
//!
//! A [`Prober`] turns a file path into [`VideoMetadata`]. The production
//! implementation, [`FfprobeProber`], shells out to ffprobe; tests and the
//! session registry can substitute their own.

pub mod ffprobe;

pub use self::ffprobe::{parse_stream_section, FfprobeProber};

use std::path::Path;

use vf_core::VideoMetadata;

/// Extracts video metadata from a file.
pub trait Prober: Send + Sync {
    /// Human-readable name identifying this prober implementation.
    fn name(&self) -> &'static str;

    /// Probe the file at `path`.
    ///
    /// # Errors
    ///
    /// - [`vf_core::Error::NotFound`] if `path` is not an existing file.
    /// - [`vf_core::Error::ToolMissing`] if a required tool is absent.
    /// - [`vf_core::Error::ProbeFailed`] if inspection fails or its output
    ///   cannot be parsed.
    /// - [`vf_core::Error::NoVideoStream`] if there is no usable video stream.
    fn probe(&self, path: &Path) -> vf_core::Result<VideoMetadata>;
}
