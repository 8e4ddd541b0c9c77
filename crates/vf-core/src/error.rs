//! Unified error type for vidframe.
//!
//! Every crate in the workspace funnels its failures into [`Error`]. None of
//! the variants are retried internally; the immediate caller decides whether
//! to try again or give up.

use std::path::PathBuf;

/// Unified error type covering all failure modes in vidframe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input file does not exist.
    #[error("video file not found: {}", path.display())]
    NotFound {
        /// The path that was looked up.
        path: PathBuf,
    },

    /// A required external tool (ffmpeg, ffprobe) is not installed.
    #[error("tool not found: {tool}; is it installed and in PATH?")]
    ToolMissing {
        /// Name of the missing tool.
        tool: String,
    },

    /// The inspection subprocess failed or its output could not be parsed.
    #[error("probe failed for {}: {message}", path.display())]
    ProbeFailed {
        /// File that was being probed.
        path: PathBuf,
        /// Human-readable error description.
        message: String,
    },

    /// Probing succeeded but produced no usable video stream.
    #[error("no video stream found in {}", path.display())]
    NoVideoStream {
        /// File that was probed.
        path: PathBuf,
    },

    /// The decoder subprocess could not be started or attached.
    #[error("failed to launch decoder: {message}")]
    LaunchFailed {
        /// Human-readable error description.
        message: String,
    },

    /// A caller-supplied frame buffer cannot hold one frame.
    #[error("buffer size {actual} is smaller than frame size {required}")]
    BufferTooSmall {
        /// Bytes needed for one frame.
        required: usize,
        /// Length of the rejected buffer.
        actual: usize,
    },

    /// The decoder output broke before the video ended.
    #[error("decoder stream error: {message}")]
    StreamError {
        /// Human-readable error description.
        message: String,
    },

    /// Configuration could not be parsed.
    #[error("config error: {0}")]
    Config(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}

impl Error {
    /// Convenience constructor for [`Error::NotFound`].
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Error::NotFound { path: path.into() }
    }

    /// Convenience constructor for [`Error::ToolMissing`].
    pub fn tool_missing(tool: impl Into<String>) -> Self {
        Error::ToolMissing { tool: tool.into() }
    }

    /// Convenience constructor for [`Error::ProbeFailed`].
    pub fn probe_failed(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::ProbeFailed {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::LaunchFailed`].
    pub fn launch_failed(message: impl Into<String>) -> Self {
        Error::LaunchFailed {
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::StreamError`].
    pub fn stream(message: impl Into<String>) -> Self {
        Error::StreamError {
            message: message.into(),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
