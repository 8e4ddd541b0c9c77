//! Probed video metadata.
//!
//! [`VideoMetadata`] is built once from the key/value mappings produced by
//! the inspection tool and never changes afterwards. Its
//! [`frame_size`](VideoMetadata::frame_size) fixes the byte length of every
//! frame a decode session delivers.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Channels per pixel for the packed 8-bit RGB output format.
pub const RGB_DEPTH: usize = 3;

/// Key/value attributes of a single stream, as reported by the inspection tool.
pub type StreamFields = HashMap<String, String>;

/// Immutable description of a video file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    path: PathBuf,
    width: u32,
    height: u32,
    depth: usize,
    bitrate: u64,
    frames: u64,
    duration: f64,
    fps: f64,
    codec: String,
    audio_codec: Option<String>,
}

impl VideoMetadata {
    /// Build metadata from the primary video and audio stream mappings.
    ///
    /// Missing or unparsable fields stay at their zero value; only an empty
    /// video mapping is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoVideoStream`] if `video` has no entries.
    pub fn from_streams(
        path: impl Into<PathBuf>,
        video: &StreamFields,
        audio: &StreamFields,
    ) -> Result<Self> {
        let path = path.into();
        if video.is_empty() {
            return Err(Error::NoVideoStream { path });
        }

        let number = |key: &str| video.get(key).and_then(|v| parse_decimal(v));

        Ok(Self {
            width: number("width").map(|v| v as u32).unwrap_or(0),
            height: number("height").map(|v| v as u32).unwrap_or(0),
            depth: RGB_DEPTH,
            bitrate: number("bit_rate").map(|v| v as u64).unwrap_or(0),
            frames: number("nb_frames").map(|v| v as u64).unwrap_or(0),
            duration: number("duration").unwrap_or(0.0),
            fps: video
                .get("r_frame_rate")
                .map(|v| parse_frame_rate(v))
                .unwrap_or(0.0),
            codec: video.get("codec_name").cloned().unwrap_or_default(),
            audio_codec: audio.get("codec_name").cloned(),
            path,
        })
    }

    /// Metadata for a raw stream of known dimensions, with everything else
    /// left at zero. Useful for sources that were not probed.
    pub fn with_dimensions(path: impl Into<PathBuf>, width: u32, height: u32) -> Self {
        Self {
            path: path.into(),
            width,
            height,
            depth: RGB_DEPTH,
            bitrate: 0,
            frames: 0,
            duration: 0.0,
            fps: 0.0,
            codec: String::new(),
            audio_codec: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name as given when probing, lossily converted to a string.
    pub fn file_name(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Bitrate in bits per second.
    pub fn bitrate(&self) -> u64 {
        self.bitrate
    }

    /// Total number of frames reported by the container.
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn codec(&self) -> &str {
        &self.codec
    }

    pub fn audio_codec(&self) -> Option<&str> {
        self.audio_codec.as_deref()
    }

    /// Exact byte length of one decoded frame: width x height x depth.
    pub fn frame_size(&self) -> usize {
        self.width as usize * self.height as usize * self.depth
    }
}

/// Parse a decimal field, tolerating surrounding whitespace.
fn parse_decimal(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a rational "num/den" frame rate.
///
/// Anything other than two non-empty parts with a non-zero denominator
/// yields 0.0; some containers omit or zero this value.
pub fn parse_frame_rate(rate: &str) -> f64 {
    let Some((num, den)) = rate.trim().split_once('/') else {
        return 0.0;
    };
    match (parse_decimal(num), parse_decimal(den)) {
        (Some(num), Some(den)) if den != 0.0 => num / den,
        _ => 0.0,
    }
}
