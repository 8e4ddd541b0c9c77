//! FFprobe-based [`Prober`] implementation.
//!
//! Runs `ffprobe -v quiet -show_streams -select_streams <v:0|a:0>` once for
//! the primary video stream and once for the primary audio stream, and reads
//! the default `key=value` writer output into [`StreamFields`].

use std::path::Path;
use std::time::Duration;

use vf_core::config::DecoderConfig;
use vf_core::{Error, StreamFields, VideoMetadata};

use super::Prober;
use crate::command::ToolCommand;
use crate::tools::{ToolRegistry, FFPROBE};

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    tools: ToolRegistry,
    timeout: Duration,
}

impl FfprobeProber {
    /// Create a prober using the given tool registry.
    pub fn new(tools: ToolRegistry, config: &DecoderConfig) -> Self {
        Self {
            tools,
            timeout: config.probe_timeout(),
        }
    }

    /// Run ffprobe for one stream type and parse its output.
    async fn probe_stream(
        &self,
        ffprobe: &Path,
        path: &Path,
        selector: &str,
    ) -> vf_core::Result<StreamFields> {
        let mut cmd = ToolCommand::new(ffprobe.to_path_buf());
        cmd.timeout(self.timeout);
        cmd.args(["-v", "quiet", "-show_streams", "-select_streams", selector]);
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd
            .execute()
            .await
            .map_err(|e| Error::probe_failed(path, format!("{FFPROBE} {e}")))?;

        parse_stream_section(&output.stdout)
            .map_err(|message| Error::probe_failed(path, message))
    }

    async fn probe_async(&self, path: &Path) -> vf_core::Result<VideoMetadata> {
        // The decoder is needed later; fail now rather than on the first frame.
        self.tools.require_all()?;
        let ffprobe = self.tools.require(FFPROBE)?;

        let video = self.probe_stream(ffprobe, path, "v:0").await?;
        if video.is_empty() {
            return Err(Error::NoVideoStream {
                path: path.to_path_buf(),
            });
        }
        let audio = self.probe_stream(ffprobe, path, "a:0").await?;

        let metadata = VideoMetadata::from_streams(path, &video, &audio)?;
        tracing::debug!(
            "Probed {}: {}x{} {} @ {:.3} fps, {} frames",
            path.display(),
            metadata.width(),
            metadata.height(),
            metadata.codec(),
            metadata.fps(),
            metadata.frames()
        );
        Ok(metadata)
    }
}

impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    fn probe(&self, path: &Path) -> vf_core::Result<VideoMetadata> {
        if !path.is_file() {
            return Err(Error::not_found(path));
        }
        block_on(path, self.probe_async(path))
    }
}

/// Drive an async probe to completion from synchronous code.
///
/// Inside a multi-threaded runtime the current worker is handed off with
/// `block_in_place`; a current-thread runtime cannot block, so the probe runs
/// on a helper thread with its own runtime. Without any runtime a temporary
/// one is created.
fn block_on<F>(path: &Path, fut: F) -> vf_core::Result<VideoMetadata>
where
    F: std::future::Future<Output = vf_core::Result<VideoMetadata>> + Send,
{
    use tokio::runtime::{Builder, Handle, RuntimeFlavor};

    let runtime_error =
        |e: std::io::Error| Error::probe_failed(path, format!("failed to create tokio runtime: {e}"));

    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| handle.block_on(fut))
        }
        Ok(_) => std::thread::scope(|s| {
            s.spawn(|| {
                let rt = Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(runtime_error)?;
                rt.block_on(fut)
            })
            .join()
            .unwrap_or_else(|_| Err(Error::probe_failed(path, "probe thread panicked")))
        }),
        Err(_) => {
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(runtime_error)?;
            rt.block_on(fut)
        }
    }
}

/// Parse the first `[STREAM]` section of ffprobe's default writer output.
///
/// `N/A` values are dropped so the corresponding metadata field stays at its
/// zero value. Empty output (no matching stream) yields an empty mapping.
///
/// # Errors
///
/// Returns a message if a non-empty line is neither a section marker nor a
/// `key=value` pair.
pub fn parse_stream_section(output: &str) -> Result<StreamFields, String> {
    let mut fields = StreamFields::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Nested sections such as [SIDE_DATA] stay part of the stream.
        if line.starts_with('[') {
            if line == "[/STREAM]" && !fields.is_empty() {
                break;
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("unexpected line in ffprobe output: {line:?}"));
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(format!("empty key in ffprobe output: {line:?}"));
        }
        if value == "N/A" {
            continue;
        }
        fields.insert(key.to_string(), value.to_string());
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIDEO_OUTPUT: &str = "\
[STREAM]
index=0
codec_name=h264
codec_type=video
width=1280
height=720
r_frame_rate=30000/1001
duration=10.010000
bit_rate=N/A
nb_frames=300
DISPOSITION:default=1
TAG:language=und
[/STREAM]
";

    #[test]
    fn parses_first_stream_section() {
        let fields = parse_stream_section(VIDEO_OUTPUT).unwrap();
        assert_eq!(fields.get("codec_name").map(String::as_str), Some("h264"));
        assert_eq!(fields.get("width").map(String::as_str), Some("1280"));
        assert_eq!(fields.get("nb_frames").map(String::as_str), Some("300"));
        assert_eq!(
            fields.get("TAG:language").map(String::as_str),
            Some("und")
        );
        assert!(!fields.contains_key("bit_rate"));
    }

    #[test]
    fn parsed_fields_build_metadata() {
        let video = parse_stream_section(VIDEO_OUTPUT).unwrap();
        let meta =
            VideoMetadata::from_streams("clip.mp4", &video, &StreamFields::new()).unwrap();
        assert_eq!(meta.frame_size(), 1280 * 720 * 3);
        assert!((meta.fps() - 29.97).abs() < 0.01);
        assert_eq!(meta.bitrate(), 0);
    }

    #[test]
    fn stops_after_first_section() {
        let output = "[STREAM]\ncodec_name=aac\n[/STREAM]\n[STREAM]\ncodec_name=opus\n[/STREAM]\n";
        let fields = parse_stream_section(output).unwrap();
        assert_eq!(fields.get("codec_name").map(String::as_str), Some("aac"));
    }

    #[test]
    fn side_data_does_not_end_stream() {
        let output = "[STREAM]\nwidth=640\n[SIDE_DATA]\nside_data_type=Display Matrix\n[/SIDE_DATA]\nheight=360\n[/STREAM]\n";
        let fields = parse_stream_section(output).unwrap();
        assert_eq!(fields.get("height").map(String::as_str), Some("360"));
    }

    #[test]
    fn empty_output_is_empty_mapping() {
        assert!(parse_stream_section("").unwrap().is_empty());
        assert!(parse_stream_section("\n\n").unwrap().is_empty());
    }

    #[test]
    fn garbage_output_is_rejected() {
        let err = parse_stream_section("[STREAM]\nthis is not a field\n").unwrap_err();
        assert!(err.contains("unexpected line"));
    }

    #[test]
    fn value_may_contain_equals() {
        let fields = parse_stream_section("TAG:comment=a=b\n").unwrap();
        assert_eq!(fields.get("TAG:comment").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn missing_file_fails_before_any_subprocess() {
        // An empty registry would report ToolMissing if a tool were consulted.
        let prober = FfprobeProber::new(ToolRegistry::default(), &DecoderConfig::default());
        let err = prober
            .probe(Path::new("/nonexistent/dir/video_xyz_12345.mp4"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn missing_tools_reported_for_existing_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let prober = FfprobeProber::new(ToolRegistry::default(), &DecoderConfig::default());
        let err = prober.probe(file.path()).unwrap_err();
        assert!(matches!(err, Error::ToolMissing { .. }));
    }

    #[tokio::test]
    async fn probe_from_current_thread_runtime() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let prober = FfprobeProber::new(ToolRegistry::default(), &DecoderConfig::default());
        let err = prober.probe(file.path()).unwrap_err();
        assert!(matches!(err, Error::ToolMissing { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_from_multi_thread_runtime() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let prober = FfprobeProber::new(ToolRegistry::default(), &DecoderConfig::default());
        let err = prober.probe(file.path()).unwrap_err();
        assert!(matches!(err, Error::ToolMissing { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn probe_from_spawned_worker_task() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_path_buf();
        let err = tokio::spawn(async move {
            let prober = FfprobeProber::new(ToolRegistry::default(), &DecoderConfig::default());
            prober.probe(&path).unwrap_err()
        })
        .await
        .unwrap();
        assert!(matches!(err, Error::ToolMissing { .. }));
    }

    #[test]
    fn non_video_file_fails_probe() {
        let tools = ToolRegistry::discover(&Default::default());
        if tools.require_all().is_err() {
            return;
        }
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"definitely not a video").unwrap();
        let prober = FfprobeProber::new(tools, &DecoderConfig::default());
        let err = prober.probe(file.path()).unwrap_err();
        assert!(
            matches!(err, Error::ProbeFailed { .. } | Error::NoVideoStream { .. }),
            "unexpected error: {err}"
        );
    }
}
