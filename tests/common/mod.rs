//! Shared test harness for integration tests.
//!
//! Provides a scripted decoder ([`ScriptedLauncher`]) that replays a byte
//! stream in fixed-size chunks, a prober that answers from a table, and a
//! helper that renders a real clip with ffmpeg when the tools are installed.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use vf_av::{DecodeStream, DecoderLauncher, Prober, Terminate, ToolRegistry};
use vf_core::{Error, VideoMetadata};

/// Counters shared between a launcher and every stream it starts.
#[derive(Default)]
pub struct StreamLog {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub terminated: AtomicBool,
}

impl Terminate for StreamLog {
    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Replays `data` at most `chunk` bytes per read.
pub struct ScriptedStream {
    data: Arc<Vec<u8>>,
    pos: usize,
    chunk: usize,
    log: Arc<StreamLog>,
}

impl Read for ScriptedStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl DecodeStream for ScriptedStream {
    fn terminator(&self) -> Arc<dyn Terminate> {
        self.log.clone()
    }

    fn close(&mut self) -> io::Result<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct ScriptedLauncher {
    pub data: Arc<Vec<u8>>,
    pub chunk: usize,
    pub log: Arc<StreamLog>,
}

impl ScriptedLauncher {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        Self {
            data: Arc::new(data),
            chunk,
            log: Arc::new(StreamLog::default()),
        }
    }
}

impl DecoderLauncher for ScriptedLauncher {
    type Stream = ScriptedStream;

    fn launch(&self, _metadata: &VideoMetadata) -> vf_core::Result<ScriptedStream> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedStream {
            data: Arc::clone(&self.data),
            pos: 0,
            chunk: self.chunk,
            log: Arc::clone(&self.log),
        })
    }
}

/// Answers probes from a fixed table of `path -> (width, height)`.
#[derive(Default)]
pub struct TableProber {
    pub entries: HashMap<PathBuf, (u32, u32)>,
    pub calls: AtomicUsize,
}

impl TableProber {
    pub fn with(mut self, path: &str, width: u32, height: u32) -> Self {
        self.entries.insert(PathBuf::from(path), (width, height));
        self
    }
}

impl Prober for TableProber {
    fn name(&self) -> &'static str {
        "table"
    }

    fn probe(&self, path: &Path) -> vf_core::Result<VideoMetadata> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = self.entries.get(path).ok_or_else(|| Error::not_found(path))?;
        Ok(VideoMetadata::with_dimensions(path, *w, *h))
    }
}

/// Deterministic byte pattern of `len` bytes.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 253) as u8).collect()
}

/// Discover ffmpeg/ffprobe, or `None` when either is missing.
pub fn real_tools() -> Option<ToolRegistry> {
    let tools = ToolRegistry::discover(&Default::default());
    tools.require_all().ok().map(|_| tools)
}

/// Render a short test-pattern clip with ffmpeg into `dir`.
pub fn render_clip(tools: &ToolRegistry, dir: &Path, width: u32, height: u32, frames: u32) -> PathBuf {
    let out = dir.join("clip.mkv");
    let status = Command::new(tools.require("ffmpeg").unwrap())
        .args(["-v", "quiet", "-y", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=size={width}x{height}:rate=25"))
        .args(["-frames:v", &frames.to_string(), "-c:v", "ffv1"])
        .arg(&out)
        .status()
        .expect("failed to run ffmpeg");
    assert!(status.success(), "ffmpeg could not render the test clip");
    out
}
