//! Pull-based raw frame source.
//!
//! A [`FrameSource`] owns one decode session: the probed metadata, a frame
//! buffer of exactly `width * height * depth` bytes, and (once running) the
//! decoder stream. The decoder is started lazily on the first pull and the
//! source moves through three states:
//!
//! ```text
//! Uninitialized --first pull--> Running --end of stream / close--> Closed
//! ```
//!
//! `Closed` is terminal. A session that should play again is replaced by a
//! fresh source via [`FrameSource::reset`], which keeps the metadata and the
//! already allocated buffer.

use std::io::{self, Read};
use std::sync::Arc;

use vf_core::{Error, VideoMetadata};

use crate::cancel::{CancelScope, WatchGuard};
use crate::decoder::{DecodeStream, DecoderLauncher, FfmpegLauncher};

/// Externally visible lifecycle state of a [`FrameSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// No decoder has been started.
    Uninitialized,
    /// The decoder is running and its output is open.
    Running,
    /// The decoder has been released. Terminal.
    Closed,
}

/// Allocation guard for the frame buffer.
///
/// The buffer is allocated at most once per source and never reallocated,
/// so a caller that supplied its own buffer keeps receiving frames in it.
#[derive(Debug, Default)]
enum FrameBuffer {
    #[default]
    Unallocated,
    Internal(Vec<u8>),
    Supplied(Vec<u8>),
}

impl FrameBuffer {
    fn is_allocated(&self) -> bool {
        !matches!(self, FrameBuffer::Unallocated)
    }

    fn as_slice(&self) -> &[u8] {
        match self {
            FrameBuffer::Unallocated => &[],
            FrameBuffer::Internal(buf) | FrameBuffer::Supplied(buf) => buf,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            FrameBuffer::Unallocated => &mut [],
            FrameBuffer::Internal(buf) | FrameBuffer::Supplied(buf) => buf,
        }
    }

    fn into_vec(self) -> Option<Vec<u8>> {
        match self {
            FrameBuffer::Unallocated => None,
            FrameBuffer::Internal(buf) | FrameBuffer::Supplied(buf) => Some(buf),
        }
    }
}

/// The decoder stream and its interrupt watcher, released together.
struct Running<S> {
    stream: S,
    watch: Option<WatchGuard>,
}

enum Session<S> {
    Uninitialized,
    Running(Running<S>),
    Closed,
}

/// Result of filling one frame from the stream.
enum Fill {
    Frame,
    EndOfStream { partial: usize },
    Failed(io::Error),
}

/// Read exactly `buf.len()` bytes, accumulating across short reads.
fn fill_frame(stream: &mut impl Read, buf: &mut [u8]) -> Fill {
    let mut total = 0;
    while total < buf.len() {
        match stream.read(&mut buf[total..]) {
            Ok(0) => return Fill::EndOfStream { partial: total },
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Fill::Failed(e),
        }
    }
    Fill::Frame
}

/// Streams decoded frames of one video into a reusable buffer.
///
/// Not safe for concurrent use: exactly one caller drives
/// [`next_frame`](Self::next_frame) and [`close`](Self::close).
pub struct FrameSource<L: DecoderLauncher = FfmpegLauncher> {
    metadata: Arc<VideoMetadata>,
    launcher: Arc<L>,
    scope: Option<CancelScope>,
    buffer: FrameBuffer,
    session: Session<L::Stream>,
    frames_read: u64,
}

impl<L: DecoderLauncher> FrameSource<L> {
    /// Create an uninitialized source. No process is started until the
    /// first pull.
    pub fn new(metadata: Arc<VideoMetadata>, launcher: Arc<L>) -> Self {
        Self {
            metadata,
            launcher,
            scope: None,
            buffer: FrameBuffer::Unallocated,
            session: Session::Uninitialized,
            frames_read: 0,
        }
    }

    /// Builder: terminate the decoder when `scope` is cancelled.
    pub fn with_scope(mut self, scope: CancelScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn state(&self) -> SourceState {
        match self.session {
            Session::Uninitialized => SourceState::Uninitialized,
            Session::Running(_) => SourceState::Running,
            Session::Closed => SourceState::Closed,
        }
    }

    /// Bytes in one frame.
    pub fn frame_size(&self) -> usize {
        self.metadata.frame_size()
    }

    /// Number of frames delivered so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Whether the frame buffer has been allocated or supplied.
    pub fn has_frame_buffer(&self) -> bool {
        self.buffer.is_allocated()
    }

    /// The most recently delivered frame: packed RGB, row-major, top row
    /// first. Empty until the buffer exists.
    ///
    /// The contents are overwritten by the next pull.
    pub fn frame(&self) -> &[u8] {
        let buf = self.buffer.as_slice();
        &buf[..buf.len().min(self.frame_size())]
    }

    /// Receive frames into `buffer` instead of an internal allocation.
    ///
    /// Supply the buffer before the first pull to avoid allocating twice.
    /// Bytes past the frame size are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::BufferTooSmall`] if `buffer` cannot hold one frame;
    /// the current buffer is kept.
    pub fn set_frame_buffer(&mut self, buffer: Vec<u8>) -> vf_core::Result<()> {
        let required = self.frame_size();
        if buffer.len() < required {
            return Err(Error::BufferTooSmall {
                required,
                actual: buffer.len(),
            });
        }
        self.buffer = FrameBuffer::Supplied(buffer);
        Ok(())
    }

    /// Close the source and hand back its frame buffer, if one exists.
    pub fn into_frame_buffer(mut self) -> Option<Vec<u8>> {
        self.close();
        std::mem::take(&mut self.buffer).into_vec()
    }

    /// Pull the next frame into the buffer.
    ///
    /// Returns `false` when no frame was delivered: the video ended, the
    /// decoder could not be started, the stream failed, or the source is
    /// closed. Use [`try_next_frame`](Self::try_next_frame) to tell these
    /// apart.
    pub fn next_frame(&mut self) -> bool {
        match self.try_next_frame() {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!("{}: {e}", self.metadata.path().display());
                false
            }
        }
    }

    /// Pull the next frame, reporting why none was delivered.
    ///
    /// - `Ok(true)`: the buffer holds a new frame.
    /// - `Ok(false)`: end of video (or the source was already closed). A
    ///   trailing partial frame is discarded.
    /// - `Err(LaunchFailed)`: the decoder could not be started; the source
    ///   stays uninitialized.
    /// - `Err(StreamError)`: the stream broke mid-read; the source is closed.
    ///
    /// Blocks until a full frame, end of stream or an error.
    pub fn try_next_frame(&mut self) -> vf_core::Result<bool> {
        if matches!(self.session, Session::Uninitialized) {
            self.start_decoding()?;
        }

        let frame_size = self.frame_size();
        let Session::Running(running) = &mut self.session else {
            return Ok(false);
        };
        let buf = &mut self.buffer.as_mut_slice()[..frame_size];

        match fill_frame(&mut running.stream, buf) {
            Fill::Frame => {
                self.frames_read += 1;
                Ok(true)
            }
            Fill::EndOfStream { partial } => {
                if partial > 0 {
                    tracing::warn!(
                        "{}: discarding truncated final frame ({partial} of {frame_size} bytes)",
                        self.metadata.path().display()
                    );
                }
                tracing::debug!(
                    "{}: end of stream after {} frames",
                    self.metadata.path().display(),
                    self.frames_read
                );
                self.close();
                Ok(false)
            }
            Fill::Failed(e) => {
                self.close();
                Err(Error::stream(format!(
                    "read failed after {} frames: {e}",
                    self.frames_read
                )))
            }
        }
    }

    /// Launch the decoder, arm the interrupt watcher and allocate the
    /// buffer if needed.
    fn start_decoding(&mut self) -> vf_core::Result<()> {
        let frame_size = self.frame_size();
        if frame_size == 0 {
            return Err(Error::launch_failed(format!(
                "{} has no usable frame dimensions",
                self.metadata.path().display()
            )));
        }
        if self.scope.as_ref().is_some_and(CancelScope::is_cancelled) {
            return Err(Error::launch_failed("session already cancelled"));
        }

        let stream = self.launcher.launch(&self.metadata)?;
        let watch = self.scope.as_ref().map(|scope| {
            scope.arm(
                stream.terminator(),
                self.metadata.path().display().to_string(),
            )
        });

        if !self.buffer.is_allocated() {
            self.buffer = FrameBuffer::Internal(vec![0; frame_size]);
        }

        self.session = Session::Running(Running { stream, watch });
        Ok(())
    }

    /// Release the stream and reap the decoder.
    ///
    /// Idempotent. A source that never started stays uninitialized; a
    /// running source becomes closed.
    pub fn close(&mut self) {
        if !matches!(self.session, Session::Running(_)) {
            return;
        }
        if let Session::Running(mut running) = std::mem::replace(&mut self.session, Session::Closed)
        {
            if let Some(watch) = running.watch.take() {
                watch.disarm();
            }
            if let Err(e) = running.stream.close() {
                tracing::warn!(
                    "{}: failed to close decoder: {e}",
                    self.metadata.path().display()
                );
            }
        }
    }

    /// Replace this source with a fresh one positioned at the first frame.
    ///
    /// The current decoder (if any) is closed. The fresh source shares the
    /// metadata, launcher and scope, and inherits the frame buffer so
    /// references to a supplied buffer stay valid.
    pub fn reset(&mut self) {
        self.close();
        let fresh = FrameSource {
            metadata: Arc::clone(&self.metadata),
            launcher: Arc::clone(&self.launcher),
            scope: self.scope.clone(),
            buffer: std::mem::take(&mut self.buffer),
            session: Session::Uninitialized,
            frames_read: 0,
        };
        *self = fresh;
    }
}

impl<L: DecoderLauncher> Drop for FrameSource<L> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<L: DecoderLauncher> std::fmt::Debug for FrameSource<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSource")
            .field("path", &self.metadata.path())
            .field("frame_size", &self.frame_size())
            .field("state", &self.state())
            .field("frames_read", &self.frames_read)
            .finish_non_exhaustive()
    }
}
