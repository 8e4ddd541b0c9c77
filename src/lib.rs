//! vidframe - stream decoded RGB frames from video files.
//!
//! The heavy lifting lives in the workspace crates: [`vf_core`] for metadata,
//! errors and configuration, and [`vf_av`] for tool discovery, probing and
//! the [`FrameSource`] itself. This crate adds the application-level
//! pieces: a [`SessionRegistry`] of reusable sources, signal-driven
//! [`shutdown`], and [`logging`] setup.

pub mod logging;
pub mod session;
pub mod shutdown;

pub use session::{SessionKey, SessionRegistry};
pub use vf_av::{CancelScope, FrameSource, SourceState};
pub use vf_core::config::Config;
pub use vf_core::{Error, Result, VideoMetadata};
