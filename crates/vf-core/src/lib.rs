//! vf-core: shared error type, configuration and video metadata.
//!
//! This crate is the foundational dependency for the other vf-* crates. It
//! holds no process or I/O machinery of its own; it only describes what a
//! probed video looks like and how failures are reported.

pub mod config;
pub mod error;
pub mod metadata;

pub use error::{Error, Result};
pub use metadata::{StreamFields, VideoMetadata, RGB_DEPTH};
