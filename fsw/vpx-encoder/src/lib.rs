//! VP8/VP9 encoder stage.
//!
//! Frames are read from a named shared memory segment written by a capture process,
//! compressed with libvpx and published as image readings on the conference bus. See
//! [`pipeline::FrameLoop`] for the per-frame flow.

pub mod assembler;
pub mod cli;
pub mod codec;
pub mod config;
mod error;
pub mod frame;
pub mod pipeline;
pub mod publish;
pub mod source;

pub use config::{Codec, Config, EndUsage, FourCc, KeyframeMode, Options};
pub use error::*;
pub use frame_shm::Timestamp;
