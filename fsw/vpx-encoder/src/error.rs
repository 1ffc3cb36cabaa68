use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Attach(#[from] AttachError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    EncoderInit(#[from] EncoderInitError),
    #[error("shared memory {0}")]
    Source(#[from] frame_shm::Error),
    #[error(transparent)]
    Publish(#[from] PublishError),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("missing required option --{0}")]
    #[diagnostic(code(vpx_encoder::config::missing), help("run with --help for usage"))]
    Missing(&'static str),
    #[error("no codec selected")]
    #[diagnostic(code(vpx_encoder::config::codec), help("pass exactly one of --vp8 or --vp9"))]
    MissingCodec,
    #[error("--vp8 and --vp9 are mutually exclusive")]
    #[diagnostic(code(vpx_encoder::config::codec), help("pass exactly one of --vp8 or --vp9"))]
    ConflictingCodecs,
    #[error("invalid value {value:?} for --{option}")]
    #[diagnostic(code(vpx_encoder::config::invalid))]
    InvalidNumber { option: &'static str, value: String },
    #[error("--{option} must be at least {min}, got {value}")]
    #[diagnostic(code(vpx_encoder::config::range))]
    TooSmall {
        option: &'static str,
        value: u64,
        min: u64,
    },
    #[error("--min-q ({min}) is larger than --max-q ({max})")]
    #[diagnostic(code(vpx_encoder::config::range))]
    QuantizerOrder { min: u32, max: u32 },
    #[error("failed to read config file {path:?}: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("toml parsing failed")]
    Toml(#[from] toml::de::Error),
    #[error("config file value for {0:?} must be a string, integer or boolean")]
    UnsupportedValue(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum AttachError {
    #[error("failed to attach to shared memory '{name}'")]
    #[diagnostic(
        code(vpx_encoder::attach),
        help("is the producer running and publishing to this name?")
    )]
    Shm {
        name: String,
        #[source]
        source: frame_shm::Error,
    },
    #[error(
        "shared memory '{name}' holds {len} bytes but a {width}x{height} I420 frame needs {needed}"
    )]
    #[diagnostic(code(vpx_encoder::attach::geometry))]
    Geometry {
        name: String,
        len: usize,
        width: u32,
        height: u32,
        needed: usize,
    },
}

#[derive(Debug, Error, Diagnostic)]
pub enum EncoderInitError {
    #[error("no codec backend for {0} in this build")]
    #[diagnostic(
        code(vpx_encoder::codec::unsupported),
        help("rebuild vpx-encoder with the `ffmpeg` feature")
    )]
    Unsupported(&'static str),
    #[error("--{option} cannot be honoured by {backend}: {reason}")]
    #[diagnostic(
        code(vpx_encoder::codec::option),
        help("drop the option or leave it at its default")
    )]
    UnsupportedOption {
        option: &'static str,
        backend: &'static str,
        reason: &'static str,
    },
    #[error("failed to initialize encoder: {0}")]
    #[diagnostic(code(vpx_encoder::codec::init))]
    Codec(String),
}

/// Per-frame failure. The frame is dropped and the loop carries on.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode frame: {0}")]
    Codec(String),
    #[error("encoded frame of {len} bytes exceeds the {capacity} byte output buffer")]
    Overflow { len: usize, capacity: usize },
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("source holds {actual} bytes, frame needs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("io {0}")]
    Io(#[from] io::Error),
    #[error("postcard error {0}")]
    Postcard(#[from] postcard::Error),
    #[error("message of {len} bytes exceeds the {max} byte datagram limit")]
    TooLarge { len: usize, max: usize },
}

impl PublishError {
    pub fn is_channel_closed(&self) -> bool {
        match self {
            PublishError::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::AddrNotAvailable
            ),
            _ => false,
        }
    }
}
