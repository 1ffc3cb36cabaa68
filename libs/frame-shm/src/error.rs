use std::io;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("io {0}")]
    Io(#[from] io::Error),
    #[error("invalid shared memory name {0:?}")]
    InvalidName(String),
    #[error("shared memory segment is too small ({len} bytes)")]
    TooSmall { len: u64 },
    #[error("shared memory segment has no frame-shm header")]
    BadMagic,
    #[error("unsupported frame-shm header version {0}")]
    UnsupportedVersion(u32),
    #[error("{op} failed: {source}")]
    Sync {
        op: &'static str,
        source: io::Error,
    },
    #[error("frame of {len} bytes does not fit a {capacity} byte segment")]
    FrameTooLarge { len: usize, capacity: usize },
}
