//! Codec engines and the keyframe cadence around them.
//!
//! A [`CodecEngine`] is the black box that turns I420 frames into VP8/VP9 bitstream
//! packets. [`Encoder`] owns one engine for the lifetime of the process and decides
//! which frames are forced to be keyframes.

#[cfg(not(feature = "ffmpeg"))]
mod dummy;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;

#[cfg(not(feature = "ffmpeg"))]
pub use dummy::UnsupportedEngine as DefaultEngine;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegEngine;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegEngine as DefaultEngine;

use crate::{Config, EncodeError, EncoderInitError, frame::Frame};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketKind {
    /// Compressed frame data that has to be forwarded.
    Frame,
    /// Rate control statistics and other codec internal output.
    Other,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    pub kind: PacketKind,
    pub data: Vec<u8>,
    pub keyframe: bool,
}

impl EncodedPacket {
    pub fn frame(data: impl Into<Vec<u8>>, keyframe: bool) -> Self {
        Self {
            kind: PacketKind::Frame,
            data: data.into(),
            keyframe,
        }
    }
}

/// A stateful frame compressor.
///
/// Engines release every codec resource when dropped.
pub trait CodecEngine {
    /// Builds an engine from a resolved configuration. Codec rejections are reported
    /// with the codec's own message.
    fn open(config: &Config) -> Result<Self, EncoderInitError>
    where
        Self: Sized;

    /// Human readable codec implementation name.
    fn name(&self) -> &str;

    /// Encodes one frame at presentation index `pts`. May yield any number of packets.
    fn encode(
        &mut self,
        frame: &Frame,
        pts: i64,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedPacket>, EncodeError>;
}

/// Whether frame `index` starts a new group of pictures.
pub fn is_keyframe(index: u64, gop: u32) -> bool {
    index % gop.max(1) as u64 == 0
}

/// Drives a [`CodecEngine`] with a fixed keyframe cadence.
pub struct Encoder<E> {
    engine: E,
    gop: u32,
}

impl<E: CodecEngine> Encoder<E> {
    pub fn open(config: &Config) -> Result<Self, EncoderInitError> {
        let engine = E::open(config)?;
        Ok(Self::new(engine, config.keyframes.gop))
    }

    pub fn new(engine: E, gop: u32) -> Self {
        Self { engine, gop }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn gop(&self) -> u32 {
        self.gop
    }

    /// Encodes `frame` as frame number `index`, forcing a keyframe at the start of
    /// every group of pictures.
    pub fn encode(&mut self, frame: &Frame, index: u64) -> Result<Vec<EncodedPacket>, EncodeError> {
        let force_keyframe = is_keyframe(index, self.gop);
        self.engine.encode(frame, index as i64, force_keyframe)
    }
}
