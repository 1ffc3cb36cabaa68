// Stand-in engine for builds without a codec backend

use super::{CodecEngine, EncodedPacket};
use crate::{Config, EncodeError, EncoderInitError, frame::Frame};

#[derive(Debug)]
pub struct UnsupportedEngine;

impl CodecEngine for UnsupportedEngine {
    fn open(config: &Config) -> Result<Self, EncoderInitError> {
        Err(EncoderInitError::Unsupported(config.codec.name()))
    }

    fn name(&self) -> &str {
        "unsupported"
    }

    fn encode(
        &mut self,
        _frame: &Frame,
        _pts: i64,
        _force_keyframe: bool,
    ) -> Result<Vec<EncodedPacket>, EncodeError> {
        Err(EncodeError::Codec("no codec backend".to_string()))
    }
}
