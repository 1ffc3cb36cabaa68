//! The acquire → encode → assemble → publish loop.
//!
//! Each [`FrameLoop::step`] runs one frame through
//!
//! ```ignore
//! WaitingForFrame -> Locked (copy) -> Encoding -> Publishing | Skipping
//! ```
//!
//! and the loop ends when the shared buffer goes away or the publisher stops running.
//! Per-frame failures skip that frame and never end the loop.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::{
    Config, Error,
    assembler::PacketAssembler,
    codec::{CodecEngine, Encoder},
    frame::Frame,
    publish::{OutputFrame, Publisher},
    source::{FrameSource, SharedBuffer},
};

/// Why the loop ended. Both are clean shutdowns.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shutdown {
    SourceTerminated,
    ChannelTerminated,
}

/// Why a frame was not published.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Skip {
    /// The shared buffer did not hold a full frame.
    Copy,
    /// The codec failed or its output did not fit the output buffer.
    Encode,
    /// The codec produced no frame data.
    Empty,
    Publish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Published { index: u64, len: usize },
    Skipped(Skip),
    Finished(Shutdown),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub published: u64,
    pub skipped: u64,
}

pub struct FrameLoop<'a, B, E, P> {
    config: &'a Config,
    source: FrameSource<B>,
    encoder: Encoder<E>,
    assembler: PacketAssembler,
    publisher: P,
    frame: Frame,
    frame_counter: u64,
    skipped: u64,
}

impl<'a, B: SharedBuffer, E: CodecEngine, P: Publisher> FrameLoop<'a, B, E, P> {
    pub fn new(config: &'a Config, buffer: B, encoder: Encoder<E>, publisher: P) -> Self {
        Self {
            config,
            source: FrameSource::new(buffer),
            encoder,
            assembler: PacketAssembler::new(config.output_capacity),
            publisher,
            frame: Frame::new(config.width, config.height),
            frame_counter: 0,
            skipped: 0,
        }
    }

    pub fn source(&self) -> &FrameSource<B> {
        &self.source
    }

    pub fn encoder(&self) -> &Encoder<E> {
        &self.encoder
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Frames published so far, which is also the index of the next frame.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn stats(&self) -> Stats {
        Stats {
            published: self.frame_counter,
            skipped: self.skipped,
        }
    }

    /// Runs until the source or the channel goes away.
    pub fn run(&mut self) -> Result<Shutdown, Error> {
        loop {
            if let Step::Finished(shutdown) = self.step()? {
                return Ok(shutdown);
            }
        }
    }

    /// Runs one iteration of the loop.
    pub fn step(&mut self) -> Result<Step, Error> {
        if !self.source.valid() {
            return Ok(Step::Finished(Shutdown::SourceTerminated));
        }
        if !self.publisher.is_running() {
            return Ok(Step::Finished(Shutdown::ChannelTerminated));
        }

        let Some(received) = self.source.wait_for_frame()? else {
            return Ok(Step::Finished(Shutdown::SourceTerminated));
        };

        let frame = &mut self.frame;
        let (copied, sample_time) = self
            .source
            .with_lock(received, |data, sample_time| {
                (frame.copy_from(data), sample_time)
            })?;
        if let Err(err) = copied {
            warn!(%err, "skipping frame");
            return Ok(self.skip(Skip::Copy));
        }

        let index = self.frame_counter;
        let before = self.config.verbose.then(Instant::now);
        let packets = match self.encoder.encode(&self.frame, index) {
            Ok(packets) => packets,
            Err(err) => {
                warn!(%err, index, "dropping frame");
                return Ok(self.skip(Skip::Encode));
            }
        };
        let encode_time = before.map(|before| before.elapsed());

        let len = match self.assembler.assemble(packets).map(|data| data.len()) {
            Ok(0) => {
                debug!(index, "codec produced no frame data");
                return Ok(self.skip(Skip::Empty));
            }
            Ok(len) => len,
            Err(err) => {
                warn!(%err, index, "dropping frame");
                return Ok(self.skip(Skip::Encode));
            }
        };

        let output = OutputFrame {
            fourcc: self.config.codec.fourcc(),
            width: self.config.width,
            height: self.config.height,
            data: self.assembler.as_bytes().to_vec(),
            sample_time,
            sender_id: self.config.sender_id,
        };
        if let Err(err) = self.publisher.publish(output) {
            warn!(%err, index, "failed to publish frame");
            return Ok(self.skip(Skip::Publish));
        }
        self.frame_counter += 1;

        if let Some(encode_time) = encode_time {
            info!(
                index,
                bytes = len,
                sample_time_us = sample_time.as_micros(),
                encode_us = encode_time.as_micros() as u64,
                "encoded frame"
            );
        }
        Ok(Step::Published { index, len })
    }

    fn skip(&mut self, reason: Skip) -> Step {
        self.skipped += 1;
        Step::Skipped(reason)
    }
}
