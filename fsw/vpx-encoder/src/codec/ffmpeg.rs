use ffmpeg_next::{self as ffmpeg, Dictionary, Packet, format::Pixel, frame, picture};
use tracing::debug;

use super::{CodecEngine, EncodedPacket, PacketKind};
use crate::{
    Codec, Config, EncodeError, EncoderInitError, EndUsage, KeyframeMode,
    frame::{Frame, Plane},
};

/// libvpx through ffmpeg's `libvpx` / `libvpx-vp9` encoders.
pub struct FfmpegEngine {
    encoder: ffmpeg::encoder::video::Encoder,
    frame: frame::Video,
    packet: Packet,
    name: String,
}

impl CodecEngine for FfmpegEngine {
    fn open(config: &Config) -> Result<Self, EncoderInitError> {
        check_supported(config)?;
        ffmpeg::init().map_err(init_err)?;

        let codec_name = match config.codec {
            Codec::Vp8 => "libvpx",
            Codec::Vp9 => "libvpx-vp9",
        };
        let codec = ffmpeg::encoder::find_by_name(codec_name).ok_or_else(|| {
            EncoderInitError::Codec(format!("ffmpeg was built without {codec_name}"))
        })?;

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .map_err(init_err)?;
        encoder.set_width(config.width);
        encoder.set_height(config.height);
        encoder.set_format(Pixel::YUV420P);
        encoder.set_time_base((1, config.tuning.fps as i32));
        encoder.set_frame_rate(Some((config.tuning.fps as i32, 1)));
        encoder.set_bit_rate(config.rate.target_bitrate as usize);

        let opts = codec_options(config);
        debug!(codec = codec_name, "opening encoder");
        let encoder = encoder.open_with(opts).map_err(init_err)?;
        let name = format!("ffmpeg {codec_name}");

        Ok(Self {
            encoder,
            frame: frame::Video::new(Pixel::YUV420P, config.width, config.height),
            packet: Packet::empty(),
            name,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn encode(
        &mut self,
        frame: &Frame,
        pts: i64,
        force_keyframe: bool,
    ) -> Result<Vec<EncodedPacket>, EncodeError> {
        for (index, plane) in Plane::ALL.into_iter().enumerate() {
            let src = frame.plane(plane);
            let src_stride = frame.stride(plane);
            let dst_stride = self.frame.stride(index);
            let dst = self.frame.data_mut(index);
            for (row, src_row) in src.chunks_exact(src_stride).enumerate() {
                let start = row * dst_stride;
                dst[start..start + src_stride].copy_from_slice(src_row);
            }
        }
        self.frame.set_pts(Some(pts));
        self.frame.set_kind(if force_keyframe {
            picture::Type::I
        } else {
            picture::Type::None
        });

        self.encoder.send_frame(&self.frame).map_err(encode_err)?;

        let mut packets = vec![];
        loop {
            match self.encoder.receive_packet(&mut self.packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other {
                    errno: ffmpeg::util::error::EAGAIN,
                })
                | Err(ffmpeg::Error::Eof) => break,
                Err(err) => return Err(encode_err(err)),
            }
            let packet = match self.packet.data() {
                Some(data) if !data.is_empty() => {
                    EncodedPacket::frame(data.to_vec(), self.packet.is_key())
                }
                _ => EncodedPacket {
                    kind: PacketKind::Other,
                    data: vec![],
                    keyframe: false,
                },
            };
            packets.push(packet);
        }
        Ok(packets)
    }
}

const BACKEND: &str = "ffmpeg's libvpx wrapper";

/// Rejects settings that libvpxenc has no way to pass through to libvpx.
fn check_supported(config: &Config) -> Result<(), EncoderInitError> {
    let unsupported = |option, reason| {
        Err(EncoderInitError::UnsupportedOption {
            option,
            backend: BACKEND,
            reason,
        })
    };
    let tuning = &config.tuning;
    let keyframes = &config.keyframes;

    if tuning.resize_allowed {
        return unsupported("resize-allowed", "spatial resampling is not exposed");
    }
    if tuning.resize_up != 0 {
        return unsupported("resize-up", "spatial resampling is not exposed");
    }
    if tuning.resize_down != 0 {
        return unsupported("resize-down", "spatial resampling is not exposed");
    }
    if keyframes.mode == KeyframeMode::Disabled {
        return unsupported("kf-mode", "automatic keyframe placement is always on");
    }
    if keyframes.min_dist != 0 && keyframes.min_dist != keyframes.max_dist {
        return unsupported(
            "kf-min-dist",
            "only 0 or a value equal to --kf-max-dist is forwarded",
        );
    }
    if config.rate.buffer_optimal_size as u64 != optimal_buffer_ms(config) {
        return unsupported(
            "buffer-optimal-size",
            "the optimal level is fixed at 5/6 of --buffer-size",
        );
    }
    Ok(())
}

/// ffmpeg takes the buffer model in bits and converts back to ms with the bitrate.
fn ms_to_bits(ms: u32, bitrate: u32) -> u64 {
    ms as u64 * bitrate as u64 / 1000
}

/// The optimal buffer level libvpxenc derives from the buffer size.
fn optimal_buffer_ms(config: &Config) -> u64 {
    let bitrate = config.rate.target_bitrate;
    let buffer_ms = ms_to_bits(config.rate.buffer_size, bitrate) * 1000 / bitrate as u64;
    buffer_ms * 5 / 6
}

/// Maps the rate control and keyframe settings onto ffmpeg's codec options.
fn codec_options(config: &Config) -> Dictionary<'static> {
    let rate = &config.rate;
    let tuning = &config.tuning;
    let keyframes = &config.keyframes;

    let mut opts = Dictionary::new();
    opts.set("deadline", "realtime");
    opts.set("cpu-used", &tuning.cpu_used.to_string());
    opts.set("threads", &tuning.threads.to_string());
    opts.set("profile", &tuning.profile.to_string());
    opts.set("lag-in-frames", &tuning.lag_in_frames.to_string());
    opts.set("drop-threshold", &tuning.drop_frame_threshold.to_string());

    opts.set("qmin", &rate.min_quantizer.to_string());
    opts.set("qmax", &rate.max_quantizer.to_string());
    opts.set("undershoot-pct", &rate.undershoot_pct.to_string());
    opts.set("overshoot-pct", &rate.overshoot_pct.to_string());
    let bitrate = rate.target_bitrate;
    opts.set("bufsize", &ms_to_bits(rate.buffer_size, bitrate).to_string());
    opts.set(
        "rc_init_occupancy",
        &ms_to_bits(rate.buffer_initial_size, bitrate).to_string(),
    );
    if rate.end_usage == EndUsage::Constant {
        // libvpxenc selects VPX_CBR when min and max rate equal the target
        let bitrate = rate.target_bitrate.to_string();
        opts.set("minrate", &bitrate);
        opts.set("maxrate", &bitrate);
    }

    let max_dist = keyframes.max_dist.min(i32::MAX as u32);
    opts.set("g", &max_dist.to_string());
    // libvpxenc only forwards keyint_min when it equals g
    if keyframes.min_dist != 0 {
        opts.set("keyint_min", &keyframes.min_dist.to_string());
    }
    opts
}

fn init_err(err: ffmpeg::Error) -> EncoderInitError {
    EncoderInitError::Codec(err.to_string())
}

fn encode_err(err: ffmpeg::Error) -> EncodeError {
    EncodeError::Codec(err.to_string())
}
