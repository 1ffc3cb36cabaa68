use std::path::PathBuf;

use clap::Parser;

use crate::{ConfigError, Options};

/// Encodes I420 frames from shared memory to VP8/VP9 and publishes them as image readings
#[derive(Parser, Debug, Default)]
#[clap(author, version, about)]
pub struct Args {
    /// TOML file with default option values; command line options take precedence
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Conference id of the bus to publish to
    #[clap(long)]
    pub cid: Option<String>,

    /// Name of the shared memory area with the I420 frames
    #[clap(long)]
    pub name: Option<String>,

    #[clap(long)]
    pub width: Option<String>,

    #[clap(long)]
    pub height: Option<String>,

    /// Encode with VP8
    #[clap(long)]
    pub vp8: bool,

    /// Encode with VP9
    #[clap(long)]
    pub vp9: bool,

    /// Target bitrate in bits per second, clamped to 50000..=5000000
    #[clap(long)]
    pub bitrate: Option<String>,

    /// Keyframe interval in frames
    #[clap(long)]
    pub gop: Option<String>,

    /// Sender id stamped on published messages
    #[clap(long)]
    pub id: Option<String>,

    /// Log one line per published frame
    #[clap(long)]
    pub verbose: bool,

    #[clap(long)]
    pub threads: Option<String>,

    #[clap(long)]
    pub profile: Option<String>,

    #[clap(long)]
    pub lag_in_frames: Option<String>,

    /// Drop frames when the buffer falls below this percentage of the optimal level
    #[clap(long)]
    pub drop_frame: Option<String>,

    #[clap(long)]
    pub resize_allowed: bool,

    #[clap(long)]
    pub resize_up: Option<String>,

    #[clap(long)]
    pub resize_down: Option<String>,

    /// 0 for constant bitrate, 1 for variable bitrate
    #[clap(long)]
    pub end_usage: Option<String>,

    #[clap(long)]
    pub min_q: Option<String>,

    #[clap(long)]
    pub max_q: Option<String>,

    #[clap(long)]
    pub undershoot_pct: Option<String>,

    #[clap(long)]
    pub overshoot_pct: Option<String>,

    /// Decoder buffer size in ms
    #[clap(long)]
    pub buffer_size: Option<String>,

    /// Initial decoder buffer level in ms
    #[clap(long)]
    pub buffer_init_size: Option<String>,

    /// Optimal decoder buffer level in ms
    #[clap(long)]
    pub buffer_optimal_size: Option<String>,

    /// 0 for automatic keyframe placement, 1 to disable it
    #[clap(long)]
    pub kf_mode: Option<String>,

    #[clap(long)]
    pub kf_min_dist: Option<String>,

    #[clap(long)]
    pub kf_max_dist: Option<String>,

    /// Encoder speed, higher is faster
    #[clap(long)]
    pub cpu_used: Option<String>,

    /// Nominal frame rate used for the codec time base
    #[clap(long)]
    pub fps: Option<String>,

    /// Largest encoded frame in bytes, defaults to width * height
    #[clap(long)]
    pub output_capacity: Option<String>,
}

impl Args {
    /// Options given on the command line, without the config file.
    pub fn cli_options(&self) -> Options {
        let values = [
            ("cid", &self.cid),
            ("name", &self.name),
            ("width", &self.width),
            ("height", &self.height),
            ("bitrate", &self.bitrate),
            ("gop", &self.gop),
            ("id", &self.id),
            ("threads", &self.threads),
            ("profile", &self.profile),
            ("lag-in-frames", &self.lag_in_frames),
            ("drop-frame", &self.drop_frame),
            ("resize-up", &self.resize_up),
            ("resize-down", &self.resize_down),
            ("end-usage", &self.end_usage),
            ("min-q", &self.min_q),
            ("max-q", &self.max_q),
            ("undershoot-pct", &self.undershoot_pct),
            ("overshoot-pct", &self.overshoot_pct),
            ("buffer-size", &self.buffer_size),
            ("buffer-init-size", &self.buffer_init_size),
            ("buffer-optimal-size", &self.buffer_optimal_size),
            ("kf-mode", &self.kf_mode),
            ("kf-min-dist", &self.kf_min_dist),
            ("kf-max-dist", &self.kf_max_dist),
            ("cpu-used", &self.cpu_used),
            ("fps", &self.fps),
            ("output-capacity", &self.output_capacity),
        ];
        let flags = [
            ("vp8", self.vp8),
            ("vp9", self.vp9),
            ("verbose", self.verbose),
            ("resize-allowed", self.resize_allowed),
        ];

        let mut options = Options::new();
        for (name, value) in values {
            if let Some(value) = value {
                options.set(name, value.as_str());
            }
        }
        for (name, set) in flags {
            if set {
                options.set_flag(name);
            }
        }
        options
    }

    /// The config file, if any, with the command line layered on top. A codec flag on
    /// the command line replaces the file's codec choice.
    pub fn options(&self) -> Result<Options, ConfigError> {
        let mut file = match &self.config {
            Some(path) => Options::from_toml_file(path)?,
            None => Options::new(),
        };
        let cli = self.cli_options();
        if cli.is_set("vp8") || cli.is_set("vp9") {
            file.remove("vp8");
            file.remove("vp9");
        }
        Ok(file.overlay(cli))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::{Codec, Config};

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "vpx-encoder",
            "--cid",
            "111",
            "--name",
            "video0",
            "--width",
            "640",
            "--height",
            "480",
            "--vp9",
            "--min-q",
            "10",
            "--verbose",
        ])
        .unwrap();
        let options = args.options().unwrap();
        assert_eq!(options.get("cid"), Some("111"));
        assert_eq!(options.get("min-q"), Some("10"));
        assert!(options.is_set("vp9"));
        assert!(options.is_set("verbose"));
        assert!(!options.is_set("vp8"));
        assert!(!options.is_set("bitrate"));

        let config = Config::resolve(&options).unwrap();
        assert_eq!(config.codec, Codec::Vp9);
        assert_eq!(config.endpoint, 111);
        assert_eq!(config.rate.min_quantizer, 10);
    }

    #[test]
    fn test_empty_value_is_absent() {
        let args = Args::try_parse_from(["vpx-encoder", "--gop", ""]).unwrap();
        let options = args.options().unwrap();
        assert!(options.is_set("gop"));
        assert_eq!(options.get("gop"), None);
    }

    #[test]
    fn test_config_file_overlay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vp8 = true\ncid = 111\nname = \"video0\"\nwidth = 320\nheight = 240\nbitrate = 200000"
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let args =
            Args::try_parse_from(["vpx-encoder", "--config", &path, "--bitrate", "300000"])
                .unwrap();
        let config = Config::resolve(&args.options().unwrap()).unwrap();
        assert_eq!(config.codec, Codec::Vp8);
        assert_eq!(config.width, 320);
        assert_eq!(config.rate.target_bitrate, 300_000);
    }

    #[test]
    fn test_cli_codec_replaces_file_codec() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "vp8 = true\ncid = 111\nname = \"video0\"\nwidth = 320\nheight = 240"
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = Args::try_parse_from(["vpx-encoder", "--config", &path, "--vp9"]).unwrap();
        let config = Config::resolve(&args.options().unwrap()).unwrap();
        assert_eq!(config.codec, Codec::Vp9);

        let args = Args::try_parse_from(["vpx-encoder", "--config", &path]).unwrap();
        let config = Config::resolve(&args.options().unwrap()).unwrap();
        assert_eq!(config.codec, Codec::Vp8);
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args {
            config: Some("/nonexistent/vpx-encoder.toml".into()),
            ..Default::default()
        };
        assert!(matches!(
            args.options(),
            Err(ConfigError::ReadFile { .. })
        ));
    }
}
