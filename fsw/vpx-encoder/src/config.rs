//! Resolution of the flat option map into an immutable [`Config`].
//!
//! Options arrive as `name -> optional value` pairs, from the command line and an
//! optional TOML file. [`Config::resolve`] is the only place that looks options up by
//! name; everything downstream takes a `&Config`.

use std::{collections::BTreeMap, fmt, path::Path, str::FromStr};

use crate::{ConfigError, frame::i420_len};

pub const BITRATE_MIN: u32 = 50_000;
pub const BITRATE_DEFAULT: u32 = 800_000;
pub const BITRATE_MAX: u32 = 5_000_000;
pub const GOP_DEFAULT: u32 = 10;
pub const THREADS_DEFAULT: u32 = 4;
pub const MIN_Q_DEFAULT: u32 = 4;
pub const QUANTIZER_MAX: u32 = 63;
pub const BUFFER_SIZE_DEFAULT: u32 = 6000;
pub const BUFFER_INIT_SIZE_DEFAULT: u32 = 4000;
pub const BUFFER_OPTIMAL_SIZE_DEFAULT: u32 = 5000;
pub const KF_MAX_DIST_DEFAULT: u32 = 99_999;
pub const CPU_USED_DEFAULT: i32 = 4;
pub const FPS_DEFAULT: u32 = 20;

/// Flat `name -> value` option map. A name mapped to `None` is a bare flag.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Options(BTreeMap<String, Option<String>>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), Some(value.into()));
    }

    pub fn set_flag(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), None);
    }

    pub fn remove(&mut self, name: &str) {
        self.0.remove(name);
    }

    /// Whether `name` was given at all, with or without a value.
    pub fn is_set(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// The value of `name`. Empty values count as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(name)
            .and_then(|v| v.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr>(&self, name: &'static str) -> Result<Option<T>, ConfigError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber {
                option: name,
                value: value.to_string(),
            })
    }

    /// Layers `other` on top of `self`; entries in `other` win.
    pub fn overlay(mut self, other: Options) -> Options {
        self.0.extend(other.0);
        self
    }

    /// Reads options from a TOML table such as
    ///
    /// ```toml
    /// vp9 = true
    /// width = 640
    /// name = "video0"
    /// ```
    ///
    /// `true` sets a flag, `false` leaves the option out.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = s.parse()?;
        let mut options = Options::new();
        for (name, value) in table {
            match value {
                toml::Value::String(s) => options.set(name, s),
                toml::Value::Integer(i) => options.set(name, i.to_string()),
                toml::Value::Boolean(true) => options.set_flag(name),
                toml::Value::Boolean(false) => {}
                _ => return Err(ConfigError::UnsupportedValue(name)),
            }
        }
        Ok(options)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&s)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, Option<V>)> for Options {
    fn from_iter<I: IntoIterator<Item = (K, Option<V>)>>(iter: I) -> Self {
        Options(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.map(Into::into)))
                .collect(),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Codec {
    Vp8,
    Vp9,
}

impl Codec {
    pub fn fourcc(self) -> FourCc {
        match self {
            Codec::Vp8 => FourCc(*b"VP80"),
            Codec::Vp9 => FourCc(*b"VP90"),
        }
    }

    pub fn default_max_quantizer(self) -> u32 {
        match self {
            Codec::Vp8 => 56,
            Codec::Vp9 => 52,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Codec::Vp8 => "VP8",
            Codec::Vp9 => "VP9",
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Four-character code naming a bitstream format.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc({})", self.as_str())
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndUsage {
    Constant,
    Variable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyframeMode {
    Auto,
    Disabled,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateControl {
    /// Bits per second.
    pub target_bitrate: u32,
    pub end_usage: EndUsage,
    pub min_quantizer: u32,
    pub max_quantizer: u32,
    pub undershoot_pct: u32,
    pub overshoot_pct: u32,
    /// Decoder buffer model sizes, in milliseconds.
    pub buffer_size: u32,
    pub buffer_initial_size: u32,
    pub buffer_optimal_size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Keyframes {
    /// Frames between forced keyframes.
    pub gop: u32,
    pub mode: KeyframeMode,
    pub min_dist: u32,
    pub max_dist: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tuning {
    pub threads: u32,
    pub profile: u32,
    pub lag_in_frames: u32,
    pub drop_frame_threshold: u32,
    pub resize_allowed: bool,
    pub resize_up: u32,
    pub resize_down: u32,
    pub cpu_used: i32,
    /// Encoder time base is `1/fps`.
    pub fps: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub codec: Codec,
    /// Bus conference id the frames are published to.
    pub endpoint: u16,
    /// Name of the shared memory segment to attach.
    pub buffer_name: String,
    pub width: u32,
    pub height: u32,
    pub rate: RateControl,
    pub keyframes: Keyframes,
    pub tuning: Tuning,
    pub sender_id: u32,
    pub verbose: bool,
    /// Upper bound on the assembled bitstream of one frame.
    pub output_capacity: usize,
}

impl Config {
    pub fn resolve(options: &Options) -> Result<Self, ConfigError> {
        let codec = match (options.is_set("vp8"), options.is_set("vp9")) {
            (true, false) => Codec::Vp8,
            (false, true) => Codec::Vp9,
            (true, true) => return Err(ConfigError::ConflictingCodecs),
            (false, false) => return Err(ConfigError::MissingCodec),
        };
        let endpoint = options
            .parse::<u16>("cid")?
            .ok_or(ConfigError::Missing("cid"))?;
        let buffer_name = options
            .get("name")
            .ok_or(ConfigError::Missing("name"))?
            .to_string();
        let width = at_least(options, "width", None, 1)?;
        let height = at_least(options, "height", None, 1)?;

        let target_bitrate = options
            .parse::<u64>("bitrate")?
            .map(|b| b.clamp(BITRATE_MIN as u64, BITRATE_MAX as u64) as u32)
            .unwrap_or(BITRATE_DEFAULT);
        let end_usage = match options.parse::<u32>("end-usage")?.unwrap_or(0) {
            0 => EndUsage::Constant,
            _ => EndUsage::Variable,
        };
        let min_quantizer = options
            .parse::<u32>("min-q")?
            .unwrap_or(MIN_Q_DEFAULT)
            .min(QUANTIZER_MAX);
        let max_quantizer = options
            .parse::<u32>("max-q")?
            .unwrap_or(codec.default_max_quantizer())
            .min(QUANTIZER_MAX);
        if min_quantizer > max_quantizer {
            return Err(ConfigError::QuantizerOrder {
                min: min_quantizer,
                max: max_quantizer,
            });
        }
        let rate = RateControl {
            target_bitrate,
            end_usage,
            min_quantizer,
            max_quantizer,
            undershoot_pct: options.parse("undershoot-pct")?.unwrap_or(0),
            overshoot_pct: options.parse("overshoot-pct")?.unwrap_or(0),
            buffer_size: options
                .parse("buffer-size")?
                .unwrap_or(BUFFER_SIZE_DEFAULT),
            buffer_initial_size: options
                .parse("buffer-init-size")?
                .unwrap_or(BUFFER_INIT_SIZE_DEFAULT),
            buffer_optimal_size: options
                .parse("buffer-optimal-size")?
                .unwrap_or(BUFFER_OPTIMAL_SIZE_DEFAULT),
        };

        let keyframes = Keyframes {
            gop: at_least(options, "gop", Some(GOP_DEFAULT), 1)?,
            mode: match options.parse::<u32>("kf-mode")?.unwrap_or(0) {
                1 => KeyframeMode::Disabled,
                _ => KeyframeMode::Auto,
            },
            min_dist: options.parse("kf-min-dist")?.unwrap_or(0),
            max_dist: options
                .parse("kf-max-dist")?
                .unwrap_or(KF_MAX_DIST_DEFAULT),
        };

        let tuning = Tuning {
            threads: options.parse("threads")?.unwrap_or(THREADS_DEFAULT),
            profile: options.parse("profile")?.unwrap_or(0),
            lag_in_frames: options.parse("lag-in-frames")?.unwrap_or(0),
            drop_frame_threshold: options.parse("drop-frame")?.unwrap_or(0),
            resize_allowed: options.is_set("resize-allowed"),
            resize_up: options.parse("resize-up")?.unwrap_or(0),
            resize_down: options.parse("resize-down")?.unwrap_or(0),
            cpu_used: options.parse("cpu-used")?.unwrap_or(CPU_USED_DEFAULT),
            fps: at_least(options, "fps", Some(FPS_DEFAULT), 1)?,
        };

        let output_capacity = match options.parse::<u64>("output-capacity")? {
            Some(0) => {
                return Err(ConfigError::TooSmall {
                    option: "output-capacity",
                    value: 0,
                    min: 1,
                });
            }
            Some(capacity) => capacity as usize,
            None => width as usize * height as usize,
        };

        Ok(Config {
            codec,
            endpoint,
            buffer_name,
            width,
            height,
            rate,
            keyframes,
            tuning,
            sender_id: options.parse("id")?.unwrap_or(0),
            verbose: options.is_set("verbose"),
            output_capacity,
        })
    }

    /// Bytes in one I420 frame of the configured geometry.
    pub fn frame_len(&self) -> usize {
        i420_len(self.width, self.height)
    }
}

/// Parses a `u32` option that must be at least `min`. Without a default the option
/// is required.
fn at_least(
    options: &Options,
    name: &'static str,
    default: Option<u32>,
    min: u32,
) -> Result<u32, ConfigError> {
    let value = match (options.parse::<u32>(name)?, default) {
        (Some(value), _) => value,
        (None, Some(default)) => default,
        (None, None) => return Err(ConfigError::Missing(name)),
    };
    if value < min {
        return Err(ConfigError::TooSmall {
            option: name,
            value: value as u64,
            min: min as u64,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(codec: &str) -> Options {
        [
            (codec, None),
            ("cid", Some("111")),
            ("name", Some("video0")),
            ("width", Some("640")),
            ("height", Some("480")),
        ]
        .into_iter()
        .collect()
    }

    fn with(mut options: Options, name: &str, value: &str) -> Options {
        options.set(name, value);
        options
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(&base("vp8")).unwrap();
        assert_eq!(config.codec, Codec::Vp8);
        assert_eq!(config.endpoint, 111);
        assert_eq!(config.buffer_name, "video0");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.rate.target_bitrate, 800_000);
        assert_eq!(config.rate.end_usage, EndUsage::Constant);
        assert_eq!(config.rate.min_quantizer, 4);
        assert_eq!(config.rate.max_quantizer, 56);
        assert_eq!(config.rate.buffer_size, 6000);
        assert_eq!(config.rate.buffer_initial_size, 4000);
        assert_eq!(config.rate.buffer_optimal_size, 5000);
        assert_eq!(config.keyframes.gop, 10);
        assert_eq!(config.keyframes.mode, KeyframeMode::Auto);
        assert_eq!(config.keyframes.max_dist, 99_999);
        assert_eq!(config.tuning.threads, 4);
        assert_eq!(config.tuning.cpu_used, 4);
        assert_eq!(config.tuning.fps, 20);
        assert!(!config.tuning.resize_allowed);
        assert_eq!(config.sender_id, 0);
        assert!(!config.verbose);
        assert_eq!(config.output_capacity, 640 * 480);
        assert_eq!(config.frame_len(), 640 * 480 * 3 / 2);
    }

    #[test]
    fn test_bitrate_clamp() {
        let cases = [
            ("0", 50_000),
            ("49999", 50_000),
            ("50000", 50_000),
            ("1200000", 1_200_000),
            ("5000000", 5_000_000),
            ("5000001", 5_000_000),
            ("99999999999", 5_000_000),
        ];
        for (input, expected) in cases {
            let config = Config::resolve(&with(base("vp9"), "bitrate", input)).unwrap();
            assert_eq!(config.rate.target_bitrate, expected, "bitrate {input}");
        }
    }

    #[test]
    fn test_codec_selection() {
        let both = with(base("vp8"), "vp9", "");
        assert!(matches!(
            Config::resolve(&both),
            Err(ConfigError::ConflictingCodecs)
        ));

        let mut neither = base("vp8");
        neither.0.remove("vp8");
        assert!(matches!(
            Config::resolve(&neither),
            Err(ConfigError::MissingCodec)
        ));

        let vp9 = Config::resolve(&base("vp9")).unwrap();
        assert_eq!(vp9.codec, Codec::Vp9);
        assert_eq!(vp9.codec.fourcc().as_str(), "VP90");
        assert_eq!(vp9.rate.max_quantizer, 52);
    }

    #[test]
    fn test_required_options() {
        for name in ["cid", "name", "width", "height"] {
            let mut options = base("vp8");
            options.0.remove(name);
            match Config::resolve(&options) {
                Err(ConfigError::Missing(missing)) => assert_eq!(missing, name),
                other => panic!("expected missing {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_unparsable_number() {
        let err = Config::resolve(&with(base("vp8"), "gop", "ten")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { option: "gop", .. }
        ));

        let err = Config::resolve(&with(base("vp8"), "bitrate", "-5")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber {
                option: "bitrate",
                ..
            }
        ));

        let err = Config::resolve(&with(base("vp8"), "cid", "70000")).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidNumber { option: "cid", .. }
        ));
    }

    #[test]
    fn test_empty_value_is_default() {
        let config = Config::resolve(&with(base("vp8"), "gop", "")).unwrap();
        assert_eq!(config.keyframes.gop, GOP_DEFAULT);
    }

    #[test]
    fn test_ranges() {
        assert!(matches!(
            Config::resolve(&with(base("vp8"), "gop", "0")),
            Err(ConfigError::TooSmall { option: "gop", .. })
        ));
        assert!(matches!(
            Config::resolve(&with(base("vp8"), "width", "0")),
            Err(ConfigError::TooSmall {
                option: "width",
                ..
            })
        ));
        assert!(matches!(
            Config::resolve(&with(base("vp8"), "output-capacity", "0")),
            Err(ConfigError::TooSmall {
                option: "output-capacity",
                ..
            })
        ));

        let config = Config::resolve(&with(base("vp8"), "max-q", "200")).unwrap();
        assert_eq!(config.rate.max_quantizer, QUANTIZER_MAX);

        let options = with(with(base("vp8"), "min-q", "40"), "max-q", "30");
        assert!(matches!(
            Config::resolve(&options),
            Err(ConfigError::QuantizerOrder { min: 40, max: 30 })
        ));
    }

    #[test]
    fn test_tuning_options() {
        let mut options = [
            ("end-usage", "1"),
            ("kf-mode", "1"),
            ("kf-min-dist", "3"),
            ("threads", "2"),
            ("lag-in-frames", "5"),
            ("drop-frame", "30"),
            ("resize-up", "60"),
            ("resize-down", "20"),
            ("id", "7"),
            ("output-capacity", "1024"),
        ]
        .into_iter()
        .fold(base("vp8"), |o, (k, v)| with(o, k, v));
        options.set_flag("resize-allowed");
        options.set_flag("verbose");

        let config = Config::resolve(&options).unwrap();
        assert_eq!(config.rate.end_usage, EndUsage::Variable);
        assert_eq!(config.keyframes.mode, KeyframeMode::Disabled);
        assert_eq!(config.keyframes.min_dist, 3);
        assert_eq!(config.tuning.threads, 2);
        assert_eq!(config.tuning.lag_in_frames, 5);
        assert_eq!(config.tuning.drop_frame_threshold, 30);
        assert!(config.tuning.resize_allowed);
        assert_eq!(config.tuning.resize_up, 60);
        assert_eq!(config.tuning.resize_down, 20);
        assert_eq!(config.sender_id, 7);
        assert!(config.verbose);
        assert_eq!(config.output_capacity, 1024);
    }

    #[test]
    fn test_toml_overlay() {
        let file = Options::from_toml_str(
            r#"
            vp9 = true
            verbose = false
            cid = 112
            name = "video1"
            width = 1280
            height = 720
            bitrate = 2000000
            "#,
        )
        .unwrap();
        assert!(!file.is_set("verbose"));

        let cli: Options = [("width", Some("640")), ("height", Some("480"))]
            .into_iter()
            .collect();
        let config = Config::resolve(&file.overlay(cli)).unwrap();
        assert_eq!(config.codec, Codec::Vp9);
        assert_eq!(config.endpoint, 112);
        assert_eq!(config.buffer_name, "video1");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.rate.target_bitrate, 2_000_000);
    }

    #[test]
    fn test_toml_rejects_tables() {
        let err = Options::from_toml_str("[nested]\nwidth = 1").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedValue(name) if name == "nested"));
    }
}
