use clap::{Args, Parser, Subcommand, ValueEnum};
use screen_capture::{DisplayGeometry, FALLBACK_GEOMETRY, SyntheticDisplayService};
use screen_stream::{
    DEFAULT_BITRATE, DEFAULT_FPS, DEFAULT_QUALITY, DEFAULT_SCALE, FPS_RANGE, MIN_BITRATE,
    QUALITY_RANGE, SCALE_RANGE, StreamConfig, StreamError,
};
use std::{fmt::Display, ops::RangeInclusive, str::FromStr};

pub const DEFAULT_REFRESH_RATE: u32 = 60;
const REFRESH_RANGE: RangeInclusive<u32> = 1..=240;

#[derive(Debug, Parser)]
#[command(
    name = "screencast",
    about = "Capture the screen, encode it and stream the result to stdout",
    author,
    version,
    propagate_version = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Values are kept as raw strings and converted leniently, see [`Commands::stream_config`].
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Stream JPEG frames with multipart boundary framing.
    Image {
        /// JPEG quality, 1..=100.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        quality: Option<String>,

        /// Output size relative to the display, 0.1..=2.0.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        scale: Option<String>,

        /// Maximum frames per second, 1..=60.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        fps: Option<String>,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Stream a raw, unframed video elementary stream.
    Video {
        /// Output size relative to the display, 0.1..=2.0.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        scale: Option<String>,

        /// Encoder frame rate, 1..=60. A bad value is an error.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        fps: Option<String>,

        /// Bits per second, at least 100000.
        #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
        bitrate: Option<String>,

        /// Video engine, `mjpeg` or `h264`.
        #[arg(long, num_args = 0..=1, default_missing_value = "")]
        codec: Option<String>,

        /// Accepted for symmetry with `image`, the video path has no quality knob.
        #[arg(
            long,
            hide = true,
            allow_hyphen_values = true,
            num_args = 0..=1,
            default_missing_value = ""
        )]
        quality: Option<String>,

        #[command(flatten)]
        display: DisplayArgs,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Codec {
    Mjpeg,
    H264,
}

/// Settings of the bundled synthetic display.
#[derive(Debug, Clone, Default, Args)]
pub struct DisplayArgs {
    /// Display size as WIDTHxHEIGHT.
    #[arg(long = "display-size", num_args = 0..=1, default_missing_value = "")]
    pub display_size: Option<String>,

    /// Display refresh rate in Hz.
    #[arg(long, allow_hyphen_values = true, num_args = 0..=1, default_missing_value = "")]
    pub refresh: Option<String>,
}

impl DisplayArgs {
    pub fn geometry(&self) -> DisplayGeometry {
        match self.display_size.as_deref().map(parse_size) {
            Some(Some((width, height))) => DisplayGeometry {
                width,
                height,
                ..FALLBACK_GEOMETRY
            },
            Some(None) => {
                log::warn!(
                    "invalid --display-size {:?}, using {}x{}",
                    self.display_size.as_deref().unwrap_or_default(),
                    FALLBACK_GEOMETRY.width,
                    FALLBACK_GEOMETRY.height
                );
                FALLBACK_GEOMETRY
            }
            None => FALLBACK_GEOMETRY,
        }
    }

    pub fn display_service(&self) -> SyntheticDisplayService {
        let refresh_rate = lenient(
            "refresh",
            self.refresh.as_deref(),
            REFRESH_RANGE,
            DEFAULT_REFRESH_RATE,
        );
        SyntheticDisplayService::new(self.geometry()).with_refresh_rate(refresh_rate)
    }
}

impl Commands {
    pub fn display(&self) -> &DisplayArgs {
        match self {
            Commands::Image { display, .. } | Commands::Video { display, .. } => display,
        }
    }

    /// Build the stream configuration. Only a bad `--fps` on the video path fails.
    pub fn stream_config(&self) -> Result<StreamConfig, StreamError> {
        match self {
            Commands::Image {
                quality,
                scale,
                fps,
                ..
            } => Ok(StreamConfig::new()
                .with_quality(lenient(
                    "quality",
                    quality.as_deref(),
                    QUALITY_RANGE,
                    DEFAULT_QUALITY,
                ))
                .with_scale(lenient("scale", scale.as_deref(), SCALE_RANGE, DEFAULT_SCALE))
                .with_fps(lenient("fps", fps.as_deref(), FPS_RANGE, DEFAULT_FPS))),
            Commands::Video {
                scale,
                fps,
                bitrate,
                quality,
                ..
            } => {
                if quality.is_some() {
                    log::warn!("--quality has no effect on the video path, ignored");
                }

                Ok(StreamConfig::new()
                    .with_fps(strict_fps(fps.as_deref())?)
                    .with_scale(lenient("scale", scale.as_deref(), SCALE_RANGE, DEFAULT_SCALE))
                    .with_bitrate(parse_bitrate(bitrate.as_deref())))
            }
        }
    }
}

/// Parse `value`, falling back to `default` when it is missing, malformed or out of `range`.
pub fn lenient<T>(flag: &str, value: Option<&str>, range: RangeInclusive<T>, default: T) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let Some(raw) = value else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(v) if range.contains(&v) => v,
        Ok(v) => {
            log::warn!(
                "--{flag} {v} is outside [{}, {}], using {default}",
                range.start(),
                range.end()
            );
            default
        }
        Err(_) => {
            log::warn!("--{flag} {raw:?} is not a number, using {default}");
            default
        }
    }
}

pub fn strict_fps(value: Option<&str>) -> Result<u32, StreamError> {
    let Some(raw) = value else {
        return Ok(DEFAULT_FPS);
    };

    match raw.trim().parse::<u32>() {
        Ok(fps) if FPS_RANGE.contains(&fps) => Ok(fps),
        _ => Err(StreamError::Argument(format!(
            "--fps must be an integer in [{}, {}], got {raw:?}",
            FPS_RANGE.start(),
            FPS_RANGE.end()
        ))),
    }
}

pub fn parse_bitrate(value: Option<&str>) -> u32 {
    let Some(raw) = value else {
        return DEFAULT_BITRATE;
    };

    match raw.trim().parse::<u32>() {
        Ok(bitrate) if bitrate < MIN_BITRATE => {
            log::warn!("--bitrate {bitrate} is below {MIN_BITRATE}, using {MIN_BITRATE}");
            MIN_BITRATE
        }
        Ok(bitrate) => bitrate,
        Err(_) => {
            log::warn!("--bitrate {raw:?} is not a number, using {DEFAULT_BITRATE}");
            DEFAULT_BITRATE
        }
    }
}

pub fn parse_codec(value: Option<&str>) -> Codec {
    let Some(raw) = value else {
        return Codec::Mjpeg;
    };

    <Codec as ValueEnum>::from_str(raw.trim(), true).unwrap_or_else(|_| {
        log::warn!("--codec {raw:?} is not supported, using mjpeg");
        Codec::Mjpeg
    })
}

fn parse_size(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.trim().split_once(['x', 'X'])?;
    let width = width.parse::<u32>().ok().filter(|v| *v > 0)?;
    let height = height.parse::<u32>().ok().filter(|v| *v > 0)?;
    Some((width, height))
}
