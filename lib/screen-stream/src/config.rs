use crate::StreamError;
use derive_setters::Setters;
use screen_capture::DisplayGeometry;
use std::{ops::RangeInclusive, time::Duration};

pub const DEFAULT_QUALITY: u8 = 80;
pub const DEFAULT_SCALE: f64 = 1.0;
pub const DEFAULT_FPS: u32 = 30;
pub const DEFAULT_BITRATE: u32 = 10_000_000;
pub const MIN_BITRATE: u32 = 100_000;
pub const DEFAULT_KEY_FRAME_INTERVAL: u32 = 2;
pub const DEFAULT_FRAME_POOL_CAPACITY: usize = 2;
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(50);
pub const DEFAULT_DISPLAY_NAME: &str = "screencast";
pub const DEFAULT_BOUNDARY: &str = "BoundaryString";

pub const QUALITY_RANGE: RangeInclusive<u8> = 1..=100;
pub const SCALE_RANGE: RangeInclusive<f64> = 0.1..=2.0;
pub const FPS_RANGE: RangeInclusive<u32> = 1..=60;

// Absorbs binary rounding so 720 * 0.35 lands on 252 rather than 251.
const SCALE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Setters)]
#[setters(prefix = "with_")]
pub struct StreamConfig {
    pub scale: f64,
    pub fps: u32,

    /// Still-image quality, image path only
    pub quality: u8,

    /// Bits per second, video path only
    pub bitrate: u32,

    /// Seconds between two intra frames, video path only
    pub key_frame_interval: u32,

    pub frame_pool_capacity: usize,
    pub dequeue_timeout: Duration,
    pub display_name: String,
    pub boundary: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            fps: DEFAULT_FPS,
            quality: DEFAULT_QUALITY,
            bitrate: DEFAULT_BITRATE,
            key_frame_interval: DEFAULT_KEY_FRAME_INTERVAL,
            frame_pool_capacity: DEFAULT_FRAME_POOL_CAPACITY,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
            boundary: DEFAULT_BOUNDARY.to_string(),
        }
    }
}

impl StreamConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checked before any resource is provisioned.
    pub fn validate(&self) -> Result<(), StreamError> {
        if !self.scale.is_finite() || !SCALE_RANGE.contains(&self.scale) {
            return Err(StreamError::InvalidConfig(format!(
                "scale {} is outside [{}, {}]",
                self.scale,
                SCALE_RANGE.start(),
                SCALE_RANGE.end()
            )));
        }

        if !FPS_RANGE.contains(&self.fps) {
            return Err(StreamError::InvalidConfig(format!(
                "fps {} is outside [{}, {}]",
                self.fps,
                FPS_RANGE.start(),
                FPS_RANGE.end()
            )));
        }

        if !QUALITY_RANGE.contains(&self.quality) {
            return Err(StreamError::InvalidConfig(format!(
                "quality {} is outside [{}, {}]",
                self.quality,
                QUALITY_RANGE.start(),
                QUALITY_RANGE.end()
            )));
        }

        if self.bitrate < MIN_BITRATE {
            return Err(StreamError::InvalidConfig(format!(
                "bitrate {} is below {MIN_BITRATE}",
                self.bitrate
            )));
        }

        if self.frame_pool_capacity == 0 {
            return Err(StreamError::InvalidConfig(
                "frame pool capacity must be greater than zero".to_string(),
            ));
        }

        if self.boundary.is_empty() {
            return Err(StreamError::InvalidConfig(
                "multipart boundary must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// `floor(dim * scale)` for both display dimensions.
    pub fn target_size(&self, geometry: &DisplayGeometry) -> Result<(u32, u32), StreamError> {
        let width = scale_dimension(geometry.width, self.scale);
        let height = scale_dimension(geometry.height, self.scale);

        if width <= 0 || height <= 0 {
            return Err(StreamError::NonPositiveSize { width, height });
        }

        Ok((width as u32, height as u32))
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

fn scale_dimension(value: u32, scale: f64) -> i64 {
    (value as f64 * scale + SCALE_EPSILON).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use screen_capture::Rotation;

    #[test]
    fn test_default_config_is_valid() {
        let config = StreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.quality, 80);
        assert_eq!(config.fps, 30);
        assert_eq!(config.bitrate, 10_000_000);
        assert_eq!(config.boundary, "BoundaryString");
    }

    #[test]
    fn test_target_size_is_floor_of_scaled_dimensions() {
        let geometry = DisplayGeometry::new(1080, 1920, 320, Rotation::_0);

        for step in 10..=200 {
            let scale = step as f64 / 100.0;
            let config = StreamConfig::new().with_scale(scale);
            let (width, height) = config.target_size(&geometry).unwrap();

            assert_eq!(width as u64, 1080 * step / 100, "scale {scale}");
            assert_eq!(height as u64, 1920 * step / 100, "scale {scale}");
        }
    }

    #[test]
    fn test_target_size_rejects_non_positive() {
        let geometry = DisplayGeometry::new(5, 1920, 320, Rotation::_0);
        let config = StreamConfig::new().with_scale(0.1);

        let err = config.target_size(&geometry).unwrap_err();
        assert!(err.is_configuration_rejected());
        assert!(matches!(
            err,
            StreamError::NonPositiveSize {
                width: 0,
                height: 192
            }
        ));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(StreamConfig::new().with_scale(0.05).validate().is_err());
        assert!(StreamConfig::new().with_scale(2.5).validate().is_err());
        assert!(StreamConfig::new().with_scale(f64::NAN).validate().is_err());
        assert!(StreamConfig::new().with_fps(0).validate().is_err());
        assert!(StreamConfig::new().with_fps(61).validate().is_err());
        assert!(StreamConfig::new().with_quality(0).validate().is_err());
        assert!(StreamConfig::new().with_bitrate(99_999).validate().is_err());
        assert!(
            StreamConfig::new()
                .with_frame_pool_capacity(0)
                .validate()
                .is_err()
        );
        assert!(StreamConfig::new().with_scale(2.0).validate().is_ok());
    }
}
