#[cfg(feature = "openh264")]
mod ve_openh264;

mod annexb;
mod software;
mod still;
mod surface;
mod ve_mjpeg;

pub use annexb::*;
pub use software::*;
pub use still::*;
pub use surface::*;
pub use ve_mjpeg::MjpegCompressor;

#[cfg(feature = "openh264")]
pub use ve_openh264::OpenH264Compressor;

use bitflags::bitflags;
use derive_setters::Setters;
use screen_capture::RenderTarget;
use std::{ops::RangeInclusive, time::Duration};

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("Image processing failed: {0}")]
    ImageProcessingFailed(String),

    #[error("Video encoding failed: {0}")]
    VideoEncodingFailed(String),

    #[error("Invalid encoder state: {0}")]
    InvalidState(String),

    #[error("Unknown output buffer index {0}")]
    InvalidBuffer(usize),

    #[error("Encoder is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, EncoderError>;

bitflags! {
    /// Bit set attached to every output buffer.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
    pub struct BufferFlags: u32 {
        const KEY_FRAME = 1;
        const CODEC_CONFIG = 1 << 1;
        const END_OF_STREAM = 1 << 2;
    }
}

/// A compressed unit borrowed from the encoder's output pool.
#[derive(Debug, Clone, Copy)]
pub struct EncodedUnit<'a> {
    pub bytes: &'a [u8],
    pub flags: BufferFlags,
    pub presentation_time_us: i64,
}

impl<'a> EncodedUnit<'a> {
    pub fn new(bytes: &'a [u8], flags: BufferFlags, presentation_time_us: i64) -> Self {
        Self {
            bytes,
            flags,
            presentation_time_us,
        }
    }

    pub fn byte_count(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(BufferFlags::KEY_FRAME)
    }

    pub fn is_codec_config(&self) -> bool {
        self.flags.contains(BufferFlags::CODEC_CONFIG)
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.flags.contains(BufferFlags::END_OF_STREAM)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: usize,
    pub size: usize,
    pub flags: BufferFlags,
    pub presentation_time_us: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DequeueStatus {
    Buffer(BufferInfo),
    FormatChanged(OutputFormat),
    TryAgainLater,
}

/// Only the constrained baseline profile is produced.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Baseline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecCapabilities {
    pub mime: String,
    pub supported_widths: RangeInclusive<u32>,
    pub supported_heights: RangeInclusive<u32>,
    pub width_alignment: u32,
    pub height_alignment: u32,

    /// Number of output buffers the engine can hand out before it blocks
    pub output_buffer_count: usize,
}

impl CodecCapabilities {
    pub fn is_size_supported(&self, width: u32, height: u32) -> bool {
        self.supported_widths.contains(&width)
            && self.supported_heights.contains(&height)
            && width % self.width_alignment.max(1) == 0
            && height % self.height_alignment.max(1) == 0
    }

    /// Round a size down to the engine's alignment.
    pub fn align(&self, width: u32, height: u32) -> (u32, u32) {
        let wa = self.width_alignment.max(1);
        let ha = self.height_alignment.max(1);
        (width / wa * wa, height / ha * ha)
    }

    pub fn max_width(&self) -> u32 {
        *self.supported_widths.end()
    }

    pub fn max_height(&self) -> u32 {
        *self.supported_heights.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Setters)]
#[setters(prefix = "with_")]
pub struct VideoFormat {
    pub width: u32,
    pub height: u32,

    /// Bits per second
    pub bitrate: u32,
    pub frame_rate: u32,

    /// Seconds between two intra frames
    pub key_frame_interval: u32,

    pub profile: Profile,
    pub low_latency: bool,
}

impl VideoFormat {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bitrate: 10_000_000,
            frame_rate: 30,
            key_frame_interval: 2,
            profile: Profile::Baseline,
            low_latency: true,
        }
    }

    pub fn key_frame_interval_frames(&self) -> u64 {
        (self.frame_rate.max(1) as u64 * self.key_frame_interval.max(1) as u64).max(1)
    }
}

/// A stateful video engine fed through its own input surface.
///
/// Lifecycle: `configure` -> `create_input_surface` -> `start` -> drain with
/// `dequeue_output`/`release_output` -> `signal_end_of_input` -> `stop` -> `release`.
pub trait VideoCodec: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> CodecCapabilities;

    fn configure(&mut self, format: &VideoFormat) -> Result<()>;

    fn create_input_surface(&mut self) -> Result<RenderTarget>;

    fn start(&mut self) -> Result<()>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<DequeueStatus>;

    fn output_buffer(&self, index: usize) -> Option<&[u8]>;

    /// Hand a dequeued buffer back. Must be called exactly once per dequeued buffer.
    fn release_output(&mut self, index: usize) -> Result<()>;

    fn signal_end_of_input(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn release(&mut self);
}

/// Scoped ownership of one dequeued output buffer.
///
/// The buffer goes back to the engine on [`OutputGuard::release`] or on drop,
/// whichever comes first.
pub struct OutputGuard<'a, C: VideoCodec + ?Sized> {
    codec: &'a mut C,
    info: BufferInfo,
    released: bool,
}

impl<'a, C: VideoCodec + ?Sized> OutputGuard<'a, C> {
    pub fn unit(&self) -> EncodedUnit<'_> {
        let bytes = self.codec.output_buffer(self.info.index).unwrap_or_default();
        let bytes = &bytes[..self.info.size.min(bytes.len())];
        EncodedUnit::new(bytes, self.info.flags, self.info.presentation_time_us)
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.codec.release_output(self.info.index)
    }
}

impl<C: VideoCodec + ?Sized> Drop for OutputGuard<'_, C> {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            if let Err(e) = self.codec.release_output(self.info.index) {
                log::warn!("release output buffer {} failed: {e}", self.info.index);
            }
        }
    }
}

pub enum Dequeued<'a, C: VideoCodec + ?Sized> {
    Unit(OutputGuard<'a, C>),
    FormatChanged(OutputFormat),
    TryAgainLater,
}

/// Dequeue one output with a bounded wait, wrapping buffers in an [`OutputGuard`].
pub fn dequeue<C: VideoCodec + ?Sized>(codec: &mut C, timeout: Duration) -> Result<Dequeued<'_, C>> {
    match codec.dequeue_output(timeout)? {
        DequeueStatus::Buffer(info) => Ok(Dequeued::Unit(OutputGuard {
            codec,
            info,
            released: false,
        })),
        DequeueStatus::FormatChanged(format) => Ok(Dequeued::FormatChanged(format)),
        DequeueStatus::TryAgainLater => Ok(Dequeued::TryAgainLater),
    }
}
