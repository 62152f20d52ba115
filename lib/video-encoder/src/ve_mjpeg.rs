use crate::{
    BufferFlags, CodecCapabilities, CompressedUnit, FrameCompressor, Result, StillImageEncoder,
    VideoFormat, encode_jpeg,
};
use screen_capture::RawFrame;

/// Motion JPEG: every frame is an independent JPEG image, so every unit is a key frame.
pub struct MjpegCompressor {
    encoder: StillImageEncoder,
    buffer: Vec<u8>,
}

impl MjpegCompressor {
    /// Map the bitrate budget to a JPEG quality through the bits available per pixel.
    pub fn quality_for_bitrate(format: &VideoFormat) -> u8 {
        let pixels_per_second =
            format.width as f64 * format.height as f64 * format.frame_rate.max(1) as f64;
        let bits_per_pixel = format.bitrate as f64 / pixels_per_second.max(1.0);
        (40.0 + bits_per_pixel * 100.0).clamp(30.0, 95.0) as u8
    }
}

impl FrameCompressor for MjpegCompressor {
    fn mime() -> &'static str {
        "video/mjpeg"
    }

    fn capabilities(output_buffer_count: usize) -> CodecCapabilities {
        CodecCapabilities {
            mime: Self::mime().to_string(),
            supported_widths: 16..=8192,
            supported_heights: 16..=8192,
            width_alignment: 2,
            height_alignment: 2,
            output_buffer_count,
        }
    }

    fn open(format: &VideoFormat) -> Result<Self> {
        let quality = Self::quality_for_bitrate(format);
        log::info!("mjpeg quality {quality} for {}bps", format.bitrate);

        Ok(Self {
            encoder: StillImageEncoder::new(quality, 1.0),
            buffer: Vec::new(),
        })
    }

    fn compress(&mut self, frame: &RawFrame, _force_key_frame: bool) -> Result<Vec<CompressedUnit>> {
        let img = self.encoder.prepare_image(frame)?;

        self.buffer.clear();
        encode_jpeg(&img, self.encoder.quality, &mut self.buffer)?;

        Ok(vec![CompressedUnit::new(
            self.buffer.clone(),
            BufferFlags::KEY_FRAME,
        )])
    }
}
