use crate::{EncoderError, Result};
use derive_setters::Setters;
use fast_image_resize::{PixelType, ResizeOptions, Resizer, images::Image};
use image::{
    ExtendedColorType, ImageBuffer, ImageEncoder, Rgb, Rgba, buffer::ConvertBuffer,
    codecs::jpeg::JpegEncoder,
};
use screen_capture::{BYTES_PER_PIXEL, RawFrame};

pub type RgbImageBuffer = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// Compresses raw frames into standalone JPEG images.
#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct StillImageEncoder {
    /// JPEG quality in `1..=100`
    pub quality: u8,

    /// Output size relative to the frame size
    pub scale: f32,

    /// Fixed output size, takes precedence over `scale`
    #[setters(strip_option)]
    pub target_size: Option<(u32, u32)>,
}

impl Default for StillImageEncoder {
    fn default() -> Self {
        Self {
            quality: 80,
            scale: 1.0,
            target_size: None,
        }
    }
}

impl StillImageEncoder {
    pub fn new(quality: u8, scale: f32) -> Self {
        Self {
            quality,
            scale,
            target_size: None,
        }
    }

    pub fn mime(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn output_size(&self, width: u32, height: u32) -> (u32, u32) {
        if let Some(size) = self.target_size {
            return size;
        }

        (
            scaled_dimension(width, self.scale),
            scaled_dimension(height, self.scale),
        )
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<Vec<u8>> {
        let rgb = self.prepare_image(frame)?;
        let mut output = Vec::with_capacity(rgb.as_raw().len() / 8);
        encode_jpeg(&rgb, self.quality, &mut output)?;
        Ok(output)
    }

    /// Strip stride padding, scale when requested and drop the alpha channel.
    pub fn prepare_image(&self, frame: &RawFrame) -> Result<RgbImageBuffer> {
        let rgba = strip_row_padding(frame)?;
        let (width, height) = self.output_size(frame.width, frame.height);

        let rgba = if (width, height) != (frame.width, frame.height) {
            resize_rgba(rgba, (frame.width, frame.height), (width, height))?
        } else {
            rgba
        };

        let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_raw(width, height, rgba)
            .ok_or_else(|| {
                EncoderError::ImageProcessingFailed(format!(
                    "pixel buffer does not match {width}x{height}"
                ))
            })?;

        Ok(img.convert())
    }
}

pub fn scaled_dimension(value: u32, scale: f32) -> u32 {
    ((value as f64 * scale as f64).floor() as u32).max(1)
}

pub fn encode_jpeg(img: &RgbImageBuffer, quality: u8, output: &mut Vec<u8>) -> Result<()> {
    let (width, height) = img.dimensions();
    JpegEncoder::new_with_quality(output, quality.clamp(1, 100))
        .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
        .map_err(|e| EncoderError::ImageProcessingFailed(format!("JPEG encoding failed: {e}")))
}

/// Copy the visible part of every row, dropping the padding added by stride alignment.
pub fn strip_row_padding(frame: &RawFrame) -> Result<Vec<u8>> {
    let row_bytes = frame.row_bytes();
    let height = frame.height as usize;

    if frame.row_stride < row_bytes {
        return Err(EncoderError::ImageProcessingFailed(format!(
            "row stride {} smaller than row size {row_bytes}",
            frame.row_stride
        )));
    }

    let needed = frame.row_stride * height.saturating_sub(1) + row_bytes;
    if height > 0 && frame.pixel_data.len() < needed {
        return Err(EncoderError::ImageProcessingFailed(format!(
            "pixel buffer too short: {} < {needed}",
            frame.pixel_data.len()
        )));
    }

    if !frame.is_padded() {
        return Ok(frame.pixel_data[..row_bytes * height].to_vec());
    }

    let mut data = Vec::with_capacity(row_bytes * height);
    for row in frame.pixel_data.chunks(frame.row_stride).take(height) {
        data.extend_from_slice(&row[..row_bytes]);
    }

    Ok(data)
}

pub fn resize_rgba(rgba: Vec<u8>, src_size: (u32, u32), dst_size: (u32, u32)) -> Result<Vec<u8>> {
    let src_image = Image::from_vec_u8(src_size.0, src_size.1, rgba, PixelType::U8x4).map_err(|e| {
        EncoderError::ImageProcessingFailed(format!("Failed to create source image: {e}"))
    })?;

    let mut dst_image = Image::new(dst_size.0, dst_size.1, PixelType::U8x4);

    Resizer::new()
        .resize(&src_image, &mut dst_image, &ResizeOptions::new())
        .map_err(|e| EncoderError::ImageProcessingFailed(format!("Resize failed: {e}")))?;

    debug_assert_eq!(
        dst_image.buffer().len(),
        dst_size.0 as usize * dst_size.1 as usize * BYTES_PER_PIXEL
    );

    Ok(dst_image.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn padded_frame(width: u32, height: u32, stride: usize) -> RawFrame {
        let mut data = vec![0xAAu8; stride * height as usize];
        for y in 0..height as usize {
            for x in 0..width as usize * BYTES_PER_PIXEL {
                data[y * stride + x] = (y * 10 + x) as u8;
            }
        }
        RawFrame::new(width, height, stride, data)
    }

    #[test]
    fn test_strip_row_padding() {
        let frame = padded_frame(2, 3, 12);
        let data = strip_row_padding(&frame).unwrap();

        assert_eq!(data.len(), 2 * 3 * 4);
        assert!(!data.contains(&0xAA));
        assert_eq!(&data[8..16], &[10, 11, 12, 13, 14, 15, 16, 17]);
    }

    #[test]
    fn test_strip_row_padding_rejects_short_buffer() {
        let mut frame = padded_frame(2, 3, 12);
        frame.pixel_data.truncate(20);
        assert!(strip_row_padding(&frame).is_err());
    }

    #[test]
    fn test_scaled_dimension_floors() {
        assert_eq!(scaled_dimension(1080, 0.5), 540);
        assert_eq!(scaled_dimension(1081, 0.5), 540);
        assert_eq!(scaled_dimension(3, 0.1), 1);
    }

    #[test]
    fn test_encode_jpeg_with_scale() {
        let frame = padded_frame(64, 32, 64 * 4 + 32);
        let encoder = StillImageEncoder::new(80, 0.5);
        let img = encoder.prepare_image(&frame).unwrap();
        assert_eq!(img.dimensions(), (32, 16));

        let jpeg = encoder.encode(&frame).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }

    #[test]
    fn test_fixed_target_size() {
        let frame = padded_frame(64, 32, 64 * 4);
        let encoder = StillImageEncoder::new(80, 1.0).with_target_size((20, 10));
        assert_eq!(encoder.output_size(64, 32), (20, 10));
        assert_eq!(encoder.prepare_image(&frame).unwrap().dimensions(), (20, 10));
    }
}
