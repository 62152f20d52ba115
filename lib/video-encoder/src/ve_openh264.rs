use crate::{
    BufferFlags, CodecCapabilities, CompressedUnit, EncoderError, FrameCompressor, Result,
    VideoFormat, split_parameter_sets, strip_row_padding,
};
use openh264::{
    OpenH264API,
    encoder::{BitRate, Encoder, EncoderConfig, FrameRate, FrameType, UsageType},
    formats::{RgbSliceU8, YUVBuffer},
};
use screen_capture::{BYTES_PER_PIXEL, RawFrame};

/// H.264 through OpenH264. The first key frame's SPS/PPS are split off into a
/// separate codec config unit.
pub struct OpenH264Compressor {
    width: u32,
    height: u32,
    encoder: Encoder,
    config_sent: bool,
}

impl FrameCompressor for OpenH264Compressor {
    fn mime() -> &'static str {
        "video/avc"
    }

    fn capabilities(output_buffer_count: usize) -> CodecCapabilities {
        CodecCapabilities {
            mime: Self::mime().to_string(),
            supported_widths: 16..=4096,
            supported_heights: 16..=4096,
            width_alignment: 2,
            height_alignment: 2,
            output_buffer_count,
        }
    }

    fn open(format: &VideoFormat) -> Result<Self> {
        let config = EncoderConfig::new()
            .bitrate(BitRate::from_bps(format.bitrate))
            .max_frame_rate(FrameRate::from_hz(format.frame_rate as f32))
            .usage_type(UsageType::ScreenContentRealTime);

        let encoder = Encoder::with_api_config(OpenH264API::from_source(), config).map_err(|e| {
            EncoderError::VideoEncodingFailed(format!("Failed to create OpenH264 encoder: {e:?}"))
        })?;

        Ok(Self {
            width: format.width,
            height: format.height,
            encoder,
            config_sent: false,
        })
    }

    fn compress(&mut self, frame: &RawFrame, force_key_frame: bool) -> Result<Vec<CompressedUnit>> {
        if (frame.width, frame.height) != (self.width, self.height) {
            return Err(EncoderError::ImageProcessingFailed(format!(
                "frame size {}x{} differs from configured {}x{}",
                frame.width, frame.height, self.width, self.height
            )));
        }

        let rgba = strip_row_padding(frame)?;
        let rgb = rgba
            .chunks_exact(BYTES_PER_PIXEL)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect::<Vec<u8>>();

        let source = RgbSliceU8::new(&rgb, (self.width as usize, self.height as usize));
        let yuv = YUVBuffer::from_rgb8_source(source);

        if force_key_frame || !self.config_sent {
            self.encoder.force_intra_frame();
        }

        let bitstream = self.encoder.encode(&yuv).map_err(|e| {
            EncoderError::VideoEncodingFailed(format!("OpenH264 encoding failed: {e:?}"))
        })?;

        let is_key_frame = matches!(bitstream.frame_type(), FrameType::IDR | FrameType::I);
        let data = bitstream.to_vec();
        if data.is_empty() {
            return Ok(vec![]);
        }

        let flags = if is_key_frame {
            BufferFlags::KEY_FRAME
        } else {
            BufferFlags::empty()
        };

        if is_key_frame && !self.config_sent {
            let (config, rest) = split_parameter_sets(&data);
            if !config.is_empty() {
                self.config_sent = true;
                return Ok(vec![
                    CompressedUnit::new(config, BufferFlags::CODEC_CONFIG),
                    CompressedUnit::new(rest, flags),
                ]);
            }
        }

        Ok(vec![CompressedUnit::new(data, flags)])
    }
}
