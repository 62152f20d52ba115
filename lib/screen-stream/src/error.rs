use crate::SinkError;
use screen_capture::CaptureError;
use thiserror::Error;
use video_encoder::EncoderError;

/// Fatal pipeline errors. Transient per-frame failures are logged inside the
/// loops and never show up here.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(#[from] CaptureError),

    #[error("Scaled capture size {width}x{height} is not positive")]
    NonPositiveSize { width: i64, height: i64 },

    #[error(
        "Capture size {width}x{height} is not supported by {codec}, maximum supported size is {max_width}x{max_height}; retry with a smaller scale"
    )]
    ConfigurationRejected {
        codec: String,
        width: u32,
        height: u32,
        max_width: u32,
        max_height: u32,
    },

    #[error("Invalid configuration parameters: {0}")]
    InvalidConfig(String),

    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Video encoding failed: {0}")]
    Encoder(#[from] EncoderError),

    #[error("Output sink failed: {0}")]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Other(String),
}

impl StreamError {
    /// Whether the error is a dimension problem the caller can fix by changing the scale.
    pub fn is_configuration_rejected(&self) -> bool {
        matches!(
            self,
            StreamError::NonPositiveSize { .. } | StreamError::ConfigurationRejected { .. }
        )
    }
}
