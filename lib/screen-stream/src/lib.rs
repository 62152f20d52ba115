//! # Screen Stream
//!
//! Continuous capture, encode and stream pipeline with backpressure and
//! coordinated shutdown.
//!
//! A [`CapturePipeline`] reads the display geometry, lets its
//! [`StreamEncoder`] create a render target, binds a logical display to that
//! target and streams encoded units to a byte sink until a
//! [`ShutdownSignal`] fires or the consumer goes away. Every resource it
//! acquired is released on the way out, in a fixed order.
//!
//! Two encoders are provided:
//!
//! - [`ImageStreamEncoder`]: JPEG frames in multipart framing, encoded on a
//!   dedicated worker that always takes the latest frame
//! - [`VideoStreamEncoder`]: a raw elementary stream drained from a
//!   [`video_encoder::VideoCodec`] whose input surface is the capture target
//!
//! ```no_run
//! use screen_capture::{DisplayGeometry, SyntheticDisplayService};
//! use screen_stream::{CapturePipeline, ImageStreamEncoder, ShutdownSignal, StreamConfig};
//! use std::sync::Arc;
//!
//! let service = Arc::new(SyntheticDisplayService::new(DisplayGeometry::default()));
//! let shutdown = ShutdownSignal::new();
//! let config = StreamConfig::new().with_quality(80).with_scale(0.5);
//!
//! let pipeline = CapturePipeline::new(service, ImageStreamEncoder::new(), config, shutdown);
//! let stats = pipeline.run(Box::new(std::io::stdout())).unwrap();
//! println!("{} frames written", stats.units_written);
//! ```

mod config;
mod error;
mod image_stream;
mod pipeline;
mod shutdown;
mod stats;
mod video_stream;
mod writer;

pub use config::*;
pub use error::*;
pub use image_stream::*;
pub use pipeline::*;
pub use shutdown::*;
pub use stats::*;
pub use video_stream::*;
pub use writer::*;
