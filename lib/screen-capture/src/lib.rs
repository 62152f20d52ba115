//! Display discovery and capture binding.
//!
//! A [`DisplayService`] reports the real display's geometry and creates
//! logical displays that mirror it into a [`RenderTarget`]. The render target
//! is either a [`FramePool`] of raw pixel buffers or an encoder's input surface.

mod capture;
mod frame_pool;
mod screen_info;
mod synthetic;

pub use capture::*;
pub use frame_pool::*;
pub use screen_info::*;
pub use synthetic::*;
