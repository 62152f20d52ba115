use crate::{DisplayGeometry, DisplayServiceError};
use std::{sync::Arc, time::Duration};

pub const BYTES_PER_PIXEL: usize = 4;

#[derive(thiserror::Error, Debug)]
pub enum CaptureError {
    #[error("Provisioning failed: {0}")]
    ProvisioningFailed(String),

    #[error("Display service failed: {0}")]
    DisplayService(#[from] DisplayServiceError),
}

/// One frame rendered by a logical display.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,

    /// Bytes per row, may be larger than `width * 4` because of hardware alignment
    pub row_stride: usize,

    /// Raw pixel data in RGBA format, `row_stride * height` bytes
    pub pixel_data: Vec<u8>,

    /// Time since the logical display was created
    pub timestamp: Duration,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, row_stride: usize, pixel_data: Vec<u8>) -> Self {
        Self {
            width,
            height,
            row_stride,
            pixel_data,
            timestamp: Duration::ZERO,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * BYTES_PER_PIXEL
    }

    pub fn is_padded(&self) -> bool {
        self.row_stride != self.row_bytes()
    }
}

/// Anything a logical display can render into.
pub trait FrameSink: Send + Sync {
    fn push_frame(&self, frame: RawFrame);

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Shared handle to the render sink a logical display mirrors into.
#[derive(Clone)]
pub struct RenderTarget {
    sink: Arc<dyn FrameSink>,
}

impl RenderTarget {
    pub fn new(sink: Arc<dyn FrameSink>) -> Self {
        Self { sink }
    }

    pub fn push_frame(&self, frame: RawFrame) {
        if !self.sink.is_closed() {
            self.sink.push_frame(frame);
        }
    }

    pub fn close(&self) {
        self.sink.close();
    }

    pub fn is_closed(&self) -> bool {
        self.sink.is_closed()
    }
}

impl std::fmt::Debug for RenderTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTarget")
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// An OS level logical display. It lives until `release` is called.
pub trait VirtualDisplay: Send {
    fn release(&mut self);
}

/// The privileged service that knows the real display and can create
/// logical displays mirroring it.
pub trait DisplayService: Send + Sync {
    fn geometry(&self) -> Result<DisplayGeometry, DisplayServiceError>;

    fn bind_virtual_display(
        &self,
        name: &str,
        width: u32,
        height: u32,
        density_dpi: u32,
        target: RenderTarget,
    ) -> Option<Box<dyn VirtualDisplay>>;
}

/// Owns the logical display bound to a capture target.
///
/// Releasing is idempotent and also happens on drop.
pub struct CaptureHandle {
    name: String,
    display: Option<Box<dyn VirtualDisplay>>,
}

impl CaptureHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_released(&self) -> bool {
        self.display.is_none()
    }

    pub fn release(&mut self) {
        if let Some(mut display) = self.display.take() {
            display.release();
            log::info!("logical display `{}` released", self.name);
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Ask the display service for a logical display mirroring the real one into `target`.
pub fn bind_capture(
    service: &dyn DisplayService,
    name: &str,
    width: u32,
    height: u32,
    density_dpi: u32,
    target: RenderTarget,
) -> Result<CaptureHandle, CaptureError> {
    if width == 0 || height == 0 {
        return Err(CaptureError::ProvisioningFailed(format!(
            "invalid capture size {width}x{height}"
        )));
    }

    let display = service
        .bind_virtual_display(name, width, height, density_dpi, target)
        .ok_or_else(|| {
            CaptureError::ProvisioningFailed(format!(
                "display service refused to bind `{name}` ({width}x{height} @ {density_dpi}dpi)"
            ))
        })?;

    log::info!("logical display `{name}` bound: {width}x{height} @ {density_dpi}dpi");

    Ok(CaptureHandle {
        name: name.to_string(),
        display: Some(display),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullSink;

    impl FrameSink for NullSink {
        fn push_frame(&self, _frame: RawFrame) {}
        fn close(&self) {}
        fn is_closed(&self) -> bool {
            false
        }
    }

    struct CountingDisplay(Arc<AtomicUsize>);

    impl VirtualDisplay for CountingDisplay {
        fn release(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Service {
        accept: bool,
        releases: Arc<AtomicUsize>,
    }

    impl DisplayService for Service {
        fn geometry(&self) -> Result<DisplayGeometry, DisplayServiceError> {
            Ok(DisplayGeometry::default())
        }

        fn bind_virtual_display(
            &self,
            _name: &str,
            _width: u32,
            _height: u32,
            _density_dpi: u32,
            _target: RenderTarget,
        ) -> Option<Box<dyn VirtualDisplay>> {
            self.accept
                .then(|| Box::new(CountingDisplay(self.releases.clone())) as Box<dyn VirtualDisplay>)
        }
    }

    #[test]
    fn test_bind_refused() {
        let service = Service {
            accept: false,
            releases: Arc::default(),
        };
        let target = RenderTarget::new(Arc::new(NullSink));
        let result = bind_capture(&service, "test", 100, 100, 160, target);
        assert!(matches!(result, Err(CaptureError::ProvisioningFailed(_))));
    }

    #[test]
    fn test_release_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let service = Service {
            accept: true,
            releases: releases.clone(),
        };
        let target = RenderTarget::new(Arc::new(NullSink));
        let mut handle = bind_capture(&service, "test", 100, 100, 160, target).unwrap();

        handle.release();
        handle.release();
        drop(handle);

        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stride_padding() {
        let frame = RawFrame::new(3, 2, 16, vec![0; 32]);
        assert_eq!(frame.row_bytes(), 12);
        assert!(frame.is_padded());
    }
}
