use crate::{
    BYTES_PER_PIXEL, DisplayGeometry, DisplayService, DisplayServiceError, RawFrame, RenderTarget,
    VirtualDisplay,
};
use derive_setters::Setters;
use spin_sleep::SpinSleeper;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

const ROW_ALIGNMENT: usize = 64;

/// Display service backed by a generated test pattern instead of a real screen.
///
/// Every bound logical display runs its own render thread that draws a moving
/// bar over colour stripes into the target at `refresh_rate`.
#[derive(Debug, Clone, Setters)]
#[setters(prefix = "with_")]
pub struct SyntheticDisplayService {
    pub geometry: DisplayGeometry,
    pub refresh_rate: u32,

    #[setters(skip)]
    bound: Arc<AtomicUsize>,
}

impl SyntheticDisplayService {
    pub fn new(geometry: DisplayGeometry) -> Self {
        Self {
            geometry,
            refresh_rate: 60,
            bound: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of logical displays currently alive.
    pub fn bound_displays(&self) -> usize {
        self.bound.load(Ordering::SeqCst)
    }
}

impl DisplayService for SyntheticDisplayService {
    fn geometry(&self) -> Result<DisplayGeometry, DisplayServiceError> {
        Ok(self.geometry)
    }

    fn bind_virtual_display(
        &self,
        name: &str,
        width: u32,
        height: u32,
        _density_dpi: u32,
        target: RenderTarget,
    ) -> Option<Box<dyn VirtualDisplay>> {
        if width == 0 || height == 0 || self.refresh_rate == 0 {
            return None;
        }

        let stop_sig = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_secs_f64(1.0 / self.refresh_rate as f64);
        let thread_stop_sig = stop_sig.clone();

        let worker = thread::Builder::new()
            .name(format!("virtual-display-{name}"))
            .spawn(move || render_loop(width, height, interval, target, thread_stop_sig))
            .map_err(|e| log::warn!("spawn virtual display thread failed: {e}"))
            .ok()?;

        self.bound.fetch_add(1, Ordering::SeqCst);

        Some(Box::new(SyntheticDisplay {
            stop_sig,
            worker: Some(worker),
            bound: self.bound.clone(),
        }))
    }
}

struct SyntheticDisplay {
    stop_sig: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    bound: Arc<AtomicUsize>,
}

impl VirtualDisplay for SyntheticDisplay {
    fn release(&mut self) {
        self.stop_sig.store(true, Ordering::Relaxed);

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("virtual display thread panicked");
            }
            self.bound.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for SyntheticDisplay {
    fn drop(&mut self) {
        self.release();
    }
}

fn render_loop(
    width: u32,
    height: u32,
    interval: Duration,
    target: RenderTarget,
    stop_sig: Arc<AtomicBool>,
) {
    let sleeper = SpinSleeper::default();
    let start = Instant::now();
    let mut index = 0_u64;

    while !stop_sig.load(Ordering::Relaxed) && !target.is_closed() {
        let frame_start = Instant::now();
        let frame = render_test_pattern(width, height, index).with_timestamp(start.elapsed());
        target.push_frame(frame);
        index += 1;

        if let Some(remaining) = interval.checked_sub(frame_start.elapsed()) {
            sleeper.sleep(remaining);
        }
    }

    log::info!("virtual display render thread exit after {index} frames");
}

/// Stripes with a vertical bar that moves one step per frame, rows padded to 64 bytes.
pub fn render_test_pattern(width: u32, height: u32, index: u64) -> RawFrame {
    const STRIPES: [[u8; 3]; 6] = [
        [235, 235, 235],
        [235, 235, 16],
        [16, 235, 235],
        [16, 235, 16],
        [235, 16, 235],
        [16, 16, 235],
    ];

    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let row_stride = row_bytes.div_ceil(ROW_ALIGNMENT) * ROW_ALIGNMENT;
    let mut pixel_data = vec![0u8; row_stride * height as usize];

    let bar_width = (width / 16).max(1);
    let bar_x = ((index * 8) % width as u64) as u32;

    for y in 0..height as usize {
        let row = &mut pixel_data[y * row_stride..y * row_stride + row_bytes];
        for (x, pixel) in row.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = x as u32;
            let rgb = if x >= bar_x && x < bar_x + bar_width {
                [16, 16, 16]
            } else {
                STRIPES[(x as usize * STRIPES.len()) / width as usize]
            };

            pixel[..3].copy_from_slice(&rgb);
            pixel[3] = 255;
        }
    }

    RawFrame::new(width, height, row_stride, pixel_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FramePool, bind_capture};

    #[test]
    fn test_pattern_is_padded() {
        let frame = render_test_pattern(10, 4, 0);
        assert_eq!(frame.row_stride, 64);
        assert_eq!(frame.pixel_data.len(), 64 * 4);
        assert!(frame.is_padded());
        assert_eq!(frame.pixel_data[3], 255);
        assert_eq!(frame.pixel_data[40], 0);
    }

    #[test]
    fn test_render_into_pool_until_released() {
        let geometry = DisplayGeometry::new(32, 16, 160, Default::default());
        let service = SyntheticDisplayService::new(geometry).with_refresh_rate(200);
        let pool = FramePool::new(2);
        let available = pool.frame_available();

        let target = RenderTarget::new(pool.clone());
        let mut handle = bind_capture(&service, "test", 32, 16, 160, target).unwrap();
        assert_eq!(service.bound_displays(), 1);

        assert!(available.recv_timeout(Duration::from_secs(5)).is_ok());
        let frame = pool.acquire_latest().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16));

        handle.release();
        assert_eq!(service.bound_displays(), 0);
    }
}
