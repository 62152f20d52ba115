use screen_capture::{FrameSink, RawFrame};
use std::{
    sync::{Condvar, Mutex},
    time::Duration,
};

#[derive(Default)]
struct SurfaceState {
    latest: Option<RawFrame>,
    rendered: u64,
    closed: bool,
}

/// The encoder's input surface. A logical display renders into it and the
/// encoder pulls the most recent frame, so frames rendered faster than the
/// encoder runs are overwritten.
#[derive(Default)]
pub struct InputSurface {
    state: Mutex<SurfaceState>,
    cond: Condvar,
}

impl InputSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for a frame rendered since the last call.
    pub fn wait_frame(&self, timeout: Duration) -> Option<RawFrame> {
        let state = self.state.lock().unwrap();
        let (mut state, _) = self
            .cond
            .wait_timeout_while(state, timeout, |s| s.latest.is_none() && !s.closed)
            .unwrap();

        state.latest.take()
    }

    pub fn rendered_frames(&self) -> u64 {
        self.state.lock().unwrap().rendered
    }
}

impl FrameSink for InputSurface {
    fn push_frame(&self, frame: RawFrame) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }

        state.latest = Some(frame);
        state.rendered += 1;
        self.cond.notify_all();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            state.latest = None;
            self.cond.notify_all();
            log::info!("input surface released");
        }
    }

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    fn frame(ms: u64) -> RawFrame {
        RawFrame::new(2, 2, 8, vec![0; 16]).with_timestamp(Duration::from_millis(ms))
    }

    #[test]
    fn test_latest_frame_wins() {
        let surface = InputSurface::new();
        surface.push_frame(frame(1));
        surface.push_frame(frame(2));

        let got = surface.wait_frame(Duration::from_millis(10)).unwrap();
        assert_eq!(got.timestamp, Duration::from_millis(2));
        assert!(surface.wait_frame(Duration::from_millis(10)).is_none());
        assert_eq!(surface.rendered_frames(), 2);
    }

    #[test]
    fn test_wait_wakes_on_push() {
        let surface = Arc::new(InputSurface::new());
        let producer = surface.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push_frame(frame(7));
        });

        let got = surface.wait_frame(Duration::from_secs(5));
        handle.join().unwrap();
        assert_eq!(got.unwrap().timestamp, Duration::from_millis(7));
    }

    #[test]
    fn test_closed_surface_drops_frames() {
        let surface = InputSurface::new();
        surface.close();
        surface.push_frame(frame(1));
        assert!(surface.is_closed());
        assert!(surface.wait_frame(Duration::from_millis(10)).is_none());
    }
}
