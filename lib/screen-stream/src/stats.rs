use std::{collections::VecDeque, time::Duration};

const FPS_WINDOW: Duration = Duration::from_secs(3);

/// Counters reported once the pipeline has shut down.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamStats {
    pub units_written: u64,
    pub bytes_written: u64,
    pub frames_dropped: u64,
    pub transient_errors: u64,
    pub average_fps: f32,
}

impl StreamStats {
    pub fn record_unit(&mut self, byte_count: usize) {
        self.units_written += 1;
        self.bytes_written += byte_count as u64;
    }
}

/// Sliding-window frame rate over the last three seconds of timestamps.
///
/// Timestamps are offsets from the start of the stream, so the same counter
/// works for presentation times and for wall-clock samples.
#[derive(Debug, Default, Clone)]
pub struct FpsCounter {
    pub fps: f32,
    frames: VecDeque<Duration>,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_frame(&mut self, timestamp: Duration) -> f32 {
        let window_start = timestamp.saturating_sub(FPS_WINDOW);

        while let Some(&oldest) = self.frames.front() {
            if oldest < window_start {
                self.frames.pop_front();
            } else {
                break;
            }
        }

        self.frames.push_back(timestamp);

        if self.frames.len() >= 2
            && let Some(&first) = self.frames.front()
        {
            let time_span = timestamp.saturating_sub(first);
            if time_span.as_secs_f64() > 0.0 {
                self.fps = ((self.frames.len() - 1) as f64 / time_span.as_secs_f64()) as f32;
            }
        }

        self.fps
    }
}
