use crate::{
    CaptureRequest, FpsCounter, MultipartWriter, ShutdownSignal, Sink, SinkError, StreamConfig,
    StreamEncoder, StreamError, StreamStats, UnitWriter,
};
use crossbeam::channel::{Receiver, Sender, after, bounded, never, select};
use screen_capture::{DisplayGeometry, FramePool, FrameSink, RenderTarget};
use std::{
    ops::ControlFlow,
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use video_encoder::{BufferFlags, EncodedUnit, StillImageEncoder};

/// Still-image path: the logical display renders into a [`FramePool`] and a
/// dedicated worker encodes the latest frame as JPEG, one multipart part per
/// frame. The calling thread only waits for shutdown.
#[derive(Default)]
pub struct ImageStreamEncoder {
    encoder: Option<StillImageEncoder>,
    pool: Option<Arc<FramePool>>,
    boundary: String,
    frame_interval: Duration,

    quit_sender: Option<Sender<()>>,
    worker: Option<JoinHandle<StreamStats>>,
    fatal: Arc<Mutex<Option<StreamError>>>,
    stats: StreamStats,
}

impl ImageStreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render into `pool` instead of a pool sized from the stream config.
    pub fn with_frame_pool(mut self, pool: Arc<FramePool>) -> Self {
        self.pool = Some(pool);
        self
    }
}

impl StreamEncoder for ImageStreamEncoder {
    fn path(&self) -> &'static str {
        "image"
    }

    fn prepare(
        &mut self,
        geometry: &DisplayGeometry,
        target_size: (u32, u32),
        config: &StreamConfig,
    ) -> Result<CaptureRequest, StreamError> {
        let encoder = StillImageEncoder::new(config.quality, config.scale as f32)
            .with_target_size(target_size);
        let pool = self
            .pool
            .take()
            .unwrap_or_else(|| FramePool::new(config.frame_pool_capacity));

        log::info!(
            "image encoder: {} quality {}, {}x{} -> {}x{}, pool capacity {}",
            encoder.mime(),
            config.quality,
            geometry.width,
            geometry.height,
            target_size.0,
            target_size.1,
            pool.capacity()
        );

        self.boundary = config.boundary.clone();
        self.frame_interval = config.frame_interval();
        self.encoder = Some(encoder);
        self.pool = Some(pool.clone());

        // Frames arrive at display size and are scaled by the encoder.
        Ok(CaptureRequest {
            target: RenderTarget::new(pool),
            width: geometry.width,
            height: geometry.height,
        })
    }

    fn stream(&mut self, sink: Sink, shutdown: &ShutdownSignal) -> Result<(), StreamError> {
        let (Some(encoder), Some(pool)) = (self.encoder.clone(), self.pool.clone()) else {
            return Err(StreamError::Other(
                "image encoder streamed before prepare".to_string(),
            ));
        };

        let (quit_sender, quit_receiver) = bounded(1);
        let writer = MultipartWriter::new(sink, self.boundary.clone(), encoder.mime());

        let worker = CaptureWorker {
            encoder,
            pool,
            writer,
            frame_interval: self.frame_interval,
            quit_receiver,
            shutdown: shutdown.clone(),
            fatal: self.fatal.clone(),
            started: Instant::now(),
            last_encoded: None,
            deferred_until: None,
            fps_counter: FpsCounter::new(),
            stats: StreamStats::default(),
        };

        let handle = thread::Builder::new()
            .name("capture-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| StreamError::Other(format!("spawn capture worker failed: {e}")))?;

        self.quit_sender = Some(quit_sender);
        self.worker = Some(handle);

        shutdown.wait();

        match self.fatal.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn stop_intake(&mut self) -> Result<(), StreamError> {
        if let Some(sender) = self.quit_sender.take() {
            _ = sender.try_send(());
        }
        Ok(())
    }

    fn join_worker(&mut self) -> Result<(), StreamError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        match worker.join() {
            Ok(stats) => {
                self.stats = stats;
                log::info!("capture worker joined");
                Ok(())
            }
            Err(_) => Err(StreamError::Other("capture worker panicked".to_string())),
        }
    }

    fn release_encoder(&mut self) -> Result<(), StreamError> {
        if self.encoder.take().is_some() {
            log::info!("image encoder released");
        }
        Ok(())
    }

    fn release_target(&mut self) -> Result<(), StreamError> {
        if let Some(pool) = self.pool.take() {
            self.stats.frames_dropped += pool.dropped_frames();
            pool.close();
        }
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        self.stats.clone()
    }
}

/// Requests shutdown when the worker exits for any reason, panics included,
/// so the waiting thread never outlives it.
struct ShutdownOnExit(ShutdownSignal);

impl Drop for ShutdownOnExit {
    fn drop(&mut self) {
        self.0.request();
    }
}

struct CaptureWorker {
    encoder: StillImageEncoder,
    pool: Arc<FramePool>,
    writer: MultipartWriter<Sink>,
    frame_interval: Duration,
    quit_receiver: Receiver<()>,
    shutdown: ShutdownSignal,
    fatal: Arc<Mutex<Option<StreamError>>>,

    started: Instant,
    last_encoded: Option<Instant>,
    deferred_until: Option<Instant>,
    fps_counter: FpsCounter,
    stats: StreamStats,
}

impl CaptureWorker {
    fn run(mut self) -> StreamStats {
        let _exit_guard = ShutdownOnExit(self.shutdown.clone());
        let quit = self.quit_receiver.clone();
        let available = self.pool.frame_available();

        log::info!("capture worker started");

        loop {
            // A throttled frame stays pending until its slot in the frame interval opens.
            let deferred = match self.deferred_until {
                Some(deadline) => after(deadline.saturating_duration_since(Instant::now())),
                None => never(),
            };

            select! {
                recv(quit) -> _ => break,
                recv(available) -> msg => {
                    if msg.is_err() || self.on_frame_available().is_break() {
                        break;
                    }
                }
                recv(deferred) -> _ => {
                    self.deferred_until = None;
                    if self.encode_latest().is_break() {
                        break;
                    }
                }
            }
        }

        self.stats.average_fps = self.fps_counter.fps;
        log::info!("capture worker exit");
        self.stats
    }

    fn on_frame_available(&mut self) -> ControlFlow<()> {
        if self.deferred_until.is_some() {
            return ControlFlow::Continue(());
        }

        if let Some(last) = self.last_encoded {
            let next = last + self.frame_interval;
            if Instant::now() < next {
                self.deferred_until = Some(next);
                return ControlFlow::Continue(());
            }
        }

        self.encode_latest()
    }

    fn encode_latest(&mut self) -> ControlFlow<()> {
        let Some(frame) = self.pool.acquire_latest() else {
            return ControlFlow::Continue(());
        };
        self.last_encoded = Some(Instant::now());

        let jpeg = match self.encoder.encode(&frame) {
            Ok(jpeg) => jpeg,
            Err(e) => {
                self.stats.transient_errors += 1;
                log::warn!("encode frame failed: {e}");
                return ControlFlow::Continue(());
            }
        };

        let unit = EncodedUnit::new(
            &jpeg,
            BufferFlags::KEY_FRAME,
            frame.timestamp.as_micros() as i64,
        );

        match self.writer.write_unit(&unit) {
            Ok(()) => {
                self.stats.record_unit(jpeg.len());
                self.fps_counter.add_frame(self.started.elapsed());
                log::debug!("frame {} written: {} bytes", self.stats.units_written, jpeg.len());
                ControlFlow::Continue(())
            }
            Err(SinkError::Disconnected(e)) => {
                log::info!("consumer disconnected: {e}");
                self.shutdown.request();
                ControlFlow::Break(())
            }
            Err(e) => {
                log::warn!("write frame failed: {e}");
                *self.fatal.lock().unwrap() = Some(e.into());
                self.shutdown.request();
                ControlFlow::Break(())
            }
        }
    }
}
