use crate::{
    BufferFlags, BufferInfo, CodecCapabilities, DequeueStatus, EncoderError, InputSurface,
    OutputFormat, Result, VideoCodec, VideoFormat,
};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, bounded};
use screen_capture::{RawFrame, RenderTarget};
use spin_sleep::SpinSleeper;
use std::{
    collections::HashMap,
    marker::PhantomData,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

pub const DEFAULT_OUTPUT_BUFFER_COUNT: usize = 4;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedUnit {
    pub data: Vec<u8>,
    pub flags: BufferFlags,
}

impl CompressedUnit {
    pub fn new(data: Vec<u8>, flags: BufferFlags) -> Self {
        Self { data, flags }
    }
}

/// A software compression engine driven by [`SoftwareCodec`].
///
/// The compressor is created and used on the codec's worker thread only.
pub trait FrameCompressor: 'static {
    fn mime() -> &'static str
    where
        Self: Sized;

    fn capabilities(output_buffer_count: usize) -> CodecCapabilities
    where
        Self: Sized;

    fn open(format: &VideoFormat) -> Result<Self>
    where
        Self: Sized;

    /// Compress one frame. May return several units, e.g. parameter sets ahead of a key frame.
    fn compress(&mut self, frame: &RawFrame, force_key_frame: bool) -> Result<Vec<CompressedUnit>>;

    fn flush(&mut self) -> Result<Vec<CompressedUnit>> {
        Ok(vec![])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodecState {
    Uninitialized,
    Configured,
    Running,
    Stopped,
    Released,
}

struct OutputSlot {
    index: usize,
    data: Vec<u8>,
    flags: BufferFlags,
    presentation_time_us: i64,
}

enum OutputEvent {
    FormatChanged(OutputFormat),
    Buffer(OutputSlot),
}

/// Runs a [`FrameCompressor`] on a worker thread that pulls frames from an
/// [`InputSurface`] and fills a fixed pool of output buffers.
///
/// When every output buffer has been dequeued and not yet released the worker
/// blocks, so a slow consumer throttles encoding.
pub struct SoftwareCodec<C: FrameCompressor> {
    output_buffer_count: usize,
    state: CodecState,
    format: Option<VideoFormat>,
    surface: Option<Arc<InputSurface>>,

    stop_sig: Arc<AtomicBool>,
    eos_sig: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,

    ready_receiver: Option<Receiver<OutputEvent>>,
    free_sender: Option<Sender<OutputSlot>>,
    dequeued: HashMap<usize, OutputSlot>,

    _compressor: PhantomData<fn() -> C>,
}

impl<C: FrameCompressor> Default for SoftwareCodec<C> {
    fn default() -> Self {
        Self::new(DEFAULT_OUTPUT_BUFFER_COUNT)
    }
}

impl<C: FrameCompressor> SoftwareCodec<C> {
    pub fn new(output_buffer_count: usize) -> Self {
        assert!(output_buffer_count > 0);

        Self {
            output_buffer_count,
            state: CodecState::Uninitialized,
            format: None,
            surface: None,
            stop_sig: Arc::new(AtomicBool::new(false)),
            eos_sig: Arc::new(AtomicBool::new(false)),
            worker: None,
            ready_receiver: None,
            free_sender: None,
            dequeued: HashMap::new(),
            _compressor: PhantomData,
        }
    }

    pub fn dequeued_buffers(&self) -> usize {
        self.dequeued.len()
    }

    fn expect_state(&self, expected: CodecState, operation: &str) -> Result<()> {
        if self.state != expected {
            return Err(EncoderError::InvalidState(format!(
                "{operation} in state {:?}, expected {expected:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn join_worker(&mut self) {
        self.stop_sig.store(true, Ordering::Relaxed);
        self.free_sender.take();

        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            log::warn!("{} encoder thread panicked", C::mime());
        }

        self.ready_receiver.take();
        self.dequeued.clear();
    }
}

impl<C: FrameCompressor> VideoCodec for SoftwareCodec<C> {
    fn name(&self) -> &str {
        C::mime()
    }

    fn capabilities(&self) -> CodecCapabilities {
        C::capabilities(self.output_buffer_count)
    }

    fn configure(&mut self, format: &VideoFormat) -> Result<()> {
        self.expect_state(CodecState::Uninitialized, "configure")?;

        let caps = self.capabilities();
        if !caps.is_size_supported(format.width, format.height) {
            return Err(EncoderError::VideoEncodingFailed(format!(
                "{}x{} unsupported by {}, max {}x{}",
                format.width,
                format.height,
                caps.mime,
                caps.max_width(),
                caps.max_height()
            )));
        }

        if format.frame_rate == 0 {
            return Err(EncoderError::VideoEncodingFailed(
                "frame rate must be positive".to_string(),
            ));
        }

        log::info!(
            "configure {}: {}x{} {}bps {}fps key frame every {}s, {:?}, low latency: {}",
            caps.mime,
            format.width,
            format.height,
            format.bitrate,
            format.frame_rate,
            format.key_frame_interval,
            format.profile,
            format.low_latency
        );

        self.format = Some(format.clone());
        self.state = CodecState::Configured;
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<RenderTarget> {
        self.expect_state(CodecState::Configured, "create_input_surface")?;

        let surface = self
            .surface
            .get_or_insert_with(|| Arc::new(InputSurface::new()))
            .clone();
        Ok(RenderTarget::new(surface))
    }

    fn start(&mut self) -> Result<()> {
        self.expect_state(CodecState::Configured, "start")?;

        let (Some(format), Some(surface)) = (self.format.clone(), self.surface.clone()) else {
            return Err(EncoderError::InvalidState(
                "start without an input surface".to_string(),
            ));
        };

        let (free_sender, free_receiver) = bounded(self.output_buffer_count);
        for index in 0..self.output_buffer_count {
            _ = free_sender.send(OutputSlot {
                index,
                data: vec![],
                flags: BufferFlags::empty(),
                presentation_time_us: 0,
            });
        }

        let (ready_sender, ready_receiver) = bounded(self.output_buffer_count + 1);
        let (opened_sender, opened_receiver) = bounded(1);

        self.stop_sig.store(false, Ordering::Relaxed);
        self.eos_sig.store(false, Ordering::Relaxed);

        let worker = EncodeWorker::<C> {
            format,
            surface,
            free_receiver,
            ready_sender,
            stop_sig: self.stop_sig.clone(),
            eos_sig: self.eos_sig.clone(),
            _compressor: PhantomData,
        };

        let handle = thread::Builder::new()
            .name(format!("{}-encoder", C::mime().replace('/', "-")))
            .spawn(move || worker.run(opened_sender))
            .map_err(|e| EncoderError::VideoEncodingFailed(format!("spawn encoder thread: {e}")))?;

        self.worker = Some(handle);
        self.free_sender = Some(free_sender);
        self.ready_receiver = Some(ready_receiver);

        match opened_receiver.recv() {
            Ok(Ok(())) => {
                self.state = CodecState::Running;
                log::info!("{} encoder started", C::mime());
                Ok(())
            }
            Ok(Err(e)) => {
                self.join_worker();
                Err(e)
            }
            Err(_) => {
                self.join_worker();
                Err(EncoderError::VideoEncodingFailed(
                    "encoder thread exited during start".to_string(),
                ))
            }
        }
    }

    fn dequeue_output(&mut self, timeout: Duration) -> Result<DequeueStatus> {
        self.expect_state(CodecState::Running, "dequeue_output")?;

        let Some(receiver) = self.ready_receiver.as_ref() else {
            return Err(EncoderError::Closed);
        };

        match receiver.recv_timeout(timeout) {
            Ok(OutputEvent::FormatChanged(format)) => Ok(DequeueStatus::FormatChanged(format)),
            Ok(OutputEvent::Buffer(slot)) => {
                let info = BufferInfo {
                    index: slot.index,
                    size: slot.data.len(),
                    flags: slot.flags,
                    presentation_time_us: slot.presentation_time_us,
                };
                self.dequeued.insert(slot.index, slot);
                Ok(DequeueStatus::Buffer(info))
            }
            Err(RecvTimeoutError::Timeout) => Ok(DequeueStatus::TryAgainLater),
            Err(RecvTimeoutError::Disconnected) => Err(EncoderError::Closed),
        }
    }

    fn output_buffer(&self, index: usize) -> Option<&[u8]> {
        self.dequeued.get(&index).map(|slot| slot.data.as_slice())
    }

    fn release_output(&mut self, index: usize) -> Result<()> {
        let slot = self
            .dequeued
            .remove(&index)
            .ok_or(EncoderError::InvalidBuffer(index))?;

        if let Some(sender) = self.free_sender.as_ref() {
            _ = sender.try_send(slot);
        }

        Ok(())
    }

    fn signal_end_of_input(&mut self) -> Result<()> {
        self.expect_state(CodecState::Running, "signal_end_of_input")?;
        self.eos_sig.store(true, Ordering::Relaxed);
        log::info!("{} encoder end of input", C::mime());
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if self.state == CodecState::Running {
            self.join_worker();
            self.state = CodecState::Stopped;
            log::info!("{} encoder stopped", C::mime());
        }

        Ok(())
    }

    fn release(&mut self) {
        if self.state == CodecState::Released {
            return;
        }

        self.join_worker();
        self.surface.take();
        self.format.take();
        self.state = CodecState::Released;
        log::info!("{} encoder released", C::mime());
    }
}

impl<C: FrameCompressor> Drop for SoftwareCodec<C> {
    fn drop(&mut self) {
        self.release();
    }
}

struct EncodeWorker<C: FrameCompressor> {
    format: VideoFormat,
    surface: Arc<InputSurface>,
    free_receiver: Receiver<OutputSlot>,
    ready_sender: Sender<OutputEvent>,
    stop_sig: Arc<AtomicBool>,
    eos_sig: Arc<AtomicBool>,
    _compressor: PhantomData<fn() -> C>,
}

impl<C: FrameCompressor> EncodeWorker<C> {
    fn run(self, opened_sender: Sender<Result<()>>) {
        let mut compressor = match C::open(&self.format) {
            Ok(v) => {
                _ = opened_sender.send(Ok(()));
                v
            }
            Err(e) => {
                _ = opened_sender.send(Err(e));
                return;
            }
        };

        _ = self.ready_sender.send(OutputEvent::FormatChanged(OutputFormat {
            mime: C::mime().to_string(),
            width: self.format.width,
            height: self.format.height,
        }));

        let sleeper = SpinSleeper::default();
        let frame_interval = Duration::from_secs_f64(1.0 / self.format.frame_rate.max(1) as f64);
        let key_frame_interval = self.format.key_frame_interval_frames();
        let mut frames_since_key_frame = key_frame_interval;
        let mut last_encode: Option<Instant> = None;
        let mut last_pts = 0_i64;

        loop {
            if self.stop_sig.load(Ordering::Relaxed) {
                break;
            }

            if self.eos_sig.load(Ordering::Relaxed) {
                self.finish(&mut compressor, last_pts);
                break;
            }

            if let Some(last) = last_encode {
                let elapsed = last.elapsed();
                if elapsed < frame_interval {
                    sleeper.sleep((frame_interval - elapsed).min(POLL_INTERVAL));
                    continue;
                }
            }

            let Some(frame) = self.surface.wait_frame(POLL_INTERVAL) else {
                continue;
            };

            last_encode = Some(Instant::now());
            let force_key_frame = frames_since_key_frame >= key_frame_interval;

            let units = match compressor.compress(&frame, force_key_frame) {
                Ok(units) => units,
                Err(e) => {
                    log::warn!("compress frame failed: {e}");
                    continue;
                }
            };

            if units.iter().any(|u| u.flags.contains(BufferFlags::KEY_FRAME)) {
                frames_since_key_frame = 0;
            }
            frames_since_key_frame += 1;

            last_pts = last_pts.max(frame.timestamp.as_micros() as i64);
            for unit in units {
                if !self.emit(unit, last_pts) {
                    return;
                }
            }
        }

        log::info!("{} encoder thread exit", C::mime());
    }

    fn finish(&self, compressor: &mut C, pts: i64) {
        let mut units = compressor.flush().unwrap_or_else(|e| {
            log::warn!("flush encoder failed: {e}");
            vec![]
        });

        match units.last_mut() {
            Some(last) => last.flags.insert(BufferFlags::END_OF_STREAM),
            None => units.push(CompressedUnit::new(vec![], BufferFlags::END_OF_STREAM)),
        }

        for unit in units {
            if !self.emit(unit, pts) {
                return;
            }
        }
    }

    // Blocks until an output buffer is free, which is where backpressure bites.
    fn emit(&self, unit: CompressedUnit, presentation_time_us: i64) -> bool {
        let mut slot = loop {
            match self.free_receiver.recv_timeout(POLL_INTERVAL) {
                Ok(slot) => break slot,
                Err(RecvTimeoutError::Timeout) => {
                    if self.stop_sig.load(Ordering::Relaxed) {
                        return false;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return false,
            }
        };

        slot.data.clear();
        slot.data.extend_from_slice(&unit.data);
        slot.flags = unit.flags;
        slot.presentation_time_us = presentation_time_us;

        self.ready_sender.send(OutputEvent::Buffer(slot)).is_ok()
    }
}
