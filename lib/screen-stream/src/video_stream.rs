use crate::{
    CaptureRequest, FpsCounter, RawStreamWriter, ShutdownSignal, Sink, SinkError, StreamConfig,
    StreamEncoder, StreamError, StreamStats, UnitWriter,
};
use screen_capture::{DisplayGeometry, RenderTarget};
use std::{thread, time::Duration};
use video_encoder::{Dequeued, EncoderError, Profile, VideoCodec, VideoFormat, dequeue};

/// Consecutive failed drain iterations tolerated before the stream is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 30;

/// Upper bound on dequeue attempts while waiting for the end-of-stream unit.
pub const FINAL_DRAIN_POLLS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DrainStep {
    Continue,
    EndOfStream,
    SinkClosed,
}

/// Video path: the codec's input surface is the capture target, and the
/// calling thread drains compressed units straight onto the sink.
pub struct VideoStreamEncoder<C: VideoCodec> {
    codec: C,
    surface: Option<RenderTarget>,
    writer: Option<RawStreamWriter<Sink>>,
    dequeue_timeout: Duration,

    started: bool,
    end_of_stream: bool,
    sink_open: bool,
    released: bool,

    fps_counter: FpsCounter,
    stats: StreamStats,
}

impl<C: VideoCodec> VideoStreamEncoder<C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            surface: None,
            writer: None,
            dequeue_timeout: crate::DEFAULT_DEQUEUE_TIMEOUT,
            started: false,
            end_of_stream: false,
            sink_open: false,
            released: false,
            fps_counter: FpsCounter::new(),
            stats: StreamStats::default(),
        }
    }

    fn drain_once(&mut self) -> Result<DrainStep, StreamError> {
        match dequeue(&mut self.codec, self.dequeue_timeout)? {
            Dequeued::TryAgainLater => Ok(DrainStep::Continue),
            Dequeued::FormatChanged(format) => {
                log::info!(
                    "output format changed: {} {}x{}",
                    format.mime,
                    format.width,
                    format.height
                );
                Ok(DrainStep::Continue)
            }
            Dequeued::Unit(guard) => {
                let unit = guard.unit();
                let end_of_stream = unit.is_end_of_stream();

                if unit.byte_count() > 0
                    && self.sink_open
                    && let Some(writer) = self.writer.as_mut()
                {
                    match writer.write_unit(&unit) {
                        Ok(()) => {
                            self.stats.record_unit(unit.byte_count());
                            if !unit.is_codec_config() {
                                let pts = unit.presentation_time_us.max(0) as u64;
                                self.fps_counter.add_frame(Duration::from_micros(pts));
                            }
                            log::debug!(
                                "unit written: {} bytes, flags {:#x}, pts {}us",
                                unit.byte_count(),
                                unit.flags.bits(),
                                unit.presentation_time_us
                            );
                        }
                        Err(SinkError::Disconnected(e)) => {
                            log::info!("consumer disconnected: {e}");
                            self.sink_open = false;
                            return Ok(DrainStep::SinkClosed);
                        }
                        Err(e) => {
                            self.sink_open = false;
                            return Err(e.into());
                        }
                    }
                }

                // Handing the buffer back is what lets the codec make progress.
                guard.release()?;

                if end_of_stream {
                    self.end_of_stream = true;
                    return Ok(DrainStep::EndOfStream);
                }
                Ok(DrainStep::Continue)
            }
        }
    }
}

impl<C: VideoCodec> StreamEncoder for VideoStreamEncoder<C> {
    fn path(&self) -> &'static str {
        "video"
    }

    fn prepare(
        &mut self,
        _geometry: &DisplayGeometry,
        target_size: (u32, u32),
        config: &StreamConfig,
    ) -> Result<CaptureRequest, StreamError> {
        let caps = self.codec.capabilities();
        let (width, height) = caps.align(target_size.0, target_size.1);

        if (width, height) != target_size {
            log::warn!(
                "{}x{} is not aligned for {}, encoding {width}x{height}",
                target_size.0,
                target_size.1,
                caps.mime
            );
        }

        if width == 0 || height == 0 {
            return Err(StreamError::NonPositiveSize {
                width: width as i64,
                height: height as i64,
            });
        }

        if !caps.is_size_supported(width, height) {
            return Err(StreamError::ConfigurationRejected {
                codec: caps.mime.clone(),
                width,
                height,
                max_width: caps.max_width(),
                max_height: caps.max_height(),
            });
        }

        let format = VideoFormat::new(width, height)
            .with_bitrate(config.bitrate)
            .with_frame_rate(config.fps)
            .with_key_frame_interval(config.key_frame_interval)
            .with_profile(Profile::Baseline)
            .with_low_latency(true);

        self.codec.configure(&format)?;
        let surface = self.codec.create_input_surface()?;
        self.surface = Some(surface.clone());

        self.codec.start()?;
        self.started = true;
        self.dequeue_timeout = config.dequeue_timeout;

        log::info!(
            "video encoder {} started: {width}x{height} {}bps {}fps, {} output buffers",
            self.codec.name(),
            config.bitrate,
            config.fps,
            caps.output_buffer_count
        );

        Ok(CaptureRequest {
            target: surface,
            width,
            height,
        })
    }

    fn stream(&mut self, sink: Sink, shutdown: &ShutdownSignal) -> Result<(), StreamError> {
        if !self.started {
            return Err(StreamError::Other(
                "video encoder streamed before prepare".to_string(),
            ));
        }

        self.writer = Some(RawStreamWriter::new(sink));
        self.sink_open = true;

        let mut consecutive_errors = 0;

        while !shutdown.is_requested() {
            match self.drain_once() {
                Ok(DrainStep::Continue) => consecutive_errors = 0,
                Ok(DrainStep::EndOfStream) => {
                    log::info!("encoder reached end of stream");
                    break;
                }
                Ok(DrainStep::SinkClosed) => {
                    shutdown.request();
                    break;
                }
                Err(e @ StreamError::Sink(_)) => return Err(e),
                Err(StreamError::Encoder(EncoderError::Closed)) => {
                    return Err(EncoderError::Closed.into());
                }
                Err(e) => {
                    consecutive_errors += 1;
                    self.stats.transient_errors += 1;
                    log::warn!(
                        "drain iteration failed ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): {e}"
                    );

                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        return Err(e);
                    }
                    thread::sleep(self.dequeue_timeout);
                }
            }
        }

        Ok(())
    }

    fn stop_intake(&mut self) -> Result<(), StreamError> {
        if !self.started || self.end_of_stream || self.released {
            return Ok(());
        }

        self.codec.signal_end_of_input()?;

        for _ in 0..FINAL_DRAIN_POLLS {
            if self.drain_once()? == DrainStep::EndOfStream {
                log::info!("final flush complete");
                return Ok(());
            }
        }

        log::warn!("no end of stream after {FINAL_DRAIN_POLLS} polls, dropping the flush");
        Ok(())
    }

    fn join_worker(&mut self) -> Result<(), StreamError> {
        // The drain loop runs on the calling thread, there is no capture worker.
        Ok(())
    }

    fn release_encoder(&mut self) -> Result<(), StreamError> {
        if self.released {
            return Ok(());
        }
        self.released = true;

        let stopped = self.codec.stop();
        self.codec.release();
        self.writer.take();

        stopped.map_err(StreamError::from)
    }

    fn release_target(&mut self) -> Result<(), StreamError> {
        if let Some(surface) = self.surface.take() {
            surface.close();
            log::info!("encoder input surface closed");
        }
        Ok(())
    }

    fn stats(&self) -> StreamStats {
        StreamStats {
            average_fps: self.fps_counter.fps,
            ..self.stats.clone()
        }
    }
}
