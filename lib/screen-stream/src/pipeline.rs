use crate::{ShutdownSignal, Sink, StreamConfig, StreamError, StreamStats};
use screen_capture::{
    CaptureHandle, DisplayGeometry, DisplayService, RenderTarget, bind_capture, display_geometry,
};
use std::sync::Arc;

/// What an encoder asks the capture source to render into.
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub target: RenderTarget,
    pub width: u32,
    pub height: u32,
}

/// One encoding strategy driven by [`CapturePipeline`].
///
/// The pipeline calls `prepare`, binds the capture source to the returned
/// target, runs `stream` until it returns, then always calls the release
/// steps in declaration order, whether or not anything before them failed.
pub trait StreamEncoder {
    /// Short label used in logs.
    fn path(&self) -> &'static str;

    /// Create the encoder and its render target. `target_size` is the
    /// validated scaled size.
    fn prepare(
        &mut self,
        geometry: &DisplayGeometry,
        target_size: (u32, u32),
        config: &StreamConfig,
    ) -> Result<CaptureRequest, StreamError>;

    /// Emit encoded units to `sink` until `shutdown` fires, the sink closes
    /// or the stream ends.
    fn stream(&mut self, sink: Sink, shutdown: &ShutdownSignal) -> Result<(), StreamError>;

    fn stop_intake(&mut self) -> Result<(), StreamError>;

    fn join_worker(&mut self) -> Result<(), StreamError>;

    fn release_encoder(&mut self) -> Result<(), StreamError>;

    fn release_target(&mut self) -> Result<(), StreamError>;

    fn stats(&self) -> StreamStats;
}

/// Capture, encode and stream with coordinated shutdown, shared by every
/// [`StreamEncoder`].
pub struct CapturePipeline<E: StreamEncoder> {
    service: Arc<dyn DisplayService>,
    encoder: E,
    config: StreamConfig,
    shutdown: ShutdownSignal,
}

impl<E: StreamEncoder> CapturePipeline<E> {
    pub fn new(
        service: Arc<dyn DisplayService>,
        encoder: E,
        config: StreamConfig,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            service,
            encoder,
            config,
            shutdown,
        }
    }

    /// Run the pipeline to completion.
    ///
    /// Configuration errors return before anything is provisioned. Once
    /// provisioning starts, every acquired resource is released before this
    /// returns, on success and on every error path.
    pub fn run(mut self, sink: Sink) -> Result<StreamStats, StreamError> {
        self.config.validate()?;

        let geometry = display_geometry(self.service.as_ref());
        let target_size = self.config.target_size(&geometry)?;
        log::info!(
            "{} pipeline: display {}x{} @ {}dpi rotation {}, target {}x{}",
            self.encoder.path(),
            geometry.width,
            geometry.height,
            geometry.density_dpi,
            geometry.rotation.degrees(),
            target_size.0,
            target_size.1
        );

        let mut capture = None;
        let result = self.provision_and_stream(&geometry, target_size, sink, &mut capture);

        self.shutdown.request();
        self.release_all(capture);

        let stats = self.encoder.stats();
        log::info!(
            "{} pipeline finished: {} units, {} bytes, {} dropped frames, {:.1} fps",
            self.encoder.path(),
            stats.units_written,
            stats.bytes_written,
            stats.frames_dropped,
            stats.average_fps
        );

        result.map(|_| stats)
    }

    fn provision_and_stream(
        &mut self,
        geometry: &DisplayGeometry,
        target_size: (u32, u32),
        sink: Sink,
        capture: &mut Option<CaptureHandle>,
    ) -> Result<(), StreamError> {
        let request = self.encoder.prepare(geometry, target_size, &self.config)?;

        *capture = Some(bind_capture(
            self.service.as_ref(),
            &self.config.display_name,
            request.width,
            request.height,
            geometry.density_dpi,
            request.target,
        )?);

        if self.shutdown.is_requested() {
            log::info!("shutdown requested before streaming started");
            return Ok(());
        }

        self.encoder.stream(sink, &self.shutdown)
    }

    fn release_all(&mut self, capture: Option<CaptureHandle>) {
        log::info!("releasing {} pipeline", self.encoder.path());

        best_effort("stop encoder intake", self.encoder.stop_intake());
        best_effort("join capture worker", self.encoder.join_worker());
        best_effort("release encoder", self.encoder.release_encoder());
        best_effort("release capture target", self.encoder.release_target());

        if let Some(mut handle) = capture {
            handle.release();
        }
    }
}

fn best_effort(step: &str, result: Result<(), StreamError>) {
    match result {
        Ok(()) => log::debug!("{step}: done"),
        Err(e) => log::warn!("{step} failed: {e}"),
    }
}
