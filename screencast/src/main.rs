mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Codec, Commands, parse_codec};
use screen_capture::DisplayService;
use screen_stream::{
    CapturePipeline, ImageStreamEncoder, ShutdownSignal, Sink, StreamConfig, StreamStats,
    VideoStreamEncoder,
};
use std::{io, process::ExitCode, sync::Arc};
use video_encoder::{MjpegCompressor, SoftwareCodec, VideoCodec};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    match run(cli.command) {
        Ok(stats) => {
            log::info!(
                "stream finished: {} units, {} bytes, {} dropped, {} transient errors",
                stats.units_written,
                stats.bytes_written,
                stats.frames_dropped,
                stats.transient_errors
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{e:#}");
            eprintln!("screencast: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<StreamStats> {
    let config = command.stream_config()?;
    log::debug!("stream configuration: {config:#?}");

    let service = Arc::new(command.display().display_service());

    let shutdown = ShutdownSignal::new();
    let hook = shutdown.clone();
    ctrlc::set_handler(move || {
        log::info!("termination requested");
        hook.request();
    })
    .context("install termination hook")?;

    let sink: Sink = Box::new(io::stdout());

    match command {
        Commands::Image { .. } => Ok(CapturePipeline::new(
            service,
            ImageStreamEncoder::new(),
            config,
            shutdown,
        )
        .run(sink)?),
        Commands::Video { codec, .. } => match parse_codec(codec.as_deref()) {
            Codec::Mjpeg => stream_video(
                service,
                SoftwareCodec::<MjpegCompressor>::default(),
                config,
                shutdown,
                sink,
            ),
            #[cfg(feature = "openh264")]
            Codec::H264 => stream_video(
                service,
                SoftwareCodec::<video_encoder::OpenH264Compressor>::default(),
                config,
                shutdown,
                sink,
            ),
            #[cfg(not(feature = "openh264"))]
            Codec::H264 => anyhow::bail!("h264 needs a build with the `openh264` feature"),
        },
    }
}

fn stream_video<C: VideoCodec>(
    service: Arc<dyn DisplayService>,
    codec: C,
    config: StreamConfig,
    shutdown: ShutdownSignal,
    sink: Sink,
) -> Result<StreamStats> {
    log::info!("video codec: {}", codec.name());

    let pipeline = CapturePipeline::new(service, VideoStreamEncoder::new(codec), config, shutdown);
    Ok(pipeline.run(sink)?)
}
