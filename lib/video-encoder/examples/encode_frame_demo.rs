use screen_capture::render_test_pattern;
use std::path::PathBuf;
use video_encoder::StillImageEncoder;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let frame = render_test_pattern(1080, 1920, 0);
    log::debug!(
        "Rendered frame {}x{} with row stride {}",
        frame.width,
        frame.height,
        frame.row_stride
    );

    let encoder = StillImageEncoder::new(80, 0.5);
    let now = std::time::Instant::now();
    let jpeg = encoder.encode(&frame)?;
    log::info!("JPEG encoding time: {:.2?}, {} bytes", now.elapsed(), jpeg.len());

    let output = PathBuf::from("/tmp/screencast-frame.jpg");
    std::fs::write(&output, jpeg)?;
    log::info!("Saved {}", output.display());

    Ok(())
}
