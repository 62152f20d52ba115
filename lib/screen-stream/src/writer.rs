use std::io::{self, ErrorKind, Write};
use thiserror::Error;
use video_encoder::EncodedUnit;

/// The byte-oriented consumer the stream is written to.
pub type Sink = Box<dyn Write + Send>;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("consumer disconnected: {0}")]
    Disconnected(io::Error),

    #[error("write failed: {0}")]
    Io(io::Error),
}

impl From<io::Error> for SinkError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::WriteZero => SinkError::Disconnected(e),
            _ => SinkError::Io(e),
        }
    }
}

impl SinkError {
    pub fn is_disconnected(&self) -> bool {
        matches!(self, SinkError::Disconnected(_))
    }
}

/// Serializes encoded units onto the sink. Every call blocks until the unit
/// is fully handed to the consumer.
pub trait UnitWriter: Send {
    fn write_unit(&mut self, unit: &EncodedUnit<'_>) -> Result<(), SinkError>;

    fn bytes_written(&self) -> u64;
}

/// `multipart/x-mixed-replace` style framing, one part per unit.
pub struct MultipartWriter<W: Write + Send> {
    inner: W,
    boundary: String,
    content_type: String,
    frame: Vec<u8>,
    bytes_written: u64,
}

impl<W: Write + Send> MultipartWriter<W> {
    pub fn new(inner: W, boundary: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            inner,
            boundary: boundary.into(),
            content_type: content_type.into(),
            frame: Vec::new(),
            bytes_written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn build_frame(&mut self, bytes: &[u8]) {
        self.frame.clear();
        self.frame.extend_from_slice(
            format!(
                "--{}\r\nContent-type: {}\r\nContent-Length: {}\r\n\r\n",
                self.boundary,
                self.content_type,
                bytes.len()
            )
            .as_bytes(),
        );
        self.frame.extend_from_slice(bytes);
        self.frame.extend_from_slice(b"\r\n");
    }
}

impl<W: Write + Send> UnitWriter for MultipartWriter<W> {
    fn write_unit(&mut self, unit: &EncodedUnit<'_>) -> Result<(), SinkError> {
        self.build_frame(unit.bytes);
        self.inner.write_all(&self.frame)?;
        self.inner.flush()?;
        self.bytes_written += self.frame.len() as u64;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// Unframed elementary stream. Partial writes are retried until the whole
/// unit is consumed.
pub struct RawStreamWriter<W: Write + Send> {
    inner: W,
    bytes_written: u64,
}

impl<W: Write + Send> RawStreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            bytes_written: 0,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write + Send> UnitWriter for RawStreamWriter<W> {
    fn write_unit(&mut self, unit: &EncodedUnit<'_>) -> Result<(), SinkError> {
        let mut remaining = unit.bytes;

        while !remaining.is_empty() {
            match self.inner.write(remaining) {
                Ok(0) => {
                    return Err(SinkError::Disconnected(io::Error::new(
                        ErrorKind::WriteZero,
                        "sink accepted no bytes",
                    )));
                }
                Ok(n) => {
                    remaining = &remaining[n..];
                    self.bytes_written += n as u64;
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.inner.flush()?;
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}
