//! Error types for the microphone array streamer

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Sensor error: {0}")]
    Sensor(#[from] SensorError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sensor source errors
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A single read failed; the next read may succeed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Sensor disconnected")]
    Disconnected,

    /// The source has no more samples to deliver
    #[error("Sensor exhausted")]
    Exhausted,
}

impl SensorError {
    /// Whether capture may retry the read
    pub fn is_transient(&self) -> bool {
        matches!(self, SensorError::ReadFailed(_))
    }
}

/// Frame sink errors. Every variant ends the session.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Peer disconnected: {0}")]
    Disconnected(String),

    #[error("Write timed out")]
    Timeout,

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Frame limit reached: {0} frames")]
    LimitReached(u64),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match e.kind() {
            ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::WriteZero => SinkError::Disconnected(e.to_string()),
            ErrorKind::WouldBlock | ErrorKind::TimedOut => SinkError::Timeout,
            _ => SinkError::WriteFailed(e.to_string()),
        }
    }
}

/// Connection handshake errors
#[derive(Error, Debug)]
pub enum HandshakeError {
    #[error("Unknown mode command: {0:#04x}")]
    UnknownMode(u8),

    #[error("Peer closed the connection during handshake")]
    Closed,

    #[error("Invalid host identifier preamble")]
    InvalidPreamble,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Frame layout and decoding errors
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Invalid frame layout: {samples_per_frame} samples x {channels} channels")]
    InvalidLayout {
        samples_per_frame: usize,
        channels: usize,
    },

    #[error("Invalid frame size: expected {expected} bytes, got {actual}")]
    InvalidSize { expected: usize, actual: usize },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_errors_map_to_sink_errors() {
        let broken = SinkError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(matches!(broken, SinkError::Disconnected(_)));

        let timed_out = SinkError::from(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(timed_out, SinkError::Timeout));

        let other = SinkError::from(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(matches!(other, SinkError::WriteFailed(_)));
    }

    #[test]
    fn test_only_read_failures_are_transient() {
        assert!(SensorError::ReadFailed("spi".into()).is_transient());
        assert!(!SensorError::Disconnected.is_transient());
        assert!(!SensorError::Exhausted.is_transient());
    }
}
