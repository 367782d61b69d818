//! Frame sinks: where completed frames go
//!
//! A sink accepts one fully encoded frame per call and either writes all of
//! it or fails. Any failure is terminal for the session.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SinkError;

/// Destination for encoded frames
pub trait FrameSink {
    /// Write one whole frame, blocking until done
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError>;

    /// Flush anything buffered at session end
    fn finish(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Streams frames to the connected peer
pub struct NetworkSink {
    stream: TcpStream,
    peer: String,
}

impl NetworkSink {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        Self { stream, peer }
    }

    /// Fail writes that make no progress for `timeout`
    pub fn with_write_timeout(self, timeout: Option<Duration>) -> Result<Self, SinkError> {
        self.stream.set_write_timeout(timeout)?;
        Ok(self)
    }
}

impl FrameSink for NetworkSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

/// Records frames to a raw PCM file
pub struct DiskSink {
    writer: BufWriter<File>,
    path: PathBuf,
    frames_written: u64,
    max_frames: Option<u64>,
}

impl DiskSink {
    /// Create `recording-<timestamp>.raw` under `directory`
    pub fn create(directory: &Path, max_frames: Option<u64>) -> Result<Self, SinkError> {
        std::fs::create_dir_all(directory)?;
        let name = format!("recording-{}.raw", chrono::Local::now().format("%Y%m%d-%H%M%S"));
        Self::create_file(&directory.join(name), max_frames)
    }

    pub fn create_file(path: &Path, max_frames: Option<u64>) -> Result<Self, SinkError> {
        let file = File::create(path)?;
        tracing::info!("Recording to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            frames_written: 0,
            max_frames,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl FrameSink for DiskSink {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        if let Some(limit) = self.max_frames {
            if self.frames_written >= limit {
                return Err(SinkError::LimitReached(limit));
            }
        }
        self.writer.write_all(frame)?;
        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    #[test]
    fn test_disk_sink_limit() {
        let path = std::env::temp_dir().join(format!("disk-sink-limit-{}.raw", std::process::id()));
        let mut sink = DiskSink::create_file(&path, Some(2)).unwrap();
        assert_eq!(sink.path(), path.as_path());

        sink.write_frame(&[1, 0, 2, 0]).unwrap();
        sink.write_frame(&[3, 0, 4, 0]).unwrap();
        assert!(matches!(sink.write_frame(&[5, 0, 6, 0]), Err(SinkError::LimitReached(2))));
        assert_eq!(sink.frames_written(), 2);
        sink.finish().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![1, 0, 2, 0, 3, 0, 4, 0]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_network_sink_writes_whole_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            let mut buf = Vec::new();
            stream.read_to_end(&mut buf).unwrap();
            buf
        });

        let (stream, _) = listener.accept().unwrap();
        let mut sink = NetworkSink::new(stream).with_write_timeout(Some(Duration::from_secs(5))).unwrap();
        assert!(sink.describe().starts_with("tcp://127.0.0.1:"));
        sink.write_frame(&[9; 16]).unwrap();
        sink.write_frame(&[7; 16]).unwrap();
        drop(sink);

        let received = client.join().unwrap();
        assert_eq!(received.len(), 32);
        assert!(received[..16].iter().all(|&b| b == 9));
        assert!(received[16..].iter().all(|&b| b == 7));
    }
}
