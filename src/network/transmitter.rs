//! Transmit loop: committed slots out to the sink
//!
//! Takes slots from the reader end in alternating order, writes each frame
//! in a single blocking call and hands the slot back. A sink failure is the
//! normal way a session ends: the shared flag is cleared, the slot released
//! and the loop stops without retrying.

use bytes::BytesMut;
use std::sync::Arc;

use crate::audio::buffer::SlotReader;
use crate::error::SinkError;
use crate::network::sink::FrameSink;
use crate::session::SessionState;

/// Outcome of one transmit run
#[derive(Debug, Default)]
pub struct TransmitReport {
    /// Frames fully written to the sink
    pub frames_sent: u64,

    /// Bytes fully written to the sink
    pub bytes_sent: u64,

    /// Sink error that ended the run, if any
    pub failure: Option<SinkError>,
}

/// Consumer side of the pipeline
pub struct StreamTransmitter<K> {
    /// Destination for encoded frames
    sink: K,

    /// Transmit end of the slot handoff
    reader: SlotReader,

    /// Shared connection flag and counters
    state: Arc<SessionState>,

    /// Encoding buffer (reused to avoid allocations)
    scratch: BytesMut,
}

impl<K: FrameSink> StreamTransmitter<K> {
    pub fn new(sink: K, reader: SlotReader, state: Arc<SessionState>) -> Self {
        Self {
            sink,
            reader,
            state,
            scratch: BytesMut::new(),
        }
    }

    /// Send frames until the sink fails or capture has ended and drained
    pub fn run(mut self) -> TransmitReport {
        tracing::info!("Streaming to {}", self.sink.describe());
        let mut report = TransmitReport::default();

        while let Some(guard) = self.reader.acquire() {
            self.scratch.clear();
            guard.frame().encode_into(&mut self.scratch);

            match self.sink.write_frame(&self.scratch) {
                Ok(()) => {
                    report.frames_sent += 1;
                    report.bytes_sent += self.scratch.len() as u64;
                    self.state.record_sent(self.scratch.len() as u64);
                    tracing::debug!("Slot {} sent ({} frames)", guard.index(), report.frames_sent);
                }
                Err(e) => {
                    // Assume a failed write means the peer ended the session
                    self.state.disconnect();
                    drop(guard);
                    tracing::info!("Network disconnected: {}", e);
                    report.failure = Some(e);
                    break;
                }
            }
        }

        if report.failure.is_none() {
            tracing::info!("Capture ended, transmitter drained");
        }
        if let Err(e) = self.sink.finish() {
            tracing::warn!("Failed to flush {}: {}", self.sink.describe(), e);
        }
        report
    }
}
