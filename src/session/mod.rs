//! Streaming session: shared state and the two pipeline threads
//!
//! A [`Session`] is the context object for one streaming run. It owns the
//! frame layout and overflow policy, and the [`SessionState`] shared by the
//! capture and transmit threads. `run` starts the transmitter first, then
//! capture, and joins both.

pub mod controller;
pub mod status;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use crate::audio::buffer::{DoubleBuffer, OverflowPolicy};
use crate::audio::capture::{CaptureLoop, CaptureReport};
use crate::audio::frame::FrameLayout;
use crate::audio::source::SampleSource;
use crate::config::CaptureConfig;
use crate::error::{Result, SensorError, SinkError};
use crate::network::sink::FrameSink;
use crate::network::transmitter::{StreamTransmitter, TransmitReport};

pub use controller::{SessionController, StopHandle};
pub use status::{Status, StatusIndicator, TracingIndicator};

/// Connection flag and counters shared by both pipeline threads
#[derive(Debug)]
pub struct SessionState {
    /// Cleared once by whichever side ends the session
    connected: AtomicBool,

    /// Frames committed by capture
    frames_captured: AtomicU64,

    /// Frames discarded by the overflow policy
    frames_dropped: AtomicU64,

    /// Frames written to the sink
    frames_sent: AtomicU64,

    /// Bytes written to the sink
    bytes_sent: AtomicU64,
}

impl SessionState {
    /// A new, active session
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            frames_captured: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// End the session. Returns whether it was still active.
    pub fn disconnect(&self) -> bool {
        self.connected.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn record_captured(&self) {
        self.frames_captured.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sent(&self, bytes: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            connected: self.is_connected(),
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connected: bool,
    pub frames_captured: u64,
    pub frames_dropped: u64,
    pub frames_sent: u64,
    pub bytes_sent: u64,
}

/// Everything known once both threads have finished
#[derive(Debug)]
pub struct SessionSummary {
    /// Capture counters, or the sensor error that ended the session
    pub capture: std::result::Result<CaptureReport, SensorError>,

    /// Transmit counters and the sink failure, if any
    pub transmit: TransmitReport,

    /// Shared counters after both threads finished
    pub stats: SessionStats,
}

/// Context for one streaming run
pub struct Session {
    /// Shape of both slots
    layout: FrameLayout,

    /// Overflow behaviour of the write end
    policy: OverflowPolicy,

    /// Consecutive transient read failures tolerated
    max_read_retries: u32,

    /// Flag and counters shared with both threads
    state: Arc<SessionState>,
}

impl Session {
    pub fn new(layout: FrameLayout, policy: OverflowPolicy, state: Arc<SessionState>) -> Self {
        Self {
            layout,
            policy,
            max_read_retries: 0,
            state,
        }
    }

    pub fn from_config(config: &CaptureConfig, state: Arc<SessionState>) -> Result<Self> {
        Ok(Self::new(config.frame_layout()?, config.overflow_policy, state)
            .with_max_read_retries(config.max_read_retries))
    }

    pub fn with_max_read_retries(mut self, retries: u32) -> Self {
        self.max_read_retries = retries;
        self
    }

    /// Run capture and transmit until the session ends
    pub fn run<S, K>(self, source: S, sink: K) -> Result<SessionSummary>
    where
        S: SampleSource + Send + 'static,
        K: FrameSink + Send + 'static,
    {
        let (writer, reader) = DoubleBuffer::new(self.layout, self.policy).split();

        // Transmitter first, so it is waiting before the first frame exists
        let transmitter = StreamTransmitter::new(sink, reader, self.state.clone());
        let tx_handle = thread::Builder::new()
            .name("stream-transmit".to_string())
            .spawn(move || transmitter.run())?;

        let state = self.state.clone();
        let retries = self.max_read_retries;
        let capture_handle = thread::Builder::new()
            .name("sensor-capture".to_string())
            .spawn(move || match CaptureLoop::new(source, writer, state.clone()) {
                Ok(capture) => capture.with_max_read_retries(retries).run(),
                Err(e) => {
                    tracing::error!("Cannot start capture: {}", e);
                    state.disconnect();
                    Err(e)
                }
            })?;

        let capture = capture_handle.join().unwrap_or_else(|_| {
            self.state.disconnect();
            Err(SensorError::StreamError("capture thread panicked".to_string()))
        });
        let transmit = tx_handle.join().unwrap_or_else(|_| TransmitReport {
            failure: Some(SinkError::WriteFailed("transmit thread panicked".to_string())),
            ..Default::default()
        });

        Ok(SessionSummary {
            capture,
            transmit,
            stats: self.state.stats(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reports_previous_state() {
        let state = SessionState::new();
        assert!(state.is_connected());
        assert!(state.disconnect());
        assert!(!state.disconnect());
        assert!(!state.stats().connected);
    }

    #[test]
    fn test_counters() {
        let state = SessionState::new();
        state.record_captured();
        state.record_captured();
        state.record_dropped();
        state.record_sent(16);

        let stats = state.stats();
        assert_eq!(stats.frames_captured, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.frames_sent, 1);
        assert_eq!(stats.bytes_sent, 16);
    }
}
