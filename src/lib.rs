//! # Microphone Array Streamer
//!
//! Real-time streaming of multi-channel microphone array audio to a single
//! TCP peer, in fixed-size frames and strict capture order.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               DEVICE                                  │
//! │  ┌──────────────┐                                                     │
//! │  │ Sensor Array │  blocking batch reads (audio::source / device)      │
//! │  └──────┬───────┘                                                     │
//! │         ▼                                                             │
//! │  ┌──────────────┐   fills slot[w]    ┌─────────────────────────────┐  │
//! │  │ CaptureLoop  │──────────────────▶ │        DoubleBuffer          │  │
//! │  │   thread     │ ◀── free[w^1] ──── │  slot 0          slot 1      │  │
//! │  └──────────────┘ ─── ready[w] ────▶ │  ┌────────┐    ┌────────┐    │  │
//! │                                      │  │ Frame  │    │ Frame  │    │  │
//! │                                      │  └────────┘    └────────┘    │  │
//! │  ┌──────────────┐ ◀── ready[r] ───── │                              │  │
//! │  │ Transmitter  │ ─── free[r] ─────▶ └─────────────────────────────┘  │
//! │  │   thread     │                                                     │
//! │  └──────┬───────┘                                                     │
//! │         ▼                                                             │
//! │  ┌──────────────┐   NetworkSink (mode 'N') or DiskSink (mode 'L')      │
//! │  │  FrameSink   │                                                     │
//! │  └──────┬───────┘                                                     │
//! └─────────┼────────────────────────────────────────────────────────────┘
//!           │  TCP: "<host id>\n"  ◀── mode byte ──  then raw frames
//!           ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                                PEER                                   │
//! │        frames of samples_per_frame x channels x i16 LE, no header      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The [`session::SessionController`] accepts the peer, runs the handshake and
//! starts both threads for one [`session::Session`]. The threads share only
//! the two slots and the [`session::SessionState`] connection flag.

pub mod audio;
pub mod config;
pub mod error;
pub mod network;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Time steps per frame (about one second at 16 kHz)
    pub const DEFAULT_SAMPLES_PER_FRAME: usize = 16384;

    /// Default streamed channel count
    pub const DEFAULT_CHANNELS: usize = 8;

    /// Maximum streamed channel count
    pub const MAX_CHANNELS: usize = 8;

    /// Default sample rate of the array
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Time steps delivered per sensor read
    pub const DEFAULT_CHUNK_SAMPLES: usize = 128;

    /// Default TCP port
    pub const DEFAULT_PORT: u16 = 8000;

    /// Consecutive transient sensor failures tolerated
    pub const DEFAULT_MAX_READ_RETRIES: u32 = 3;
}
