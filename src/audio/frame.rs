//! Fixed-size multi-channel frames and their wire encoding
//!
//! A frame holds `samples_per_frame` time steps of `channels` samples each,
//! stored interleaved by time step then channel. On the wire a frame is the
//! little-endian `i16` packing of that storage with no header, so every
//! transmitted block is exactly [`FrameLayout::byte_len`] bytes.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::FrameError;

/// Shape of every frame in a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    samples_per_frame: usize,
    channels: usize,
}

impl FrameLayout {
    pub fn new(samples_per_frame: usize, channels: usize) -> Result<Self, FrameError> {
        if samples_per_frame == 0 || channels == 0 {
            return Err(FrameError::InvalidLayout {
                samples_per_frame,
                channels,
            });
        }
        Ok(Self {
            samples_per_frame,
            channels,
        })
    }

    /// Time steps per frame
    pub fn samples_per_frame(&self) -> usize {
        self.samples_per_frame
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Total samples across all channels
    pub fn len(&self) -> usize {
        self.samples_per_frame * self.channels
    }

    /// Size of one frame on the wire
    pub fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<i16>()
    }

    /// Frame duration in microseconds at the given sample rate
    pub fn duration_us(&self, sample_rate: u32) -> u64 {
        (self.samples_per_frame as u64 * 1_000_000) / sample_rate.max(1) as u64
    }
}

/// Interleaved block of samples for one time window
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    layout: FrameLayout,
    samples: Box<[i16]>,
}

impl Frame {
    /// Zero-filled frame
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            samples: vec![0i16; layout.len()].into_boxed_slice(),
        }
    }

    /// Frame without storage, left behind when a slot's frame is moved out
    pub(crate) fn vacant(layout: FrameLayout) -> Self {
        Self {
            layout,
            samples: Box::default(),
        }
    }

    /// Build a frame from interleaved samples
    pub fn from_interleaved(layout: FrameLayout, samples: Vec<i16>) -> Result<Self, FrameError> {
        if samples.len() != layout.len() {
            return Err(FrameError::InvalidSize {
                expected: layout.byte_len(),
                actual: samples.len() * std::mem::size_of::<i16>(),
            });
        }
        Ok(Self {
            layout,
            samples: samples.into_boxed_slice(),
        })
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    #[inline]
    pub fn get(&self, step: usize, channel: usize) -> i16 {
        self.samples[step * self.layout.channels + channel]
    }

    #[inline]
    pub fn set(&mut self, step: usize, channel: usize, value: i16) {
        self.samples[step * self.layout.channels + channel] = value;
    }

    /// Mutable view of one time step across all channels
    #[inline]
    pub fn step_mut(&mut self, step: usize) -> &mut [i16] {
        let channels = self.layout.channels;
        &mut self.samples[step * channels..(step + 1) * channels]
    }

    pub fn as_interleaved(&self) -> &[i16] {
        &self.samples
    }

    /// Iterate time steps, each yielding one sample per channel
    pub fn steps(&self) -> impl Iterator<Item = &[i16]> {
        self.samples.chunks_exact(self.layout.channels)
    }

    /// Append the wire encoding of this frame to `buf`
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.layout.byte_len());
        for &sample in self.samples.iter() {
            buf.put_i16_le(sample);
        }
    }

    /// Wire encoding of this frame
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.layout.byte_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }

    /// Decode one frame from exactly `layout.byte_len()` bytes
    pub fn decode(layout: FrameLayout, mut bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() != layout.byte_len() {
            return Err(FrameError::InvalidSize {
                expected: layout.byte_len(),
                actual: bytes.len(),
            });
        }
        let mut samples = Vec::with_capacity(layout.len());
        while bytes.has_remaining() {
            samples.push(bytes.get_i16_le());
        }
        Self::from_interleaved(layout, samples)
    }

    /// Per-channel level statistics
    pub fn stats(&self) -> FrameStats {
        let channels = self.layout.channels;
        let mut peak = vec![0u16; channels];
        let mut sum_squares = vec![0f64; channels];

        for step in self.steps() {
            for (c, &s) in step.iter().enumerate() {
                peak[c] = peak[c].max(s.unsigned_abs());
                sum_squares[c] += (s as f64) * (s as f64);
            }
        }

        let n = self.layout.samples_per_frame as f64;
        FrameStats {
            peak,
            rms: sum_squares.into_iter().map(|sq| (sq / n).sqrt()).collect(),
        }
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("samples_per_frame", &self.layout.samples_per_frame)
            .field("channels", &self.layout.channels)
            .finish()
    }
}

/// Per-channel level statistics for one frame
#[derive(Debug, Clone)]
pub struct FrameStats {
    pub peak: Vec<u16>,
    pub rms: Vec<f64>,
}
