//! Sensor sample sources
//!
//! A source delivers interleaved `i16` samples in batches. Each call to
//! [`SampleSource::read`] blocks until the next batch is available, after
//! which the batch can be indexed by `(sample, channel)`.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::f32::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::SensorError;

/// Blocking batch reader over a multi-channel sensor
pub trait SampleSource {
    /// Block until the next batch of samples is available
    fn read(&mut self) -> Result<(), SensorError>;

    /// Number of time steps in the batch returned by the last read
    fn samples_in_last_read(&self) -> usize;

    /// Channels per time step
    fn channels(&self) -> usize;

    /// Sample `sample` of `channel` in the last batch
    fn at(&self, sample: usize, channel: usize) -> i16;
}

impl<S: SampleSource + ?Sized> SampleSource for Box<S> {
    fn read(&mut self) -> Result<(), SensorError> {
        (**self).read()
    }

    fn samples_in_last_read(&self) -> usize {
        (**self).samples_in_last_read()
    }

    fn channels(&self) -> usize {
        (**self).channels()
    }

    fn at(&self, sample: usize, channel: usize) -> i16 {
        (**self).at(sample, channel)
    }
}

/// Source fed with interleaved batches over a channel
///
/// Reads block on the channel; once every sender is dropped and the queue
/// is empty the source reports [`SensorError::Exhausted`].
pub struct ChannelSource {
    rx: Receiver<Vec<i16>>,
    channels: usize,
    batch: Vec<i16>,
}

impl ChannelSource {
    pub fn new(rx: Receiver<Vec<i16>>, channels: usize) -> Self {
        Self {
            rx,
            channels,
            batch: Vec::new(),
        }
    }

    /// Create a source together with the sender that feeds it
    pub fn channel(channels: usize, capacity: usize) -> (Sender<Vec<i16>>, Self) {
        let (tx, rx) = bounded(capacity);
        (tx, Self::new(rx, channels))
    }
}

impl SampleSource for ChannelSource {
    fn read(&mut self) -> Result<(), SensorError> {
        let batch = self.rx.recv().map_err(|_| SensorError::Exhausted)?;
        if batch.len() % self.channels != 0 {
            return Err(SensorError::UnsupportedFormat(format!(
                "batch of {} samples is not a multiple of {} channels",
                batch.len(),
                self.channels
            )));
        }
        self.batch = batch;
        Ok(())
    }

    fn samples_in_last_read(&self) -> usize {
        self.batch.len() / self.channels
    }

    fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    fn at(&self, sample: usize, channel: usize) -> i16 {
        self.batch[sample * self.channels + channel]
    }
}

/// Test-tone generator standing in for the microphone array
///
/// Channel `c` carries a sine at `base_frequency * (c + 1)`. When `realtime`
/// is set, reads are paced to the sample rate like a hardware FIFO.
pub struct SyntheticSource {
    channels: usize,
    sample_rate: u32,
    chunk_samples: usize,
    base_frequency: f32,
    amplitude: f32,
    realtime: bool,
    position: u64,
    started: Option<Instant>,
    batch: Vec<i16>,
}

impl SyntheticSource {
    pub fn new(channels: usize, sample_rate: u32, chunk_samples: usize) -> Self {
        Self {
            channels,
            sample_rate,
            chunk_samples: chunk_samples.max(1),
            base_frequency: 440.0,
            amplitude: 0.25,
            realtime: true,
            position: 0,
            started: None,
            batch: vec![0; chunk_samples.max(1) * channels],
        }
    }

    pub fn with_base_frequency(mut self, hz: f32) -> Self {
        self.base_frequency = hz;
        self
    }

    /// Generate as fast as the consumer reads
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    fn pace(&mut self) {
        let started = *self.started.get_or_insert_with(Instant::now);
        let due = Duration::from_micros(self.position * 1_000_000 / self.sample_rate.max(1) as u64);
        if let Some(wait) = due.checked_sub(started.elapsed()) {
            thread::sleep(wait);
        }
    }
}

impl SampleSource for SyntheticSource {
    fn read(&mut self) -> Result<(), SensorError> {
        if self.realtime {
            self.pace();
        }

        let rate = self.sample_rate.max(1) as f32;
        for s in 0..self.chunk_samples {
            let t = (self.position + s as u64) as f32 / rate;
            for c in 0..self.channels {
                let freq = self.base_frequency * (c + 1) as f32;
                let value = (2.0 * PI * freq * t).sin() * self.amplitude;
                self.batch[s * self.channels + c] = (value * i16::MAX as f32) as i16;
            }
        }
        self.position += self.chunk_samples as u64;
        Ok(())
    }

    fn samples_in_last_read(&self) -> usize {
        self.chunk_samples
    }

    fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    fn at(&self, sample: usize, channel: usize) -> i16 {
        self.batch[sample * self.channels + channel]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_source_batches() {
        let (tx, mut source) = ChannelSource::channel(2, 4);
        tx.send(vec![1, 2, 3, 4, 5, 6]).unwrap();
        drop(tx);

        source.read().unwrap();
        assert_eq!(source.samples_in_last_read(), 3);
        assert_eq!(source.at(1, 0), 3);
        assert_eq!(source.at(2, 1), 6);

        assert!(matches!(source.read(), Err(SensorError::Exhausted)));
    }

    #[test]
    fn test_channel_source_rejects_ragged_batch() {
        let (tx, mut source) = ChannelSource::channel(8, 1);
        tx.send(vec![0; 7]).unwrap();
        assert!(matches!(source.read(), Err(SensorError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_synthetic_source_shape() {
        let mut source = SyntheticSource::new(8, 16000, 128).unpaced();
        source.read().unwrap();
        assert_eq!(source.samples_in_last_read(), 128);
        assert_eq!(source.channels(), 8);
        // sin(0) on every channel
        for c in 0..8 {
            assert_eq!(source.at(0, c), 0);
        }
        assert!((1..128).any(|s| source.at(s, 0) != 0));
    }
}
