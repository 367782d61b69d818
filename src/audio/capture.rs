//! Capture loop: sensor batches into the active write slot
//!
//! Runs on a dedicated thread. Each outer iteration fills one whole frame
//! from as many blocking source reads as it takes, then commits the slot.
//! The session flag is checked once per frame, so after the session ends
//! at most the frame in progress is still captured, and it is never sent.

use std::sync::Arc;

use crate::audio::buffer::{Commit, HandoffClosed, SlotWriter};
use crate::audio::source::SampleSource;
use crate::error::SensorError;
use crate::session::SessionState;

/// Counters for one capture run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// Frames completely filled from the source
    pub frames_filled: u64,
    /// Frames handed to the transmitter
    pub frames_committed: u64,
    /// Frames discarded by the overflow policy
    pub frames_dropped: u64,
}

/// Producer side of the pipeline
pub struct CaptureLoop<S> {
    /// Sensor being read
    source: S,

    /// Capture end of the slot handoff
    writer: SlotWriter,

    /// Shared connection flag and counters
    state: Arc<SessionState>,

    /// Consecutive transient read failures tolerated
    max_read_retries: u32,

    /// Next unread sample in the last batch
    cursor: usize,

    /// Time steps in the last batch
    batch_len: usize,
}

impl<S: SampleSource> CaptureLoop<S> {
    pub fn new(source: S, mut writer: SlotWriter, state: Arc<SessionState>) -> Result<Self, SensorError> {
        let wanted = writer.frame_mut().layout().channels();
        if source.channels() < wanted {
            return Err(SensorError::UnsupportedFormat(format!(
                "source has {} channels, frames need {}",
                source.channels(),
                wanted
            )));
        }

        Ok(Self {
            source,
            writer,
            state,
            max_read_retries: 0,
            cursor: 0,
            batch_len: 0,
        })
    }

    /// Retry up to `retries` consecutive transient read failures
    pub fn with_max_read_retries(mut self, retries: u32) -> Self {
        self.max_read_retries = retries;
        self
    }

    /// Capture until the session ends or the source fails
    ///
    /// A source failure ends the session: the shared flag is cleared and the
    /// write end is dropped so the transmitter drains and stops.
    pub fn run(mut self) -> Result<CaptureReport, SensorError> {
        tracing::info!(
            "Capture started: {} samples x {} channels per frame, {:?} on overflow",
            self.writer.frame_mut().layout().samples_per_frame(),
            self.writer.frame_mut().layout().channels(),
            self.writer.policy()
        );

        let result = self.capture();
        match &result {
            Ok(report) => tracing::info!(
                "------ Recording ended ------ ({} committed, {} dropped)",
                report.frames_committed,
                report.frames_dropped
            ),
            Err(e) => {
                tracing::error!("Capture aborted: {}", e);
                self.state.disconnect();
            }
        }
        result
    }

    fn capture(&mut self) -> Result<CaptureReport, SensorError> {
        let mut report = CaptureReport::default();

        while self.state.is_connected() {
            self.fill_frame()?;
            report.frames_filled += 1;

            match self.writer.commit() {
                Ok(Commit::Swapped) => {
                    report.frames_committed += 1;
                    self.state.record_captured();
                    tracing::debug!("Frame {} committed", report.frames_committed);
                }
                Ok(Commit::Dropped) => {
                    report.frames_dropped += 1;
                    self.state.record_dropped();
                    tracing::warn!("Transmitter behind, frame dropped ({} total)", report.frames_dropped);
                }
                Err(HandoffClosed) => {
                    tracing::debug!("Transmitter gone, discarding last frame");
                    break;
                }
            }
        }

        Ok(report)
    }

    fn fill_frame(&mut self) -> Result<(), SensorError> {
        let layout = self.writer.frame_mut().layout();
        let samples_per_frame = layout.samples_per_frame();
        let channels = layout.channels();

        let mut step = 0;
        while step < samples_per_frame {
            if self.cursor >= self.batch_len {
                self.read_batch()?;
                continue;
            }

            let take = (self.batch_len - self.cursor).min(samples_per_frame - step);
            let frame = self.writer.frame_mut();
            for s in self.cursor..self.cursor + take {
                let row = frame.step_mut(step);
                for (c, sample) in row.iter_mut().enumerate().take(channels) {
                    *sample = self.source.at(s, c);
                }
                step += 1;
            }
            self.cursor += take;
        }
        Ok(())
    }

    fn read_batch(&mut self) -> Result<(), SensorError> {
        let mut failures = 0;
        loop {
            match self.source.read() {
                Ok(()) => {
                    self.cursor = 0;
                    self.batch_len = self.source.samples_in_last_read();
                    return Ok(());
                }
                Err(e) if e.is_transient() && failures < self.max_read_retries => {
                    failures += 1;
                    tracing::warn!("Sensor read failed ({}/{}): {}", failures, self.max_read_retries, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{DoubleBuffer, OverflowPolicy};
    use crate::audio::frame::FrameLayout;
    use crate::audio::source::ChannelSource;
    use std::collections::VecDeque;
    use std::thread;

    /// Source replaying a fixed script of batches and failures
    struct ScriptedSource {
        script: VecDeque<Result<Vec<i16>, SensorError>>,
        batch: Vec<i16>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<i16>, SensorError>>) -> Self {
            Self {
                script: script.into(),
                batch: Vec::new(),
            }
        }
    }

    impl SampleSource for ScriptedSource {
        fn read(&mut self) -> Result<(), SensorError> {
            match self.script.pop_front() {
                Some(Ok(batch)) => {
                    self.batch = batch;
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(SensorError::Exhausted),
            }
        }

        fn samples_in_last_read(&self) -> usize {
            self.batch.len() / 2
        }

        fn channels(&self) -> usize {
            2
        }

        fn at(&self, sample: usize, channel: usize) -> i16 {
            self.batch[sample * 2 + channel]
        }
    }

    fn layout() -> FrameLayout {
        FrameLayout::new(4, 2).unwrap()
    }

    #[test]
    fn test_frames_span_uneven_batches() {
        let (writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();
        let state = Arc::new(SessionState::new());

        // Batches of 3 steps against frames of 4 steps
        let (tx, source) = ChannelSource::channel(2, 8);
        for batch in 0..8i16 {
            let base = batch * 6;
            tx.send((base..base + 6).collect()).unwrap();
        }
        drop(tx);

        let capture = CaptureLoop::new(source, writer, state.clone()).unwrap();
        let handle = thread::spawn(move || capture.run());

        let mut received = Vec::new();
        while let Some(guard) = reader.acquire() {
            received.extend_from_slice(guard.frame().as_interleaved());
        }

        // 24 steps make 6 whole frames, then the source runs dry
        let result = handle.join().unwrap();
        assert!(matches!(result, Err(SensorError::Exhausted)));
        assert!(!state.is_connected());
        assert_eq!(received, (0..48).collect::<Vec<i16>>());
    }

    #[test]
    fn test_no_frames_once_session_ended() {
        let (writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();
        let state = Arc::new(SessionState::new());
        state.disconnect();

        let source = ScriptedSource::new(vec![Ok(vec![0; 8])]);
        let report = CaptureLoop::new(source, writer, state).unwrap().run().unwrap();

        assert_eq!(report, CaptureReport::default());
        assert!(reader.acquire().is_none());
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let (writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();
        let state = Arc::new(SessionState::new());

        let source = ScriptedSource::new(vec![
            Ok(vec![1; 4]),
            Err(SensorError::ReadFailed("crc".into())),
            Err(SensorError::ReadFailed("crc".into())),
            Ok(vec![1; 4]),
        ]);
        let capture = CaptureLoop::new(source, writer, state).unwrap().with_max_read_retries(2);
        let handle = thread::spawn(move || capture.run());

        let guard = reader.acquire().unwrap();
        assert!(guard.frame().as_interleaved().iter().all(|&s| s == 1));
        drop(guard);

        assert!(matches!(handle.join().unwrap(), Err(SensorError::Exhausted)));
    }

    #[test]
    fn test_retry_limit_aborts_session() {
        let (writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();
        let state = Arc::new(SessionState::new());

        let source = ScriptedSource::new(vec![
            Err(SensorError::ReadFailed("crc".into())),
            Err(SensorError::ReadFailed("crc".into())),
            Ok(vec![1; 8]),
        ]);
        let result = CaptureLoop::new(source, writer, state.clone())
            .unwrap()
            .with_max_read_retries(1)
            .run();

        assert!(matches!(result, Err(SensorError::ReadFailed(_))));
        assert!(!state.is_connected());
        assert!(reader.acquire().is_none());
    }

    #[test]
    fn test_rejects_source_with_too_few_channels() {
        let (writer, _reader) = DoubleBuffer::new(FrameLayout::new(4, 8).unwrap(), OverflowPolicy::Block).split();
        let source = ScriptedSource::new(Vec::new());
        let result = CaptureLoop::new(source, writer, Arc::new(SessionState::new()));
        assert!(matches!(result, Err(SensorError::UnsupportedFormat(_))));
    }
}
