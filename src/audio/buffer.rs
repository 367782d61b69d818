//! Two-slot frame handoff between capture and transmit
//!
//! Each slot is a [`Frame`] that is owned by exactly one side at a time.
//! Ownership moves through a pair of depth-1 channels per slot:
//!
//! ```text
//!            ready[i] (frame complete)
//!   writer ─────────────────────────────▶ reader
//!          ◀─────────────────────────────
//!            free[i]  (frame consumed)
//! ```
//!
//! The writer fills its current slot, then takes the *other* slot from its
//! `free` channel (blocking while the reader still sends it, which is the
//! backpressure point) and only then hands the filled slot over on `ready`.
//! The reader takes slots from `ready` in alternating order and returns them
//! on `free` when the guard drops. The writer is therefore never more than one
//! frame ahead of the slot most recently released by the reader.

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::audio::frame::{Frame, FrameLayout};

/// Number of slots in the pipeline
pub const SLOT_COUNT: usize = 2;

/// Lifecycle of a single slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Waiting to be claimed by capture
    Free = 0,
    /// Owned by capture and being filled
    Writing = 1,
    /// Committed by capture, not yet claimed by the transmitter
    Ready = 2,
    /// Owned by the transmitter
    Reading = 3,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Free,
            1 => SlotState::Writing,
            2 => SlotState::Ready,
            _ => SlotState::Reading,
        }
    }
}

/// Observable state of both slots
///
/// Every transition is checked against the expected previous state; a
/// mismatch means both sides believed they owned the slot and is counted.
pub struct SlotStates {
    states: [AtomicU8; SLOT_COUNT],
    violations: AtomicU64,
}

impl SlotStates {
    fn new() -> Self {
        Self {
            states: [
                AtomicU8::new(SlotState::Writing as u8),
                AtomicU8::new(SlotState::Free as u8),
            ],
            violations: AtomicU64::new(0),
        }
    }

    fn transition(&self, index: usize, from: SlotState, to: SlotState) {
        if let Err(actual) = self.states[index].compare_exchange(
            from as u8,
            to as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            self.violations.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                "Slot {} moved {:?} -> {:?} while {:?}",
                index,
                from,
                to,
                SlotState::from_u8(actual)
            );
            self.states[index].store(to as u8, Ordering::Release);
        }
    }

    /// Current state of a slot
    pub fn get(&self, index: usize) -> SlotState {
        SlotState::from_u8(self.states[index].load(Ordering::Acquire))
    }

    /// Both slot states
    pub fn snapshot(&self) -> [SlotState; SLOT_COUNT] {
        [self.get(0), self.get(1)]
    }

    /// Number of transitions that found the slot in an unexpected state
    pub fn violations(&self) -> u64 {
        self.violations.load(Ordering::Relaxed)
    }
}

/// What capture does when the next slot is still being transmitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverflowPolicy {
    /// Wait for the transmitter, however long it takes
    #[default]
    #[serde(rename = "block")]
    Block,
    /// Keep the current slot and overwrite it with the next frame
    #[serde(rename = "drop")]
    DropNewest,
}

/// Result of a successful commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The filled slot was handed to the reader
    Swapped,
    /// The filled frame was discarded and its slot is reused
    Dropped,
}

/// The other end of the handoff has gone away
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot handoff closed")]
pub struct HandoffClosed;

struct Slot {
    index: usize,
    frame: Frame,
}

fn slot_channels() -> ([Sender<Slot>; SLOT_COUNT], [Receiver<Slot>; SLOT_COUNT]) {
    let (tx0, rx0) = bounded(1);
    let (tx1, rx1) = bounded(1);
    ([tx0, tx1], [rx0, rx1])
}

/// Owner of both slots for one session
pub struct DoubleBuffer {
    writer: SlotWriter,
    reader: SlotReader,
    states: Arc<SlotStates>,
}

impl DoubleBuffer {
    /// Allocate both slots. Slot 0 starts out claimed by the writer.
    pub fn new(layout: FrameLayout, policy: OverflowPolicy) -> Self {
        let states = Arc::new(SlotStates::new());
        let (ready_tx, ready_rx) = slot_channels();
        let (free_tx, free_rx) = slot_channels();

        let writer = SlotWriter {
            current: Slot {
                index: 0,
                frame: Frame::new(layout),
            },
            spare: Some(Slot {
                index: 1,
                frame: Frame::new(layout),
            }),
            free_rx,
            ready_tx,
            states: states.clone(),
            policy,
        };

        let reader = SlotReader {
            next: 0,
            ready_rx,
            free_tx,
            states: states.clone(),
        };

        Self {
            writer,
            reader,
            states,
        }
    }

    /// Shared view of slot states
    pub fn states(&self) -> Arc<SlotStates> {
        self.states.clone()
    }

    /// Separate the capture end from the transmit end
    pub fn split(self) -> (SlotWriter, SlotReader) {
        (self.writer, self.reader)
    }
}

/// Capture end of the handoff
pub struct SlotWriter {
    current: Slot,
    spare: Option<Slot>,
    free_rx: [Receiver<Slot>; SLOT_COUNT],
    ready_tx: [Sender<Slot>; SLOT_COUNT],
    states: Arc<SlotStates>,
    policy: OverflowPolicy,
}

impl SlotWriter {
    /// Index of the slot currently being filled
    pub fn index(&self) -> usize {
        self.current.index
    }

    /// Frame of the slot currently being filled
    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.current.frame
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    fn claim_other(&mut self) -> Result<Option<Slot>, HandoffClosed> {
        if let Some(spare) = self.spare.take() {
            return Ok(Some(spare));
        }

        let other = self.current.index ^ 1;
        match self.policy {
            OverflowPolicy::Block => self.free_rx[other].recv().map(Some).map_err(|_| HandoffClosed),
            OverflowPolicy::DropNewest => match self.free_rx[other].try_recv() {
                Ok(slot) => Ok(Some(slot)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(HandoffClosed),
            },
        }
    }

    /// Publish the filled frame and move to the other slot
    ///
    /// Claims the other slot first, then releases the current one. Under
    /// [`OverflowPolicy::Block`] this waits until the reader has finished
    /// with the other slot.
    pub fn commit(&mut self) -> Result<Commit, HandoffClosed> {
        let Some(next) = self.claim_other()? else {
            return Ok(Commit::Dropped);
        };

        self.states.transition(next.index, SlotState::Free, SlotState::Writing);
        let filled = std::mem::replace(&mut self.current, next);
        let index = filled.index;
        self.states.transition(index, SlotState::Writing, SlotState::Ready);
        self.ready_tx[index].send(filled).map_err(|_| HandoffClosed)?;

        Ok(Commit::Swapped)
    }
}

/// Transmit end of the handoff
pub struct SlotReader {
    next: usize,
    ready_rx: [Receiver<Slot>; SLOT_COUNT],
    free_tx: [Sender<Slot>; SLOT_COUNT],
    states: Arc<SlotStates>,
}

impl SlotReader {
    /// Index of the slot the reader waits on next
    pub fn next_index(&self) -> usize {
        self.next
    }

    /// Wait for the next committed frame
    ///
    /// Returns `None` once the writer is gone and every frame it committed
    /// has been consumed.
    pub fn acquire(&mut self) -> Option<ReadGuard<'_>> {
        let slot = self.ready_rx[self.next].recv().ok()?;
        self.states.transition(slot.index, SlotState::Ready, SlotState::Reading);
        Some(ReadGuard { reader: self, slot })
    }
}

/// A committed frame held by the reader; released to the writer on drop
pub struct ReadGuard<'a> {
    reader: &'a mut SlotReader,
    slot: Slot,
}

impl ReadGuard<'_> {
    pub fn index(&self) -> usize {
        self.slot.index
    }

    pub fn frame(&self) -> &Frame {
        &self.slot.frame
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let index = self.slot.index;
        let vacant = Slot {
            index,
            frame: Frame::vacant(self.slot.frame.layout()),
        };
        let slot = std::mem::replace(&mut self.slot, vacant);

        self.reader.states.transition(index, SlotState::Reading, SlotState::Free);
        // The writer may already be gone at session end
        let _ = self.reader.free_tx[index].send(slot);
        self.reader.next = index ^ 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn layout() -> FrameLayout {
        FrameLayout::new(4, 2).unwrap()
    }

    fn fill(writer: &mut SlotWriter, value: i16) {
        let frame = writer.frame_mut();
        for step in 0..4 {
            for channel in 0..2 {
                frame.set(step, channel, value);
            }
        }
    }

    #[test]
    fn test_frames_alternate_slots_in_order() {
        let buffer = DoubleBuffer::new(layout(), OverflowPolicy::Block);
        let states = buffer.states();
        let (mut writer, mut reader) = buffer.split();

        assert_eq!(states.snapshot(), [SlotState::Writing, SlotState::Free]);

        fill(&mut writer, 1);
        assert_eq!(writer.commit(), Ok(Commit::Swapped));
        assert_eq!(writer.index(), 1);
        assert_eq!(states.snapshot(), [SlotState::Ready, SlotState::Writing]);

        {
            let guard = reader.acquire().unwrap();
            assert_eq!(guard.index(), 0);
            assert_eq!(guard.frame().get(0, 0), 1);
            assert_eq!(states.get(0), SlotState::Reading);
        }
        assert_eq!(states.get(0), SlotState::Free);
        assert_eq!(reader.next_index(), 1);

        fill(&mut writer, 2);
        assert_eq!(writer.commit(), Ok(Commit::Swapped));
        let guard = reader.acquire().unwrap();
        assert_eq!(guard.index(), 1);
        assert_eq!(guard.frame().get(3, 1), 2);
        drop(guard);

        assert_eq!(states.violations(), 0);
    }

    #[test]
    fn test_released_slots_keep_full_frames() {
        let (mut writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();

        for round in 0..4i16 {
            fill(&mut writer, round);
            writer.commit().unwrap();
            let guard = reader.acquire().unwrap();
            assert_eq!(guard.frame().as_interleaved().len(), 8);
            assert_eq!(guard.frame().get(3, 1), round);
        }

        // Both slots have made a full round trip through the reader
        assert_eq!(writer.frame_mut().as_interleaved().len(), 8);
        fill(&mut writer, 9);
        writer.commit().unwrap();
        assert_eq!(reader.acquire().unwrap().frame().get(0, 0), 9);
    }

    #[test]
    fn test_commit_blocks_until_reader_releases() {
        let (mut writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();

        fill(&mut writer, 1);
        writer.commit().unwrap();
        let guard = reader.acquire().unwrap();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let handle = thread::spawn(move || {
            fill(&mut writer, 2);
            let result = writer.commit();
            done_tx.send(result).unwrap();
            writer
        });

        // Slot 0 is still held, so the second commit cannot complete
        assert!(done_rx.recv_timeout(Duration::from_millis(100)).is_err());

        drop(guard);
        assert_eq!(
            done_rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Ok(Commit::Swapped)
        );
        let _writer = handle.join().unwrap();

        let guard = reader.acquire().unwrap();
        assert_eq!(guard.frame().get(0, 0), 2);
    }

    #[test]
    fn test_drop_policy_reuses_slot_when_reader_is_behind() {
        let (mut writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::DropNewest).split();

        fill(&mut writer, 1);
        assert_eq!(writer.commit(), Ok(Commit::Swapped));
        fill(&mut writer, 2);
        assert_eq!(writer.commit(), Ok(Commit::Dropped));
        assert_eq!(writer.index(), 1);

        fill(&mut writer, 3);
        {
            let guard = reader.acquire().unwrap();
            assert_eq!(guard.frame().get(0, 0), 1);
        }
        assert_eq!(writer.commit(), Ok(Commit::Swapped));

        let guard = reader.acquire().unwrap();
        assert_eq!(guard.frame().get(0, 0), 3);
    }

    #[test]
    fn test_reader_drains_committed_frames_after_writer_ends() {
        let (mut writer, mut reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();

        fill(&mut writer, 7);
        writer.commit().unwrap();
        drop(writer);

        let guard = reader.acquire().unwrap();
        assert_eq!(guard.frame().get(2, 1), 7);
        drop(guard);
        assert!(reader.acquire().is_none());
    }

    #[test]
    fn test_writer_sees_closed_handoff() {
        let (mut writer, reader) = DoubleBuffer::new(layout(), OverflowPolicy::Block).split();
        drop(reader);

        // Spare slot is claimed, but nobody is left to receive the filled one
        assert_eq!(writer.commit(), Err(HandoffClosed));
    }
}
