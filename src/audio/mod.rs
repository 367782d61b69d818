//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod frame;
pub mod source;

pub use buffer::{DoubleBuffer, OverflowPolicy, SlotReader, SlotWriter};
pub use capture::{CaptureLoop, CaptureReport};
pub use device::{list_devices, DeviceSource};
pub use frame::{Frame, FrameLayout};
pub use source::{ChannelSource, SampleSource, SyntheticSource};
