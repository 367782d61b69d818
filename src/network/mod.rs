//! Network subsystem: handshake, frame sinks and the transmit loop

pub mod handshake;
pub mod sink;
pub mod transmitter;

pub use handshake::Mode;
pub use sink::{DiskSink, FrameSink, NetworkSink};
pub use transmitter::{StreamTransmitter, TransmitReport};
