//! Operator-facing status feedback

/// Session status shown to the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Listening for a peer (blue)
    Standby,
    /// Peer connected, handshake in progress (green)
    Connected,
    /// Pipeline running (indicator dark)
    Streaming,
    /// Server could not start or accept (red)
    Error,
    /// Session over (green briefly, then dark)
    Finished,
}

impl Status {
    /// RGB colour used by the ring indicator for this status
    pub fn color(self) -> (u8, u8, u8) {
        match self {
            Status::Standby => (0, 0, 8),
            Status::Connected | Status::Finished => (0, 8, 0),
            Status::Streaming => (0, 0, 0),
            Status::Error => (8, 0, 0),
        }
    }
}

/// Something that can display the session status
pub trait StatusIndicator {
    fn show(&mut self, status: Status);
}

/// Reports status changes as log lines
#[derive(Debug, Default)]
pub struct TracingIndicator {
    last: Option<Status>,
}

impl TracingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<Status> {
        self.last
    }
}

impl StatusIndicator for TracingIndicator {
    fn show(&mut self, status: Status) {
        let (r, g, b) = status.color();
        match status {
            Status::Error => tracing::error!("Status: {:?} (rgb {},{},{})", status, r, g, b),
            _ => tracing::info!("Status: {:?} (rgb {},{},{})", status, r, g, b),
        }
        self.last = Some(status);
    }
}
