//! Session controller: one peer, one session
//!
//! Listens on the configured port, accepts a single connection, sends the
//! host identifier, reads the mode byte and runs the matching session. The
//! status indicator follows the session through standby, connected,
//! streaming and finished.

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

use crate::audio::device::DeviceSource;
use crate::audio::source::{SampleSource, SyntheticSource};
use crate::config::{AppConfig, CaptureConfig, SourceConfig};
use crate::error::{Error, Result, SensorError};
use crate::network::handshake::{self, Mode};
use crate::network::sink::{DiskSink, NetworkSink};
use crate::session::status::{Status, StatusIndicator, TracingIndicator};
use crate::session::{Session, SessionState, SessionSummary};

/// Boxed source chosen at runtime
pub type BoxedSource = Box<dyn SampleSource + Send>;

/// Open the sample source named by the capture config
pub fn open_source(config: &CaptureConfig) -> std::result::Result<BoxedSource, SensorError> {
    match &config.source {
        SourceConfig::Synthetic { base_frequency } => Ok(Box::new(
            SyntheticSource::new(config.channels, config.sample_rate, config.chunk_samples)
                .with_base_frequency(*base_frequency),
        )),
        SourceConfig::Device { device_id } => Ok(Box::new(DeviceSource::open(
            device_id.as_deref(),
            config.sample_rate,
            config.channels as u16,
        )?)),
    }
}

#[derive(Default)]
struct StopTarget {
    stopped: bool,
    state: Option<Arc<SessionState>>,
    stream: Option<TcpStream>,
}

/// Ends the running session from another thread
///
/// Clears the connection flag and shuts the peer socket down, so a
/// transmitter blocked in a write fails out and capture follows within one
/// frame.
#[derive(Clone, Default)]
pub struct StopHandle {
    inner: Arc<Mutex<StopTarget>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let mut target = self.inner.lock();
        target.stopped = true;
        if let Some(state) = &target.state {
            state.disconnect();
        }
        if let Some(stream) = &target.stream {
            let _ = stream.shutdown(Shutdown::Both);
        }
        tracing::info!("Stop requested");
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().stopped
    }

    fn attach(&self, state: Arc<SessionState>, stream: Option<TcpStream>) {
        let mut target = self.inner.lock();
        if target.stopped {
            state.disconnect();
            if let Some(stream) = &stream {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
        target.state = Some(state);
        target.stream = stream;
    }

    fn detach(&self) {
        let mut target = self.inner.lock();
        target.state = None;
        target.stream = None;
    }
}

/// Owns the connection lifecycle around a [`Session`]
pub struct SessionController<I = TracingIndicator> {
    /// Validated application config
    config: AppConfig,

    /// Operator status feedback
    indicator: I,

    /// Identifier sent in the handshake preamble
    host_id: String,

    /// Shared with callers that need to end the session
    stop: StopHandle,
}

impl<I: StatusIndicator> SessionController<I> {
    pub fn new(config: AppConfig, indicator: I) -> Self {
        let host_id = handshake::resolve_host_id(config.host_id.as_deref());
        Self {
            config,
            indicator,
            host_id,
            stop: StopHandle::default(),
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn indicator(&self) -> &I {
        &self.indicator
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Listening socket for the single peer
    pub fn bind(&self) -> Result<TcpListener> {
        let addr = self.config.network.bind_addr()?;
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(1)?;
        Ok(socket.into())
    }

    /// Bind, wait for one peer and run its session
    pub fn serve_once(&mut self) -> Result<SessionSummary> {
        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.indicator.show(Status::Error);
                return Err(e);
            }
        };
        self.accept_and_run(&listener)
    }

    pub fn accept_and_run(&mut self, listener: &TcpListener) -> Result<SessionSummary> {
        let local = listener.local_addr()?;
        tracing::info!("{} - TCP server ready on {}", self.host_id, local);
        self.indicator.show(Status::Standby);

        let (stream, peer) = match listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                self.indicator.show(Status::Error);
                return Err(e.into());
            }
        };
        tracing::info!("Peer connected: {}", peer);
        self.handle_connection(stream)
    }

    /// Handshake with an accepted peer and run the session it asks for
    pub fn handle_connection(&mut self, mut stream: TcpStream) -> Result<SessionSummary> {
        self.indicator.show(Status::Connected);
        stream.set_nodelay(self.config.network.nodelay)?;

        handshake::write_preamble(&mut stream, &self.host_id)?;
        let mode = match handshake::read_mode(&mut stream) {
            Ok(mode) => mode,
            Err(e) => {
                tracing::warn!("Handshake failed: {}", e);
                self.indicator.show(Status::Error);
                return Err(e.into());
            }
        };
        tracing::info!("Mode {:?} selected", mode);

        let source = match open_source(&self.config.capture) {
            Ok(source) => source,
            Err(e) => {
                self.indicator.show(Status::Error);
                return Err(e.into());
            }
        };

        let state = Arc::new(SessionState::new());
        self.stop.attach(state.clone(), stream.try_clone().ok());
        self.indicator.show(Status::Streaming);

        let result = self.run_mode(mode, stream, source, state);
        self.stop.detach();
        self.indicator.show(Status::Finished);

        if let Ok(summary) = &result {
            tracing::info!(
                "Session finished: {} frames captured, {} sent ({:.1} KB), {} dropped",
                summary.stats.frames_captured,
                summary.stats.frames_sent,
                summary.stats.bytes_sent as f64 / 1024.0,
                summary.stats.frames_dropped
            );
        }
        result
    }

    fn run_mode(
        &self,
        mode: Mode,
        stream: TcpStream,
        source: BoxedSource,
        state: Arc<SessionState>,
    ) -> Result<SessionSummary> {
        let session = Session::from_config(&self.config.capture, state.clone())?;

        match mode {
            Mode::Network => {
                let sink = NetworkSink::new(stream).with_write_timeout(self.config.network.write_timeout())?;
                session.run(source, sink)
            }
            Mode::Local => {
                let sink = DiskSink::create(&self.config.recording.directory, self.config.recording.max_frames)?;
                let watcher = spawn_control_watch(stream.try_clone()?, state)?;
                let result = session.run(source, sink);
                let _ = stream.shutdown(Shutdown::Both);
                let _ = watcher.join();
                result
            }
        }
    }
}

/// End a local recording when the peer closes its connection
fn spawn_control_watch(mut stream: TcpStream, state: Arc<SessionState>) -> Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("control-watch".to_string())
        .spawn(move || {
            let mut sink = std::io::sink();
            let _ = std::io::copy(&mut stream, &mut sink);
            if state.disconnect() {
                tracing::info!("Peer closed control connection, ending recording");
            }
        })
        .map_err(Error::from)
}
