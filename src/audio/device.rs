//! Audio input device enumeration and the device-backed sample source

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::{bounded, Receiver, TrySendError};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::source::{ChannelSource, SampleSource};
use crate::error::SensorError;

/// Batches buffered between the device callback and capture
const DEVICE_QUEUE_DEPTH: usize = 64;

/// Description of an input device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

/// List all available input devices
pub fn list_devices() -> Vec<DeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(inputs) = host.input_devices() {
        for device in inputs {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(DeviceInfo {
                    id: format!("input:{}", name),
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }
    devices
}

fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut rates = Vec::new();
    let mut chans = Vec::new();

    if let Ok(configs) = device.supported_input_configs() {
        for config in configs {
            for rate_val in [8000u32, 16000, 32000, 44100, 48000, 96000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !rates.contains(&rate_val)
                {
                    rates.push(rate_val);
                }
            }
            if !chans.contains(&config.channels()) {
                chans.push(config.channels());
            }
        }
    }

    rates.sort();
    chans.sort();
    (rates, chans)
}

/// Get an input device by its ID (`input:<name>` or a bare name)
pub fn get_device_by_id(id: &str) -> Result<cpal::Device, SensorError> {
    let name = id.strip_prefix("input:").unwrap_or(id);
    let devices = cpal::default_host()
        .input_devices()
        .map_err(|e| SensorError::DeviceNotFound(e.to_string()))?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(SensorError::DeviceNotFound(id.to_string()))
}

/// Get default input device
pub fn get_default_input_device() -> Result<cpal::Device, SensorError> {
    cpal::default_host()
        .default_input_device()
        .ok_or_else(|| SensorError::DeviceNotFound("No default input device".to_string()))
}

/// Sample source backed by a cpal input stream
///
/// The stream lives on its own thread; its callback converts each buffer to
/// `i16` and queues it. A full queue means capture has fallen behind the
/// device and the buffer is counted as an overflow.
pub struct DeviceSource {
    /// Batches queued by the stream callback
    inner: ChannelSource,

    /// Whether the stream thread should keep the stream alive
    running: Arc<AtomicBool>,

    /// Buffers dropped on a full queue
    overflows: Arc<AtomicU64>,

    /// Channel for stream errors
    error_rx: Receiver<SensorError>,

    /// Stream thread handle
    thread_handle: Option<JoinHandle<()>>,
}

impl DeviceSource {
    pub fn open(device_id: Option<&str>, sample_rate: u32, channels: u16) -> Result<Self, SensorError> {
        let device = match device_id {
            Some(id) => get_device_by_id(id)?,
            None => get_default_input_device()?,
        };
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (batch_tx, batch_rx) = bounded::<Vec<i16>>(DEVICE_QUEUE_DEPTH);
        let (error_tx, error_rx) = bounded::<SensorError>(16);
        let (started_tx, started_rx) = bounded::<Result<(), SensorError>>(1);
        let running = Arc::new(AtomicBool::new(true));
        let overflows = Arc::new(AtomicU64::new(0));

        let running_for_loop = running.clone();
        let overflows_cb = overflows.clone();
        let handle = thread::Builder::new()
            .name("sensor-device".to_string())
            .spawn(move || {
                let stream = device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let batch: Vec<i16> = data
                            .iter()
                            .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        if let Err(TrySendError::Full(_)) = batch_tx.try_send(batch) {
                            overflows_cb.fetch_add(1, Ordering::Relaxed);
                        }
                    },
                    move |err| {
                        let _ = error_tx.try_send(SensorError::StreamError(err.to_string()));
                    },
                    None,
                );

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = started_tx.send(Err(SensorError::StreamError(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = started_tx.send(Err(SensorError::StreamError(e.to_string())));
                    return;
                }
                let _ = started_tx.send(Ok(()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Stream is dropped here, stopping capture
            })
            .map_err(|e| SensorError::StreamError(e.to_string()))?;

        match started_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => return Err(SensorError::StreamError("device thread exited".to_string())),
        }

        tracing::info!("Opened input device {} ({} ch @ {} Hz)", name, channels, sample_rate);

        Ok(Self {
            inner: ChannelSource::new(batch_rx, channels as usize),
            running,
            overflows,
            error_rx,
            thread_handle: Some(handle),
        })
    }

    /// Device buffers lost because capture was not keeping up
    pub fn overflow_count(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }
}

impl SampleSource for DeviceSource {
    fn read(&mut self) -> Result<(), SensorError> {
        if let Ok(err) = self.error_rx.try_recv() {
            return Err(err);
        }
        self.inner.read().map_err(|e| match e {
            SensorError::Exhausted => SensorError::Disconnected,
            other => other,
        })
    }

    fn samples_in_last_read(&self) -> usize {
        self.inner.samples_in_last_read()
    }

    fn channels(&self) -> usize {
        self.inner.channels()
    }

    fn at(&self, sample: usize, channel: usize) -> i16 {
        self.inner.at(sample, channel)
    }
}

impl Drop for DeviceSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
        let overflows = self.overflow_count();
        if overflows > 0 {
            tracing::warn!("Input device overflowed {} times", overflows);
        }
    }
}
