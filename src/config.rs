//! Application configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file
//! at all) gives the stock 8-channel, 16384-sample setup on port 8000.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::buffer::OverflowPolicy;
use crate::audio::frame::FrameLayout;
use crate::constants::*;
use crate::error::{Error, FrameError};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Identifier announced to the peer; defaults to the host name
    pub host_id: Option<String>,

    /// Frame shape and sample source
    pub capture: CaptureConfig,

    /// Listening socket and peer writes
    pub network: NetworkConfig,

    /// Local recording mode
    pub recording: RecordingConfig,
}

/// Where samples come from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Generated test tones
    Synthetic {
        #[serde(default = "default_base_frequency")]
        base_frequency: f32,
    },
    /// An audio input device; the default input when `device_id` is unset
    Device {
        #[serde(default)]
        device_id: Option<String>,
    },
}

fn default_base_frequency() -> f32 {
    440.0
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Device { device_id: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Time steps per frame
    pub samples_per_frame: usize,

    /// Channels per time step, at most `MAX_CHANNELS`
    pub channels: usize,

    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Time steps per synthetic source read
    pub chunk_samples: usize,

    /// Behaviour when the transmitter still holds the next slot
    pub overflow_policy: OverflowPolicy,

    /// Consecutive transient read failures tolerated before aborting
    pub max_read_retries: u32,

    /// Where samples come from
    pub source: SourceConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            overflow_policy: OverflowPolicy::Block,
            max_read_retries: DEFAULT_MAX_READ_RETRIES,
            source: SourceConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn frame_layout(&self) -> Result<FrameLayout, FrameError> {
        FrameLayout::new(self.samples_per_frame, self.channels)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on
    pub bind_address: String,

    /// TCP port to listen on
    pub port: u16,

    /// A frame write making no progress for this long ends the session
    pub write_timeout_ms: Option<u64>,

    /// Disable Nagle's algorithm on the peer socket
    pub nodelay: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            write_timeout_ms: None,
            nodelay: true,
        }
    }
}

impl NetworkConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, Error> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid bind address {}: {}", self.bind_address, e)))
    }

    /// Write timeout for the peer socket; zero means none
    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.filter(|&ms| ms > 0).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Directory receiving `recording-<timestamp>.raw` files
    pub directory: PathBuf,

    /// Stop a local recording after this many frames
    pub max_frames: Option<u64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        let directory = project_dirs()
            .map(|dirs| dirs.data_dir().join("recordings"))
            .unwrap_or_else(|| PathBuf::from("recordings"));
        Self {
            directory,
            max_frames: None,
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "mic-array-streamer")
}

impl AppConfig {
    /// Default config file location for this user
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from `path`, else the default location if it exists, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::default_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(&p)
                    .map_err(|e| Error::Config(format!("cannot read {}: {}", p.display(), e)))?;
                tracing::info!("Loaded config from {}", p.display());
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), Error> {
        let capture = &self.capture;
        capture.frame_layout()?;
        if capture.channels > MAX_CHANNELS {
            return Err(Error::Config(format!(
                "channels must be at most {}, got {}",
                MAX_CHANNELS, capture.channels
            )));
        }
        if capture.sample_rate == 0 || capture.chunk_samples == 0 {
            return Err(Error::Config("sample_rate and chunk_samples must be non-zero".into()));
        }
        if self.network.port == 0 {
            return Err(Error::Config("port must be non-zero".into()));
        }
        self.network.bind_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_device() {
        let config = AppConfig::default();
        assert_eq!(config.capture.samples_per_frame, 16384);
        assert_eq!(config.capture.channels, 8);
        assert_eq!(config.network.port, 8000);
        assert_eq!(config.capture.overflow_policy, OverflowPolicy::Block);
        assert!(config.validate().is_ok());
        assert_eq!(config.capture.frame_layout().unwrap().byte_len(), 262_144);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = AppConfig::from_toml_str(
            r#"
            host_id = "array-1"

            [capture]
            samples_per_frame = 4
            channels = 2
            overflow_policy = "drop"

            [capture.source]
            type = "synthetic"

            [network]
            port = 9000
            write_timeout_ms = 2500
            "#,
        )
        .unwrap();

        assert_eq!(config.host_id.as_deref(), Some("array-1"));
        assert_eq!(config.capture.samples_per_frame, 4);
        assert_eq!(config.capture.sample_rate, DEFAULT_SAMPLE_RATE);
        assert_eq!(config.capture.overflow_policy, OverflowPolicy::DropNewest);
        assert!(matches!(
            config.capture.source,
            SourceConfig::Synthetic { base_frequency } if base_frequency == 440.0
        ));
        assert_eq!(config.network.port, 9000);
        assert_eq!(config.network.write_timeout(), Some(Duration::from_millis(2500)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.capture.channels = 0;
        assert!(matches!(config.validate(), Err(Error::Frame(_))));

        let mut config = AppConfig::default();
        config.capture.channels = MAX_CHANNELS + 1;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.network.bind_address = "not an address".into();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_write_timeout_means_none() {
        let config = AppConfig::from_toml_str("[network]\nwrite_timeout_ms = 0\n").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.write_timeout(), None);

        let mut network = NetworkConfig::default();
        assert_eq!(network.write_timeout(), None);
        network.write_timeout_ms = Some(1);
        assert_eq!(network.write_timeout(), Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_load_explicit_file() {
        let path = std::env::temp_dir().join(format!("mic-array-config-{}.toml", std::process::id()));
        std::fs::write(&path, "[network]\nport = 8123\n").unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.network.port, 8123);
        let _ = std::fs::remove_file(&path);

        assert!(AppConfig::load(Some(Path::new("/nonexistent/config.toml"))).is_err());
    }
}
