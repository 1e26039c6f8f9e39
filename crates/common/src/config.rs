//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{CapstanError, CapstanResult};

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Recording parameters handed to each new session.
    pub recording: RecordingConfiguration,

    /// External encoder settings.
    pub encoder: EncoderConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Snapshot of everything a session needs to start.
///
/// The orchestrator copies this at `Starting`; edits made while a session
/// is active are staged and only take effect once it is idle again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfiguration {
    /// Frame width in pixels.
    pub width: u32,

    /// Frame height in pixels.
    pub height: u32,

    /// Target frame rate.
    pub fps: u32,

    /// Target video bitrate in bits per second.
    pub bitrate: u32,

    /// Directory for finished recordings. Empty means the default videos dir.
    pub output_dir: PathBuf,

    /// Capture system-output loopback audio.
    pub capture_system_audio: bool,

    /// Capture the default microphone.
    pub capture_microphone: bool,

    /// Record audio only. Chosen per session, never persisted.
    #[serde(skip)]
    pub audio_only: bool,

    /// Display to capture. `None` selects the primary display. Never persisted.
    #[serde(skip)]
    pub display: Option<String>,

    /// Requested audio sample rate (Hz).
    pub audio_sample_rate: u32,

    /// Requested audio channel count.
    pub audio_channels: u16,

    /// File name prefix of finished recordings.
    pub file_prefix: String,
}

/// External encoder process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg binary. Falls back to `PATH` and the app data dir.
    pub ffmpeg_path: Option<PathBuf>,

    /// Upper bound on waiting for an encoder or mux process to exit.
    /// `None` waits indefinitely.
    pub process_timeout_secs: Option<u64>,

    /// Intermediate videos smaller than this are treated as unusable.
    pub min_video_bytes: u64,

    /// Audio bitrate used when muxing tracks into the video container.
    pub audio_bitrate: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "capstan=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for RecordingConfiguration {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fps: 30,
            bitrate: 4_000_000,
            output_dir: PathBuf::new(),
            capture_system_audio: true,
            capture_microphone: false,
            audio_only: false,
            display: None,
            audio_sample_rate: 44_100,
            audio_channels: 2,
            file_prefix: "Kayit".to_string(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            process_timeout_secs: Some(600),
            min_video_bytes: 10 * 1024,
            audio_bitrate: "192k".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl RecordingConfiguration {
    /// Whether at least one audio source is enabled.
    pub fn has_audio_source(&self) -> bool {
        self.capture_system_audio || self.capture_microphone
    }

    /// Reject values no capture backend or encoder can honour.
    pub fn validate(&self) -> CapstanResult<()> {
        if !self.audio_only && (self.width == 0 || self.height == 0) {
            return Err(CapstanError::configuration(format!(
                "Invalid frame size {}x{}",
                self.width, self.height
            )));
        }
        if !self.audio_only && self.fps == 0 {
            return Err(CapstanError::configuration("Frame rate must be positive"));
        }
        if self.audio_sample_rate == 0 || self.audio_channels == 0 {
            return Err(CapstanError::configuration(format!(
                "Invalid audio format {}Hz/{}ch",
                self.audio_sample_rate, self.audio_channels
            )));
        }
        if self.file_prefix.trim().is_empty() {
            return Err(CapstanError::configuration("File prefix must not be empty"));
        }
        Ok(())
    }

    /// Output directory with the default applied.
    pub fn resolved_output_dir(&self) -> PathBuf {
        if self.output_dir.as_os_str().is_empty() {
            dirs_default_videos()
        } else {
            self.output_dir.clone()
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from an explicit file, falling back to defaults.
    pub fn load_from(config_path: &std::path::Path) -> Self {
        if config_path.exists() {
            match std::fs::read_to_string(config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        self.save_to(&config_file_path())
    }

    /// Save config to an explicit file.
    pub fn save_to(&self, config_path: &std::path::Path) -> Result<(), std::io::Error> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"));
    base.join("capstan").join("config.json")
}

/// Per-user application data directory.
pub fn app_data_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local").join("share"));
    base.join("capstan")
}

/// Default recordings directory.
fn dirs_default_videos() -> PathBuf {
    let base = std::env::var("XDG_VIDEOS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join("Videos"));
    base.join("Capstan")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
}
