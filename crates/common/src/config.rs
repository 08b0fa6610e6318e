//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::clock::FrameRate;
use crate::error::{CaptureError, CaptureResult};

/// Default bound on frames waiting for the encoder.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Global application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture session settings.
    pub capture: CaptureConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Settings applied to every capture session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Directory where session outputs are written.
    pub output_dir: PathBuf,

    /// Frame rate numerator (frames).
    pub fps_num: u32,

    /// Frame rate denominator (seconds).
    pub fps_den: u32,

    /// Maximum number of frames waiting for the encoder.
    pub queue_capacity: usize,

    /// External encoder settings.
    pub encoder: EncoderConfig,

    /// Audio track settings.
    pub audio: AudioConfig,
}

/// External encoder invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Encoder executable, resolved on PATH.
    pub program: String,

    /// Codec arguments placed between the input and the output path.
    pub codec_args: Vec<String>,

    /// Extension of the video container written by the encoder.
    pub container: String,
}

/// Audio track parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Expected mixdown sample rate; sessions warn when the mixdown differs.
    pub sample_rate: u32,

    /// Expected mixdown channel count.
    pub channels: u16,

    /// Maximum sample frames pulled from the mixdown per chunk.
    pub chunk_frames: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "livecap=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fps_num: 30,
            fps_den: 1,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            encoder: EncoderConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            codec_args: [
                "-c:v",
                "libx264",
                "-preset",
                "veryfast",
                "-tune",
                "zerolatency",
                "-pix_fmt",
                "yuv420p",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            container: "mkv".to_string(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            chunk_frames: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CaptureConfig {
    /// The configured frame rate.
    pub fn frame_rate(&self) -> CaptureResult<FrameRate> {
        FrameRate::new(self.fps_num, self.fps_den)
    }

    /// Reject settings no session can run with.
    pub fn validate(&self) -> CaptureResult<()> {
        self.frame_rate()?;
        if self.queue_capacity == 0 {
            return Err(CaptureError::invalid_config(
                "queue_capacity must be at least 1",
            ));
        }
        if self.encoder.program.trim().is_empty() {
            return Err(CaptureError::invalid_config(
                "encoder.program must not be empty",
            ));
        }
        if self.audio.sample_rate == 0 || self.audio.channels == 0 {
            return Err(CaptureError::invalid_config(
                "audio sample_rate and channels must be non-zero",
            ));
        }
        if self.audio.chunk_frames == 0 {
            return Err(CaptureError::invalid_config(
                "audio chunk_frames must be non-zero",
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        Self::load_from(&config_file_path())
    }

    /// Load config from `config_path`, falling back to defaults.
    pub fn load_from(config_path: &Path) -> Self {
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

    pub fn save_to(&self, config_path: &Path) -> Result<(), std::io::Error> {
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
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("livecap").join("config.json")
}

/// Default capture output directory.
fn default_output_dir() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("livecap").join("captures")
}
