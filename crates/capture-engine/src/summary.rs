//! Session summary written next to the capture outputs at teardown.

use std::path::{Path, PathBuf};

use livecap_common::error::CaptureResult;
use serde::{Deserialize, Serialize};

use crate::shared::SessionStats;

/// JSON record of one finished capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub name: String,

    /// Wall-clock start time (RFC 3339).
    pub started_at: String,

    /// Aligned frame size.
    pub width: u32,
    pub height: u32,

    /// Frame rate as `num/den`.
    pub frame_rate: String,

    pub video_path: PathBuf,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_path: Option<PathBuf>,

    pub stats: SessionStats,

    /// How the encoder process ended.
    #[serde(default)]
    pub encoder_exit: Option<String>,

    /// End of the audio track minus the last written video frame, in ms.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub av_skew_ms: Option<f64>,

    /// Errors that moved the session into `Stopping`, oldest first.
    #[serde(default)]
    pub errors: Vec<String>,
}

impl SessionSummary {
    pub fn write(&self, path: &Path) -> CaptureResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(path: &Path) -> CaptureResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Whether the session ended without mid-stream errors.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}
