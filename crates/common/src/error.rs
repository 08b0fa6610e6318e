//! Error types shared across livecap crates.

/// Top-level error type for livecap operations.
///
/// Only startup and argument errors are ever returned to the caller of a
/// session control. The mid-stream variants (`PipeWrite`, `AudioWrite`,
/// `EncoderExitAbnormal`) are produced by the worker threads, logged, and
/// recorded in the session summary.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("A capture session is already recording")]
    AlreadyRecording,

    #[error("Failed to spawn encoder process: {message}")]
    ProcessSpawn { message: String },

    #[error("Failed to spawn {thread} thread: {source}")]
    ThreadSpawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Pipe write failed after {written} of {expected} bytes: {source}")]
    PipeWrite {
        written: usize,
        expected: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Audio write failed: {message}")]
    AudioWrite { message: String },

    #[error("Encoder exited abnormally: {status}")]
    EncoderExitAbnormal { status: String },

    #[error("Frame size mismatch: got {actual} bytes, expected {expected}")]
    FrameSizeMismatch { expected: usize, actual: usize },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using CaptureError.
pub type CaptureResult<T> = Result<T, CaptureError>;

impl CaptureError {
    pub fn process_spawn(msg: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            message: msg.into(),
        }
    }

    pub fn thread_spawn(thread: &'static str, source: std::io::Error) -> Self {
        Self::ThreadSpawn { thread, source }
    }

    pub fn audio_write(msg: impl Into<String>) -> Self {
        Self::AudioWrite {
            message: msg.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_write_reports_progress_and_source() {
        let err = CaptureError::PipeWrite {
            written: 4096,
            expected: 6144,
            source: std::io::Error::from(std::io::ErrorKind::BrokenPipe),
        };
        let msg = err.to_string();
        assert!(msg.contains("4096 of 6144"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn thread_spawn_names_the_thread() {
        let err = CaptureError::thread_spawn("audio-companion", std::io::Error::other("boom"));
        assert!(err.to_string().contains("audio-companion"));
    }
}
