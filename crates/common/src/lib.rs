//! Pieces shared by the livecap capture engine and CLI.
//!
//! [`clock`] maps rational frame rates onto nanosecond timestamps without
//! drift, [`config`] holds the JSON-backed settings, [`error`] the
//! [`CaptureError`] taxonomy, and [`logging`] the subscriber setup used by
//! binaries.

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::{FrameClock, FrameRate, RecordingClock, SkewMeasurement, NANOS_PER_SEC};
pub use config::{AppConfig, AudioConfig, CaptureConfig, EncoderConfig, LoggingConfig};
pub use error::{CaptureError, CaptureResult};
