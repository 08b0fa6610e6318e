//! livecap Capture Engine
//!
//! Records a running application's rendered frames and live audio mix while
//! the application keeps rendering at its own pace. Frames are piped raw to
//! an external encoder process; audio is written to a WAV file, released no
//! faster than the video it accompanies.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ render thread                                            │
//! │   SessionHandle::capture_due ─► submit_frame ──┐         │
//! │   DeferredQueue::run_pending ◄─────────────┐   │         │
//! └────────────────────────────────────────────┼───┼─────────┘
//!                                              │   ▼
//!                      teardown ┌──────────────┴──────────┐
//!                               │ FrameQueue (session     │
//!                               │ mutex + two condvars)   │
//!                               └──────┬─────────▲────────┘
//!                                      ▼         │ last_video_time
//! ┌─────────────┐  pipe:3  ┌───────────────┐   ┌─┴───────────────┐
//! │ encoder     │◄─────────│ video-writer  │   │ audio-companion │─► .wav
//! │ (ffmpeg)    │          └───────────────┘   └─────────────────┘
//! └─────────────┘
//! ```

pub mod audio;
pub mod deferred;
pub mod encoder;
pub mod frame;
pub mod queue;
pub mod session;
pub mod shared;
pub mod summary;
pub mod wav;

mod writer;

pub use audio::{AudioMixdown, AudioSink};
pub use deferred::{deferred_queue, DeferredQueue, DeferredSender};
pub use encoder::{encoder_available, EncoderCommand, EncoderExit};
pub use frame::FrameLayout;
pub use session::*;
pub use shared::{SessionState, SessionStats, SubmitOutcome};
pub use summary::SessionSummary;
pub use wav::WavSink;
