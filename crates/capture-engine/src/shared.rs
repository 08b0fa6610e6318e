//! State shared between the render thread and the two session workers.
//!
//! One mutex guards everything; `frame_cv` signals "queue has data or room"
//! (and termination), `audio_cv` signals "audio may proceed". Every wait
//! re-checks the session state, so `Stopping` is the only cancellation path.

use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use livecap_common::error::CaptureError;
use serde::{Deserialize, Serialize};

use crate::frame::QueuedFrame;
use crate::queue::FrameQueue;

/// Lifecycle of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Frames are accepted and producers are throttled by backpressure.
    Recording,
    /// Shutdown requested; workers are draining and new frames may be dropped.
    Stopping,
    /// Both workers have exited.
    Terminated,
}

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Queued,
    Dropped,
}

/// Counters describing a session's progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Frames accepted into the queue.
    pub frames_submitted: u64,

    /// Frames fully written to the encoder pipe.
    pub frames_written: u64,

    /// Frames refused while stopping or discarded after a pipe failure.
    pub frames_dropped: u64,

    /// Bytes written to the encoder pipe.
    pub bytes_written: u64,

    /// Sample frames written to the audio sink.
    pub audio_frames_written: u64,

    /// Timestamp of the most recently written video frame.
    pub last_video_time_ns: Option<u64>,
}

impl SessionStats {
    /// Drop rate as a percentage.
    pub fn drop_rate(&self) -> f64 {
        let total = self.frames_submitted + self.frames_dropped;
        if total == 0 {
            return 0.0;
        }
        self.frames_dropped as f64 / total as f64 * 100.0
    }
}

/// Snapshot returned to the audio companion after it waited for video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct AudioGate {
    pub last_video_time: Option<u64>,
    pub stopping: bool,
    pub video_drained: bool,
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    pub state: SessionState,
    pub queue: FrameQueue,
    pub audio_wait_time: Option<u64>,
    pub video_drained: bool,
    pub encoder_pid: Option<u32>,
    pub stats: SessionStats,
    pub errors: Vec<String>,
    pub encoder_exit: Option<String>,
}

#[derive(Debug)]
pub(crate) struct SessionShared {
    inner: Mutex<SessionInner>,
    frame_cv: Condvar,
    audio_cv: Condvar,
}

impl SessionShared {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Recording,
                queue: FrameQueue::new(queue_capacity),
                audio_wait_time: None,
                video_drained: false,
                encoder_pid: None,
                stats: SessionStats::default(),
                errors: Vec::new(),
                encoder_exit: None,
            }),
            frame_cv: Condvar::new(),
            audio_cv: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(|e| {
            tracing::warn!("Session mutex poisoned; continuing");
            e.into_inner()
        })
    }

    fn wait_frame<'a>(
        &self,
        guard: MutexGuard<'a, SessionInner>,
    ) -> MutexGuard<'a, SessionInner> {
        self.frame_cv.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn stats(&self) -> SessionStats {
        self.lock().stats.clone()
    }

    /// Enqueue a frame from the producer.
    ///
    /// Blocks while the queue is full and the session is recording; drops the
    /// frame when the queue is full and the session is stopping, or whenever
    /// the session has terminated.
    pub fn submit(&self, mut frame: QueuedFrame) -> SubmitOutcome {
        let mut inner = self.lock();
        loop {
            if inner.state == SessionState::Terminated {
                break;
            }
            match inner.queue.push(frame) {
                Ok(()) => {
                    inner.stats.frames_submitted += 1;
                    drop(inner);
                    self.frame_cv.notify_all();
                    return SubmitOutcome::Queued;
                }
                Err(rejected) => frame = rejected,
            }
            if inner.state != SessionState::Recording {
                break;
            }
            tracing::trace!(queued = inner.queue.len(), "Frame queue full; producer waiting");
            inner = self.wait_frame(inner);
        }
        inner.stats.frames_dropped += 1;
        tracing::debug!(
            timestamp_ns = frame.timestamp_ns(),
            state = ?inner.state,
            "Dropping frame"
        );
        SubmitOutcome::Dropped
    }

    /// Next frame for the video writer; `None` once stopping with an empty queue.
    pub fn next_frame(&self) -> Option<QueuedFrame> {
        let mut inner = self.lock();
        loop {
            if let Some(frame) = inner.queue.pop() {
                drop(inner);
                self.frame_cv.notify_all();
                return Some(frame);
            }
            if inner.state != SessionState::Recording {
                return None;
            }
            inner = self.wait_frame(inner);
        }
    }

    /// Record a frame fully written to the encoder.
    pub fn record_written(&self, timestamp_ns: u64, bytes: usize) {
        let mut inner = self.lock();
        inner.stats.frames_written += 1;
        inner.stats.bytes_written += bytes as u64;
        inner.stats.last_video_time_ns = Some(timestamp_ns);
        let crossed = inner
            .audio_wait_time
            .is_some_and(|wait| timestamp_ns >= wait);
        drop(inner);
        if crossed {
            self.audio_cv.notify_all();
        }
    }

    /// Record a dequeued frame that was discarded instead of written.
    pub fn record_discarded(&self) {
        self.lock().stats.frames_dropped += 1;
    }

    pub fn record_audio(&self, frames: u64) {
        self.lock().stats.audio_frames_written += frames;
    }

    /// Move to `Stopping` and wake every waiter. Returns whether this call
    /// performed the transition.
    pub fn request_stop(&self, cause: Option<&CaptureError>) -> bool {
        let mut inner = self.lock();
        if let Some(err) = cause {
            inner.errors.push(err.to_string());
        }
        let transitioned = inner.state == SessionState::Recording;
        if transitioned {
            inner.state = SessionState::Stopping;
        }
        drop(inner);
        self.frame_cv.notify_all();
        self.audio_cv.notify_all();
        transitioned
    }

    /// The video writer has written (or discarded) its last frame.
    pub fn mark_video_drained(&self) {
        self.lock().video_drained = true;
        self.audio_cv.notify_all();
    }

    pub fn set_encoder_pid(&self, pid: u32) {
        self.lock().encoder_pid = Some(pid);
    }

    pub fn set_encoder_exit(&self, description: String, abnormal: Option<&CaptureError>) {
        let mut inner = self.lock();
        inner.encoder_exit = Some(description);
        if let Some(err) = abnormal {
            inner.errors.push(err.to_string());
        }
    }

    /// Block the audio companion until video has reached `target_ns`, the
    /// session leaves `Recording`, or `timeout` elapses.
    pub fn wait_for_video(&self, target_ns: u64, timeout: Duration) -> AudioGate {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        inner.audio_wait_time = Some(target_ns);
        while inner.state == SessionState::Recording
            && inner
                .stats
                .last_video_time_ns
                .map_or(true, |t| t < target_ns)
        {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = self
                .audio_cv
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        inner.audio_wait_time = None;
        AudioGate {
            last_video_time: inner.stats.last_video_time_ns,
            stopping: inner.state != SessionState::Recording,
            video_drained: inner.video_drained,
        }
    }

    /// Park the audio companion for up to `timeout` when it has nothing to
    /// release, unless the video side has already drained.
    pub fn wait_audio_idle(&self, timeout: Duration) {
        let inner = self.lock();
        if inner.video_drained {
            return;
        }
        let _ = self
            .audio_cv
            .wait_timeout(inner, timeout)
            .unwrap_or_else(|e| e.into_inner());
    }

    /// Both workers are gone.
    pub fn terminate(&self) {
        self.lock().state = SessionState::Terminated;
        self.frame_cv.notify_all();
        self.audio_cv.notify_all();
    }

    /// Wait until the session reaches `Terminated`.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.lock();
        while inner.state != SessionState::Terminated {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .frame_cv
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            inner = guard;
        }
        true
    }
}
