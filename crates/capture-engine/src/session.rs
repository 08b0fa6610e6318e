//! Recording session management.
//!
//! At most one session is live in the process; any [`Recorder`] can start it.
//! The handle is the render thread's side of the session: it owns the frame
//! clock and submits frames, while the video writer and audio companion run
//! on their own threads. Final teardown comes back to the render thread
//! through the [`DeferredSender`] given to the recorder.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use livecap_common::clock::{FrameClock, FrameRate, SkewMeasurement, NANOS_PER_SEC};
use livecap_common::config::CaptureConfig;
use livecap_common::error::{CaptureError, CaptureResult};

use crate::audio::{AudioCompanion, AudioMixdown, AudioSource};
use crate::deferred::DeferredSender;
use crate::encoder::{block_sigpipe, EncoderCommand, EncoderProcess};
use crate::frame::{FrameLayout, QueuedFrame};
use crate::shared::{SessionShared, SessionState, SessionStats, SubmitOutcome};
use crate::summary::SessionSummary;
use crate::wav::WavSink;
use crate::writer::VideoWriter;

/// Builds the encoder invocation for a session: frame layout, frame rate and
/// the video output path.
pub type EncoderFactory =
    Arc<dyn Fn(&FrameLayout, FrameRate, &Path) -> EncoderCommand + Send + Sync>;

/// Output files of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub video: PathBuf,
    pub audio: Option<PathBuf>,
    pub summary: PathBuf,
}

impl SessionPaths {
    fn new(dir: &Path, name: &str, container: &str, with_audio: bool) -> Self {
        Self {
            video: dir.join(format!("{name}.{container}")),
            audio: with_audio.then(|| dir.join(format!("{name}.wav"))),
            summary: dir.join(format!("{name}.json")),
        }
    }
}

/// Held from a successful start until that session's teardown has run.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Starts capture sessions. The single-session limit is process-wide, shared
/// by every recorder.
pub struct Recorder {
    config: CaptureConfig,
    deferred: DeferredSender,
    encoder: EncoderFactory,
}

impl Recorder {
    /// Create a recorder that encodes with the configured ffmpeg settings.
    pub fn new(config: CaptureConfig, deferred: DeferredSender) -> CaptureResult<Self> {
        config.validate()?;
        let encoder_config = config.encoder.clone();
        let encoder: EncoderFactory =
            Arc::new(move |layout: &FrameLayout, rate: FrameRate, output: &Path| {
                EncoderCommand::ffmpeg(&encoder_config, layout, rate, output)
            });
        Ok(Self {
            config,
            deferred,
            encoder,
        })
    }

    /// Replace the encoder invocation.
    pub fn with_encoder<F>(mut self, factory: F) -> Self
    where
        F: Fn(&FrameLayout, FrameRate, &Path) -> EncoderCommand + Send + Sync + 'static,
    {
        self.encoder = Arc::new(factory);
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Whether a session is live anywhere in the process. Stays true until
    /// that session's teardown has run on its render thread.
    pub fn is_recording(&self) -> bool {
        ACTIVE.load(Ordering::SeqCst)
    }

    /// Start a session.
    ///
    /// `width` and `height` are rounded up to the encoder's alignment;
    /// `reference_ns` is the session-clock time of frame 0 and of audio
    /// sample 0. With `audio`, the live mix is written to a WAV file next to
    /// the video.
    pub fn start(
        &self,
        width: u32,
        height: u32,
        reference_ns: u64,
        audio: Option<Box<dyn AudioMixdown>>,
    ) -> CaptureResult<SessionHandle> {
        let slot = SlotGuard::claim()?;

        let layout = FrameLayout::aligned(width, height)?;
        let rate = self.config.frame_rate()?;
        let started_at = chrono::Local::now();
        let name = format!("capture-{}", started_at.format("%Y%m%d-%H%M%S-%3f"));
        let paths = SessionPaths::new(
            &self.config.output_dir,
            &name,
            &self.config.encoder.container,
            audio.is_some(),
        );
        std::fs::create_dir_all(&self.config.output_dir)?;
        let outputs = PartialOutputs::new(paths.clone());

        tracing::info!(
            name = %name,
            width = layout.width(),
            height = layout.height(),
            rate = %rate,
            video = %paths.video.display(),
            "Starting capture session"
        );

        let shared = Arc::new(SessionShared::new(self.config.queue_capacity));

        let audio = match (audio, paths.audio.as_deref()) {
            (Some(mixdown), Some(path)) => {
                if mixdown.sample_rate() != self.config.audio.sample_rate
                    || mixdown.channels() != self.config.audio.channels
                {
                    tracing::warn!(
                        mix_rate = mixdown.sample_rate(),
                        mix_channels = mixdown.channels(),
                        config_rate = self.config.audio.sample_rate,
                        config_channels = self.config.audio.channels,
                        "Mixdown format differs from configuration; recording the mixdown format"
                    );
                }
                let sink = WavSink::create(path, mixdown.sample_rate(), mixdown.channels())?;
                Some(AudioSource::new(mixdown, Box::new(sink)))
            }
            _ => None,
        };
        let sample_rate = audio.as_ref().map(|a| a.mixdown.sample_rate());

        let command = (self.encoder)(&layout, rate, &paths.video);
        let encoder = EncoderProcess::spawn(&command)?;
        let pid = encoder.pid();
        shared.set_encoder_pid(pid);

        let audio_thread = match audio {
            Some(source) => {
                let companion = AudioCompanion::new(
                    shared.clone(),
                    source,
                    reference_ns,
                    rate.frame_interval_ns(),
                    self.config.audio.chunk_frames,
                );
                let spawned = thread::Builder::new()
                    .name("audio-companion".to_string())
                    .spawn(move || companion.run());
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to start audio companion");
                        encoder.abort();
                        shared.request_stop(None);
                        shared.terminate();
                        return Err(CaptureError::thread_spawn("audio-companion", e));
                    }
                }
            }
            None => None,
        };

        let finalized = Arc::new(AtomicBool::new(false));
        let writer_thread = Arc::new(Mutex::new(None));
        let teardown = Teardown {
            shared: shared.clone(),
            finalized: finalized.clone(),
            writer_thread: writer_thread.clone(),
            summary: SummaryBase {
                name: name.clone(),
                started_at: started_at.to_rfc3339(),
                layout,
                rate,
                reference_ns,
                sample_rate,
                paths: paths.clone(),
            },
        };
        let deferred = self.deferred.clone();
        let on_done: Box<dyn FnOnce() + Send> = Box::new(move || {
            if !deferred.schedule(move || teardown.run()) {
                tracing::warn!("Render-thread task queue is closed; releasing recorder");
                ACTIVE.store(false, Ordering::SeqCst);
            }
        });

        // The writer is handed over only after its join handle is stored, so
        // the teardown it schedules always finds the handle.
        let writer = VideoWriter::new(shared.clone(), encoder, audio_thread, on_done);
        let (handoff, inbox) = mpsc::sync_channel::<VideoWriter>(1);
        let spawned = thread::Builder::new()
            .name("video-writer".to_string())
            .spawn(move || {
                if let Err(e) = block_sigpipe() {
                    tracing::warn!(error = %e, "Failed to block SIGPIPE on video writer");
                }
                if let Ok(writer) = inbox.recv() {
                    writer.run();
                }
            });
        match spawned {
            Ok(handle) => {
                *writer_thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                if let Err(mpsc::SendError(writer)) = handoff.send(writer) {
                    abandon(&shared, writer);
                    return Err(CaptureError::thread_spawn(
                        "video-writer",
                        std::io::Error::other("writer thread exited before start"),
                    ));
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start video writer");
                abandon(&shared, writer);
                return Err(CaptureError::thread_spawn("video-writer", e));
            }
        }

        outputs.keep();
        slot.keep();
        tracing::info!(name = %name, pid, "Capture session recording");

        Ok(SessionHandle {
            shared,
            clock: FrameClock::new(reference_ns, rate),
            layout,
            rate,
            name,
            paths,
            finalized,
        })
    }
}

/// Render-thread handle onto a running session.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    clock: FrameClock,
    layout: FrameLayout,
    rate: FrameRate,
    name: String,
    paths: SessionPaths,
    finalized: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.rate
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn clock_mut(&mut self) -> &mut FrameClock {
        &mut self.clock
    }

    /// If a frame is due at render time `now_ns`, advance the clock and
    /// return the timestamp to submit it with.
    pub fn capture_due(&mut self, now_ns: u64) -> Option<u64> {
        if self.clock.is_due(now_ns) {
            Some(self.clock.next_timestamp())
        } else {
            None
        }
    }

    /// Queue a frame for the encoder.
    ///
    /// Blocks while the queue is full and the session is recording. Once the
    /// session is stopping, a full queue drops the frame instead.
    pub fn submit_frame(&self, pixels: Vec<u8>, timestamp_ns: u64) -> CaptureResult<SubmitOutcome> {
        let frame = QueuedFrame::new(&self.layout, pixels, timestamp_ns)?;
        Ok(self.shared.submit(frame))
    }

    /// Request shutdown; returns immediately.
    pub fn stop(&self) {
        if self.shared.request_stop(None) {
            tracing::info!(name = %self.name, "Capture session stopping");
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn stats(&self) -> SessionStats {
        self.shared.stats()
    }

    /// Errors that moved the session into `Stopping`.
    pub fn errors(&self) -> Vec<String> {
        self.shared.lock().errors.clone()
    }

    pub fn encoder_pid(&self) -> Option<u32> {
        self.shared.lock().encoder_pid
    }

    /// Block until both workers have exited.
    pub fn wait_terminated(&self, timeout: Duration) -> bool {
        self.shared.wait_terminated(timeout)
    }

    /// Whether the render-thread teardown has run.
    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::SeqCst)
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.shared.state() == SessionState::Recording {
            self.stop();
        }
    }
}

/// Releases the session slot unless the session started.
struct SlotGuard {
    armed: bool,
}

impl SlotGuard {
    fn claim() -> CaptureResult<Self> {
        ACTIVE
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CaptureError::AlreadyRecording)?;
        Ok(Self { armed: true })
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            ACTIVE.store(false, Ordering::SeqCst);
        }
    }
}

/// Removes a failed start's output files. Declared before the audio sink and
/// encoder so it drops after both have let go of them.
struct PartialOutputs {
    paths: SessionPaths,
    armed: bool,
}

impl PartialOutputs {
    fn new(paths: SessionPaths) -> Self {
        Self { paths, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialOutputs {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in std::iter::once(&self.paths.video).chain(self.paths.audio.as_ref()) {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!(
                    error = %e,
                    path = %path.display(),
                    "Failed to remove partial output"
                ),
            }
        }
    }
}

/// Unwind a session whose writer thread never ran.
fn abandon(shared: &SessionShared, writer: VideoWriter) {
    let (encoder, audio) = writer.into_parts();
    shared.request_stop(None);
    shared.mark_video_drained();
    encoder.abort();
    if let Some(audio) = audio {
        let _ = audio.join();
    }
    shared.terminate();
}

struct SummaryBase {
    name: String,
    started_at: String,
    layout: FrameLayout,
    rate: FrameRate,
    reference_ns: u64,
    sample_rate: Option<u32>,
    paths: SessionPaths,
}

/// Final release, run on the render thread.
struct Teardown {
    shared: Arc<SessionShared>,
    finalized: Arc<AtomicBool>,
    writer_thread: Arc<Mutex<Option<JoinHandle<()>>>>,
    summary: SummaryBase,
}

impl Teardown {
    fn run(self) {
        let handle = self
            .writer_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Video writer panicked");
            }
        }

        let (stats, errors, encoder_exit) = {
            let inner = self.shared.lock();
            (
                inner.stats.clone(),
                inner.errors.clone(),
                inner.encoder_exit.clone(),
            )
        };

        let base = self.summary;
        let skew = audio_skew(&base, &stats);
        if let Some(skew) = skew {
            let interval = base.rate.frame_interval_ns();
            if skew.exceeds(interval) {
                tracing::warn!(
                    skew_ms = skew.skew_ms(),
                    "Audio track end is off the video by more than one frame"
                );
            } else {
                tracing::debug!(skew_ms = skew.skew_ms(), "Audio/video end skew");
            }
        }

        let summary = SessionSummary {
            name: base.name,
            started_at: base.started_at,
            width: base.layout.width(),
            height: base.layout.height(),
            frame_rate: base.rate.to_string(),
            video_path: base.paths.video,
            audio_path: base.paths.audio,
            stats,
            encoder_exit,
            av_skew_ms: skew.map(|s| s.skew_ms()),
            errors,
        };
        if let Err(e) = summary.write(&base.paths.summary) {
            tracing::warn!(
                error = %e,
                path = %base.paths.summary.display(),
                "Failed to write session summary"
            );
        }

        self.finalized.store(true, Ordering::SeqCst);
        ACTIVE.store(false, Ordering::SeqCst);
        tracing::info!(
            name = %summary.name,
            frames = summary.stats.frames_written,
            dropped = summary.stats.frames_dropped,
            "Capture session finalized"
        );
    }
}

/// End of the audio track against the last written video frame.
fn audio_skew(base: &SummaryBase, stats: &SessionStats) -> Option<SkewMeasurement> {
    let sample_rate = u128::from(base.sample_rate?);
    let last_video = stats.last_video_time_ns?;
    let audio_ns = u128::from(stats.audio_frames_written) * u128::from(NANOS_PER_SEC) / sample_rate;
    Some(SkewMeasurement {
        reference_ns: last_video,
        measured_ns: base.reference_ns.saturating_add(audio_ns as u64),
    })
}
