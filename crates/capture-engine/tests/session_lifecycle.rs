//! End-to-end sessions against `/bin/sh` scripts standing in for the encoder.
//!
//! Each script receives the video output path as `$0` and the raw frame
//! stream on descriptor 3.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use livecap_capture_engine::{
    deferred_queue, AudioMixdown, DeferredQueue, EncoderCommand, Recorder, SessionHandle,
    SessionState, SessionSummary, SubmitOutcome,
};
use livecap_common::clock::FrameClock;
use livecap_common::config::CaptureConfig;
use livecap_common::error::CaptureError;

const CAT_TO_OUTPUT: &str = r#"cat <&3 > "$0""#;

/// Only one session may be live per process, so tests take turns.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(|e| e.into_inner())
}

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("livecap_it_{tag}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn recorder(dir: &Path, queue_capacity: usize, script: &'static str) -> (Recorder, DeferredQueue) {
    let (sender, tasks) = deferred_queue();
    let config = CaptureConfig {
        output_dir: dir.to_path_buf(),
        queue_capacity,
        ..CaptureConfig::default()
    };
    let recorder = Recorder::new(config, sender)
        .expect("default config is valid")
        .with_encoder(move |_, _, output| {
            EncoderCommand::custom(
                "sh",
                vec!["-c".to_string(), script.to_string(), output.display().to_string()],
            )
        });
    (recorder, tasks)
}

/// Wait for both workers, then pump the render-thread queue until teardown ran.
fn finalize(session: &SessionHandle, tasks: &DeferredQueue) {
    assert!(
        session.wait_terminated(Duration::from_secs(10)),
        "session did not terminate"
    );
    let deadline = Instant::now() + Duration::from_secs(5);
    while !session.is_finalized() {
        assert!(Instant::now() < deadline, "teardown never ran");
        tasks.run_next(Duration::from_millis(50));
    }
}

#[test]
fn frames_reach_the_encoder_in_order() {
    let _serial = serial();
    let dir = temp_dir("in_order");
    let (recorder, tasks) = recorder(&dir, 16, CAT_TO_OUTPUT);
    let mut session = recorder.start(64, 64, 0, None).unwrap();
    let frame_len = session.layout().frame_len();
    assert_eq!(frame_len, 64 * 64 * 3 / 2);

    for i in 0..30u8 {
        let ts = session.clock_mut().next_timestamp();
        let outcome = session.submit_frame(vec![i; frame_len], ts).unwrap();
        assert_eq!(outcome, SubmitOutcome::Queued);
    }
    session.stop();
    finalize(&session, &tasks);

    assert_eq!(session.state(), SessionState::Terminated);
    let video = std::fs::read(&session.paths().video).unwrap();
    assert_eq!(video.len(), 30 * frame_len);
    for (i, chunk) in video.chunks(frame_len).enumerate() {
        assert!(chunk.iter().all(|&b| b == i as u8), "frame {i} out of order");
    }

    let stats = session.stats();
    assert_eq!(stats.frames_written, 30);
    assert_eq!(stats.frames_dropped, 0);
    assert_eq!(stats.bytes_written, (30 * frame_len) as u64);
    // time(29) at 30 fps: round(59e9 / 60).
    assert_eq!(stats.last_video_time_ns, Some(983_333_333));

    let summary = SessionSummary::load(&session.paths().summary).unwrap();
    assert_eq!(summary.stats, stats);
    assert_eq!(summary.encoder_exit.as_deref(), Some("exited with code 0"));
    assert_eq!((summary.width, summary.height), (64, 64));
    assert_eq!(summary.frame_rate, "30/1");
    assert!(summary.is_clean());
    assert!(!recorder.is_recording());

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn dimensions_are_aligned_for_the_encoder() {
    let _serial = serial();
    let dir = temp_dir("aligned");
    let (recorder, tasks) = recorder(&dir, 4, CAT_TO_OUTPUT);
    let session = recorder.start(100, 75, 0, None).unwrap();
    assert_eq!((session.layout().width(), session.layout().height()), (128, 76));

    let err = session.submit_frame(vec![0; 100 * 75 * 3 / 2], 0).unwrap_err();
    assert!(matches!(err, CaptureError::FrameSizeMismatch { .. }));

    session.stop();
    finalize(&session, &tasks);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn second_start_is_rejected_until_teardown() {
    let _serial = serial();
    let dir = temp_dir("already");
    let (recorder, tasks) = recorder(&dir, 4, CAT_TO_OUTPUT);
    let session = recorder.start(64, 64, 0, None).unwrap();

    assert!(matches!(
        recorder.start(64, 64, 0, None),
        Err(CaptureError::AlreadyRecording)
    ));

    session.stop();
    assert!(session.wait_terminated(Duration::from_secs(10)));
    // Workers are gone but the render thread has not run the teardown yet.
    assert!(recorder.is_recording());
    assert!(!session.is_finalized());

    finalize(&session, &tasks);
    assert!(!recorder.is_recording());

    let next = recorder.start(64, 64, 0, None).unwrap();
    next.stop();
    finalize(&next, &tasks);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn second_recorder_is_rejected_while_a_session_is_live() {
    let _serial = serial();
    let dir = temp_dir("process_wide");
    let (first, first_tasks) = recorder(&dir, 4, CAT_TO_OUTPUT);
    let (second, second_tasks) = recorder(&dir, 4, CAT_TO_OUTPUT);
    let session = first.start(64, 64, 0, None).unwrap();

    assert!(second.is_recording());
    assert!(matches!(
        second.start(64, 64, 0, None),
        Err(CaptureError::AlreadyRecording)
    ));

    session.stop();
    finalize(&session, &first_tasks);
    assert!(!second.is_recording());

    let next = second.start(64, 64, 0, None).unwrap();
    next.stop();
    finalize(&next, &second_tasks);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn dropping_the_handle_stops_the_session() {
    let _serial = serial();
    let dir = temp_dir("drop");
    let (recorder, tasks) = recorder(&dir, 4, CAT_TO_OUTPUT);
    let session = recorder.start(64, 64, 0, None).unwrap();
    drop(session);

    let deadline = Instant::now() + Duration::from_secs(10);
    while recorder.is_recording() {
        assert!(Instant::now() < deadline, "dropped session never finalized");
        tasks.run_next(Duration::from_millis(50));
    }
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn stop_releases_a_producer_blocked_on_a_stalled_encoder() {
    let _serial = serial();
    let dir = temp_dir("stalled");
    // Frames large enough that one fills the pipe while the encoder sleeps.
    let (recorder, tasks) = recorder(&dir, 2, "sleep 2; cat <&3 > /dev/null");
    let session = recorder.start(640, 480, 0, None).unwrap();
    let frame_len = session.layout().frame_len();

    let released = AtomicBool::new(false);
    let released_at = Mutex::new(None);
    thread::scope(|scope| {
        let producer = scope.spawn(|| {
            let mut clock = FrameClock::new(0, session.frame_rate());
            loop {
                let ts = clock.next_timestamp();
                let outcome = session.submit_frame(vec![0; frame_len], ts).unwrap();
                if outcome == SubmitOutcome::Dropped {
                    *released_at.lock().unwrap() = Some(Instant::now());
                    released.store(true, Ordering::SeqCst);
                    return;
                }
            }
        });

        thread::sleep(Duration::from_millis(300));
        assert!(!released.load(Ordering::SeqCst), "producer should be blocked");
        assert_eq!(session.state(), SessionState::Recording);

        let stopped_at = Instant::now();
        session.stop();
        producer.join().unwrap();
        let released_at = released_at.lock().unwrap().unwrap();
        assert!(released_at.duration_since(stopped_at) < Duration::from_millis(500));
    });

    finalize(&session, &tasks);
    let stats = session.stats();
    assert!(stats.frames_dropped >= 1);
    assert_eq!(stats.frames_written + stats.frames_dropped, stats.frames_submitted + 1);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn encoder_closing_its_input_stops_the_session() {
    let _serial = serial();
    let dir = temp_dir("closed");
    let (recorder, tasks) = recorder(&dir, 4, "exec 3<&-; sleep 1");
    let session = recorder.start(64, 64, 0, None).unwrap();
    let frame_len = session.layout().frame_len();

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut clock = FrameClock::new(0, session.frame_rate());
    while session.state() == SessionState::Recording {
        assert!(Instant::now() < deadline, "pipe failure never stopped the session");
        let ts = clock.next_timestamp();
        session.submit_frame(vec![0; frame_len], ts).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    finalize(&session, &tasks);
    let errors = session.errors();
    assert!(
        errors.iter().any(|e| e.starts_with("Pipe write failed")),
        "errors: {errors:?}"
    );
    let summary = SessionSummary::load(&session.paths().summary).unwrap();
    assert!(!summary.is_clean());
    let stats = &summary.stats;
    assert!(stats.frames_written + stats.frames_dropped >= stats.frames_submitted);
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn failing_encoder_exit_is_recorded() {
    let _serial = serial();
    let dir = temp_dir("exit_code");
    let script = "cat <&3 > /dev/null; echo 'codec exploded' >&2; exit 7";
    let (recorder, tasks) = recorder(&dir, 4, script);
    let session = recorder.start(64, 64, 0, None).unwrap();
    session.stop();
    finalize(&session, &tasks);

    let summary = SessionSummary::load(&session.paths().summary).unwrap();
    assert_eq!(summary.encoder_exit.as_deref(), Some("exited with code 7"));
    assert!(summary
        .errors
        .iter()
        .any(|e| e.starts_with("Encoder exited abnormally")));
    std::fs::remove_dir_all(&dir).ok();
}

/// Constant-level mono mix whose clock follows the render loop.
struct ToneMixdown {
    clock: Arc<AtomicU64>,
}

impl AudioMixdown for ToneMixdown {
    fn sample_rate(&self) -> u32 {
        8_000
    }

    fn channels(&self) -> u16 {
        1
    }

    fn clock_ns(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }

    fn read_chunk(&mut self, _start_frame: u64, max_frames: usize, out: &mut Vec<f32>) -> usize {
        out.extend(std::iter::repeat(0.25).take(max_frames));
        max_frames
    }
}

#[test]
fn audio_track_follows_written_video() {
    let _serial = serial();
    let dir = temp_dir("audio");
    let (recorder, tasks) = recorder(&dir, 16, CAT_TO_OUTPUT);
    let mix_clock = Arc::new(AtomicU64::new(0));
    let mixdown = ToneMixdown {
        clock: mix_clock.clone(),
    };
    let mut session = recorder.start(64, 64, 0, Some(Box::new(mixdown))).unwrap();
    let frame_len = session.layout().frame_len();

    for _ in 0..15 {
        let ts = session.clock_mut().next_timestamp();
        mix_clock.store(ts, Ordering::SeqCst);
        session.submit_frame(vec![0; frame_len], ts).unwrap();
    }
    session.stop();
    finalize(&session, &tasks);

    // Mix clock ends at time(14) = 483.33ms; one interval back is 450ms,
    // which is below the last frame plus one interval: 0.45s * 8kHz.
    let stats = session.stats();
    assert_eq!(stats.audio_frames_written, 3_600);

    let audio_path = session.paths().audio.clone().unwrap();
    let mut reader = hound::WavReader::open(&audio_path).unwrap();
    assert_eq!(reader.spec().sample_rate, 8_000);
    assert_eq!(reader.spec().channels, 1);
    let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 3_600);
    assert!(samples.iter().all(|&s| s == 8_192));

    let summary = SessionSummary::load(&session.paths().summary).unwrap();
    assert_eq!(summary.audio_path, Some(audio_path));
    let skew = summary.av_skew_ms.unwrap();
    assert!(skew.abs() <= 33.4, "skew {skew}ms");
    std::fs::remove_dir_all(&dir).ok();
}
