//! Record a synthetic capture session.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use livecap_capture_engine::{deferred_queue, AudioMixdown, Recorder, SessionState, SubmitOutcome};
use livecap_common::clock::{RecordingClock, NANOS_PER_SEC};
use livecap_common::config::CaptureConfig;

use super::synthetic::{ColorBars, SineMixdown};

const TONE_HZ: f64 = 440.0;
const RENDER_TICK: Duration = Duration::from_millis(1);

pub struct RecordOptions {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: Option<String>,
    pub output: Option<PathBuf>,
    pub audio: bool,
}

pub fn run(mut config: CaptureConfig, options: RecordOptions) -> anyhow::Result<()> {
    if options.duration_secs.is_nan() || options.duration_secs <= 0.0 {
        anyhow::bail!("Duration must be positive, got {}", options.duration_secs);
    }
    if let Some(fps) = &options.fps {
        let (num, den) = parse_fps(fps)?;
        config.fps_num = num;
        config.fps_den = den;
    }
    if let Some(output) = options.output {
        config.output_dir = output;
    }

    let (sender, tasks) = deferred_queue();
    let recorder = Recorder::new(config.clone(), sender)?;

    let clock = RecordingClock::start();
    tracing::info!(epoch_wall = %clock.epoch_wall(), "Recording clock started");
    let audio = options.audio.then(|| {
        Box::new(SineMixdown::new(
            clock.clone(),
            config.audio.sample_rate,
            config.audio.channels,
            TONE_HZ,
        )) as Box<dyn AudioMixdown>
    });

    let mut session = recorder.start(options.width, options.height, 0, audio)?;
    let layout = session.layout();
    let bars = ColorBars::new(layout);

    println!("Recording session: {}", session.name());
    println!("  Video: {}", session.paths().video.display());
    if let Some(audio) = &session.paths().audio {
        println!("  Audio: {}", audio.display());
    }
    println!(
        "  Resolution: {}x{} @ {} fps",
        layout.width(),
        layout.height(),
        session.frame_rate()
    );
    println!("  Duration: {:.1}s", options.duration_secs);
    if let Some(pid) = session.encoder_pid() {
        println!("  Encoder pid: {pid}");
    }
    println!();

    let end_ns = (options.duration_secs * NANOS_PER_SEC as f64) as u64;
    let mut dropped = 0u64;
    loop {
        let now = clock.elapsed_ns();
        if now >= end_ns {
            break;
        }
        if session.state() != SessionState::Recording {
            tracing::warn!(
                errors = ?session.errors(),
                "Session stopped before the requested duration"
            );
            break;
        }
        if let Some(ts) = session.capture_due(now) {
            if session.submit_frame(bars.render(ts), ts)? == SubmitOutcome::Dropped {
                dropped += 1;
            }
        }
        tasks.run_pending();
        thread::sleep(RENDER_TICK);
    }

    session.stop();
    if !session.wait_terminated(Duration::from_secs(30)) {
        anyhow::bail!("Encoder did not finish within 30s");
    }
    while !session.is_finalized() {
        tasks.run_next(Duration::from_millis(100));
    }

    let stats = session.stats();
    println!("Recording finished");
    println!(
        "  Frames: {} written, {} dropped ({:.1}%)",
        stats.frames_written,
        stats.frames_dropped,
        stats.drop_rate()
    );
    if stats.audio_frames_written > 0 {
        println!("  Audio frames: {}", stats.audio_frames_written);
    }
    println!("  Summary: {}", session.paths().summary.display());
    tracing::debug!(dropped, "Render loop finished");

    let errors = session.errors();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("  Error: {error}");
        }
        anyhow::bail!("Session ended with {} error(s)", errors.len());
    }
    Ok(())
}

/// Parse `NUM` or `NUM/DEN`.
fn parse_fps(value: &str) -> anyhow::Result<(u32, u32)> {
    let (num, den) = match value.split_once('/') {
        Some((num, den)) => (num.trim(), den.trim()),
        None => (value.trim(), "1"),
    };
    let num: u32 = num
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid frame rate numerator '{num}': {e}"))?;
    let den: u32 = den
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid frame rate denominator '{den}': {e}"))?;
    if num == 0 || den == 0 {
        anyhow::bail!("Frame rate {value} must have non-zero terms");
    }
    Ok((num, den))
}
