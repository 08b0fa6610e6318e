//! Show a finished session's summary.

use std::path::PathBuf;

use livecap_capture_engine::SessionSummary;

pub fn run(path: PathBuf) -> anyhow::Result<()> {
    let summary = SessionSummary::load(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load session summary: {e}"))?;
    let stats = &summary.stats;

    println!("Session: {}", summary.name);
    println!("  Started: {}", summary.started_at);
    println!(
        "  Resolution: {}x{} @ {} fps",
        summary.width, summary.height, summary.frame_rate
    );
    println!();

    println!("Outputs:");
    println!("  Video: {}", summary.video_path.display());
    if let Some(ref audio) = summary.audio_path {
        println!("  Audio: {}", audio.display());
    }
    println!();

    println!("Frames:");
    println!("  Submitted: {}", stats.frames_submitted);
    println!("  Written: {} ({} bytes)", stats.frames_written, stats.bytes_written);
    println!(
        "  Dropped: {} ({:.1}%)",
        stats.frames_dropped,
        stats.drop_rate()
    );
    if stats.audio_frames_written > 0 {
        println!("  Audio frames: {}", stats.audio_frames_written);
    }
    if let Some(skew) = summary.av_skew_ms {
        println!("  A/V end skew: {skew:.2} ms");
    }
    println!();

    println!(
        "Encoder: {}",
        summary.encoder_exit.as_deref().unwrap_or("no exit recorded")
    );
    if summary.is_clean() {
        println!("Status: clean");
    } else {
        println!("Errors:");
        for error in &summary.errors {
            println!("  - {error}");
        }
    }

    Ok(())
}
