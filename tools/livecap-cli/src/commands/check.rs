//! Check encoder availability and the effective configuration.

use livecap_capture_engine::encoder_available;
use livecap_common::config::{config_file_path, AppConfig};

pub fn run(config: &AppConfig, write_config: bool) -> anyhow::Result<()> {
    println!("livecap System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config file: {}", path.display());
    } else {
        println!("[INFO] Config file: {} (not found, using defaults)", path.display());
    }

    let capture = &config.capture;
    let program = &capture.encoder.program;
    let encoder_ok = encoder_available(program);
    if encoder_ok {
        println!("[OK] Encoder: {program}");
    } else {
        println!("[FAIL] Encoder: '{program}' not found on PATH");
    }

    let config_ok = match capture.validate().and_then(|()| capture.frame_rate()) {
        Ok(rate) => {
            println!(
                "[OK] Capture: {rate} fps (~{:.2}), queue of {} frames, .{} output",
                rate.as_f64(),
                capture.queue_capacity,
                capture.encoder.container
            );
            true
        }
        Err(e) => {
            println!("[FAIL] Capture configuration: {e}");
            false
        }
    };
    println!(
        "[OK] Audio: {} Hz, {} channel(s)",
        capture.audio.sample_rate, capture.audio.channels
    );
    println!("[OK] Output directory: {}", capture.output_dir.display());

    println!();
    println!("Effective configuration:");
    println!("{}", serde_json::to_string_pretty(config)?);
    if write_config {
        config.save()?;
        println!("[OK] Wrote configuration to {}", path.display());
    }

    println!();
    if encoder_ok && config_ok {
        println!("livecap is ready to record.");
    } else {
        println!("Some checks failed. See above for details.");
    }

    Ok(())
}
