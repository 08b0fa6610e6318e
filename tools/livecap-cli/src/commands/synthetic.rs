//! Synthetic render and mix sources for exercising a session without a host
//! application.

use std::f64::consts::TAU;

use livecap_capture_engine::{AudioMixdown, FrameLayout};
use livecap_common::clock::RecordingClock;

/// BT.601 limited-range Y, U, V for white, yellow, cyan, green, magenta,
/// red, blue, black.
const BARS: [(u8, u8, u8); 8] = [
    (235, 128, 128),
    (210, 16, 146),
    (170, 166, 16),
    (145, 54, 34),
    (106, 202, 222),
    (81, 90, 240),
    (41, 240, 110),
    (16, 128, 128),
];

/// Colour bars that scroll one bar width every second.
pub struct ColorBars {
    layout: FrameLayout,
}

impl ColorBars {
    pub fn new(layout: FrameLayout) -> Self {
        Self { layout }
    }

    /// Render the pattern as it looks at `timestamp_ns`.
    pub fn render(&self, timestamp_ns: u64) -> Vec<u8> {
        let width = self.layout.width() as usize;
        let height = self.layout.height() as usize;
        let bar_width = (width / BARS.len()).max(1);
        let shift = (timestamp_ns as u128 * bar_width as u128 / 1_000_000_000) as usize;
        let bar_at = |x: usize| BARS[((x + shift) / bar_width) % BARS.len()];

        let mut frame = vec![0u8; self.layout.frame_len()];
        let (y_plane, u_plane, v_plane) = self.layout.planes_mut(&mut frame);

        for row in y_plane.chunks_exact_mut(width) {
            for (x, px) in row.iter_mut().enumerate() {
                *px = bar_at(x).0;
            }
        }
        let chroma_width = width / 2;
        for (u_row, v_row) in u_plane
            .chunks_exact_mut(chroma_width)
            .zip(v_plane.chunks_exact_mut(chroma_width))
            .take(height / 2)
        {
            for (cx, (u, v)) in u_row.iter_mut().zip(v_row.iter_mut()).enumerate() {
                let (_, bar_u, bar_v) = bar_at(cx * 2);
                *u = bar_u;
                *v = bar_v;
            }
        }
        frame
    }
}

/// Sine tone whose clock is the recording clock.
pub struct SineMixdown {
    clock: RecordingClock,
    sample_rate: u32,
    channels: u16,
    frequency_hz: f64,
    amplitude: f32,
}

impl SineMixdown {
    pub fn new(clock: RecordingClock, sample_rate: u32, channels: u16, frequency_hz: f64) -> Self {
        Self {
            clock,
            sample_rate,
            channels,
            frequency_hz,
            amplitude: 0.2,
        }
    }
}

impl AudioMixdown for SineMixdown {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn clock_ns(&self) -> u64 {
        self.clock.elapsed_ns()
    }

    fn read_chunk(&mut self, start_frame: u64, max_frames: usize, out: &mut Vec<f32>) -> usize {
        let rate = f64::from(self.sample_rate);
        for n in start_frame..start_frame + max_frames as u64 {
            let phase = TAU * self.frequency_hz * (n as f64 / rate);
            let sample = phase.sin() as f32 * self.amplitude;
            out.extend(std::iter::repeat(sample).take(usize::from(self.channels)));
        }
        max_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bars_fill_every_plane() {
        let layout = FrameLayout::aligned(64, 16).unwrap();
        let frame = ColorBars::new(layout).render(0);
        assert_eq!(frame.len(), layout.frame_len());

        // 8 px bars: first bar white, last bar black.
        assert_eq!(frame[0], 235);
        assert_eq!(frame[63], 16);
        let u_start = layout.luma_len();
        assert_eq!(frame[u_start], 128);
        assert_eq!(frame[u_start + 4], 16);
    }

    #[test]
    fn bars_scroll_with_time() {
        let layout = FrameLayout::aligned(64, 2).unwrap();
        let bars = ColorBars::new(layout);
        // One bar width (8 px) per second.
        assert_eq!(bars.render(1_000_000_000)[0], 210);
    }

    #[test]
    fn sine_is_interleaved_per_channel() {
        let mut mix = SineMixdown::new(RecordingClock::start(), 48_000, 2, 1_000.0);
        let mut out = Vec::new();
        assert_eq!(mix.read_chunk(0, 12, &mut out), 12);
        assert_eq!(out.len(), 24);
        assert_eq!(out[0], 0.0);
        for pair in out.chunks_exact(2) {
            assert_eq!(pair[0], pair[1]);
        }
        // Quarter period of 1 kHz at 48 kHz is frame 12.
        out.clear();
        mix.read_chunk(12, 1, &mut out);
        assert!((out[0] - 0.2).abs() < 1e-6);
    }
}
