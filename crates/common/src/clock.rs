//! Clock and timing utilities for capture synchronization.
//!
//! Every livecap timestamp is a `u64` count of nanoseconds on the host
//! application's session clock. This module provides:
//! - [`FrameClock`], the drift-free mapping from a rational frame rate to
//!   frame timestamps
//! - [`FrameRate`], a validated `num/den` frames-per-second pair
//! - [`RecordingClock`], a monotonic epoch for hosts without their own clock
//! - [`SkewMeasurement`] for comparing the audio and video track ends

use std::fmt;
use std::num::NonZeroU64;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, CaptureResult};

/// Nanoseconds per second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// A rational frame rate of `num / den` frames per second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

impl FrameRate {
    /// Create a frame rate, rejecting zero terms.
    pub fn new(num: u32, den: u32) -> CaptureResult<Self> {
        if num == 0 || den == 0 {
            return Err(CaptureError::invalid_config(format!(
                "frame rate {num}/{den} must have non-zero terms"
            )));
        }
        Ok(Self { num, den })
    }

    pub fn num(&self) -> u32 {
        self.num
    }

    pub fn den(&self) -> u32 {
        self.den
    }

    /// Duration of one frame in nanoseconds, rounded half up.
    pub fn frame_interval_ns(&self) -> u64 {
        let span = u128::from(self.den) * u128::from(NANOS_PER_SEC);
        let num = u128::from(self.num);
        ((2 * span + num) / (2 * num)) as u64
    }

    /// Approximate frames per second, for display only.
    pub fn as_f64(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Drift-free frame scheduler.
///
/// `rate_numerator` frames span exactly `rate_denominator` time units. The
/// timestamp of frame `k` is the rounded midpoint of its slot:
///
/// ```text
/// time(k) = reference_time + round_half_up((2k + 1) * den / (2 * num))
/// ```
///
/// Only the index within the current `num`-frame period is stored; the
/// reference time absorbs whole periods, so the arithmetic never grows and
/// repeated calls never accumulate rounding error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameClock {
    reference_time: u64,
    rate_numerator: u64,
    rate_denominator: u64,
    frame_index: u64,
}

impl FrameClock {
    /// Clock for `rate` frames per second in nanoseconds, starting at `reference_ns`.
    pub fn new(reference_ns: u64, rate: FrameRate) -> Self {
        Self {
            reference_time: reference_ns,
            rate_numerator: u64::from(rate.num),
            rate_denominator: u64::from(rate.den) * NANOS_PER_SEC,
            frame_index: 0,
        }
    }

    /// Clock over arbitrary time units: `numerator` frames every `denominator` units.
    pub fn with_ticks(reference_time: u64, numerator: NonZeroU64, denominator: u64) -> Self {
        Self {
            reference_time,
            rate_numerator: numerator.get(),
            rate_denominator: denominator,
            frame_index: 0,
        }
    }

    /// Timestamp of the next frame to capture. Pure read.
    pub fn current_timestamp(&self) -> u64 {
        self.reference_time
            + slot_midpoint(
                self.frame_index,
                self.rate_numerator,
                self.rate_denominator,
            )
    }

    /// Return the timestamp of the next frame and advance past it.
    pub fn next_timestamp(&mut self) -> u64 {
        let ts = self.current_timestamp();
        self.advance();
        ts
    }

    /// Whether the frame at `current_timestamp()` is due at `now`.
    pub fn is_due(&self, now: u64) -> bool {
        now >= self.current_timestamp()
    }

    /// Move to the next frame slot.
    pub fn advance(&mut self) {
        self.frame_index += 1;
        if self.frame_index >= self.rate_numerator {
            self.frame_index -= self.rate_numerator;
            self.reference_time += self.rate_denominator;
        }
    }

    /// Length of one frame slot, rounded half up.
    pub fn frame_interval(&self) -> u64 {
        let den = u128::from(self.rate_denominator);
        let num = u128::from(self.rate_numerator);
        ((2 * den + num) / (2 * num)) as u64
    }

    /// Index within the current `rate_numerator`-frame period.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Start of the current period.
    pub fn reference_time(&self) -> u64 {
        self.reference_time
    }

    pub fn rate_numerator(&self) -> u64 {
        self.rate_numerator
    }

    pub fn rate_denominator(&self) -> u64 {
        self.rate_denominator
    }
}

/// `round_half_up((2k + 1) * den / (2 * num))` in exact integer arithmetic.
fn slot_midpoint(k: u64, num: u64, den: u64) -> u64 {
    let a = (2 * u128::from(k) + 1) * u128::from(den);
    let b = 2 * u128::from(num);
    ((2 * a + b) / (2 * b)) as u64
}

/// A recording clock that provides monotonic timestamps relative to
/// a fixed epoch (the moment recording started).
#[derive(Debug, Clone)]
pub struct RecordingClock {
    epoch: Instant,

    /// Wall-clock time at epoch (RFC 3339).
    epoch_wall: String,
}

impl RecordingClock {
    /// Create a new recording clock anchored to now.
    pub fn start() -> Self {
        Self {
            epoch: Instant::now(),
            epoch_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Get nanoseconds elapsed since the epoch.
    pub fn elapsed_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    /// Wall-clock time at the epoch.
    pub fn epoch_wall(&self) -> &str {
        &self.epoch_wall
    }
}

/// Offset between the end of the audio track and the end of the video track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkewMeasurement {
    /// Timestamp in the reference (video) stream, ns.
    pub reference_ns: u64,
    /// Timestamp in the measured (audio) stream, ns.
    pub measured_ns: u64,
}

impl SkewMeasurement {
    /// Skew in nanoseconds (positive = audio is ahead).
    pub fn skew_ns(&self) -> i64 {
        self.measured_ns as i64 - self.reference_ns as i64
    }

    /// Skew in milliseconds.
    pub fn skew_ms(&self) -> f64 {
        self.skew_ns() as f64 / 1_000_000.0
    }

    /// Whether the skew magnitude exceeds `threshold_ns`.
    pub fn exceeds(&self, threshold_ns: u64) -> bool {
        self.skew_ns().unsigned_abs() > threshold_ns
    }
}
