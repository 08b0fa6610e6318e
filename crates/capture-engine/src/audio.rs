//! Audio companion: releases live mixdown audio no faster than video is
//! delivered to the encoder.
//!
//! Each pass computes a video-relative position one frame interval behind the
//! mixdown clock, waits until the video writer has written a frame at or past
//! that position, then pulls and writes audio up to
//! `min(position, last_video_time + frame_interval)`. Audio-to-video skew is
//! therefore bounded by one frame interval however far the live mixer runs
//! ahead of a slow encoder.

use std::sync::Arc;
use std::time::Duration;

use livecap_common::clock::NANOS_PER_SEC;
use livecap_common::error::{CaptureError, CaptureResult};

use crate::shared::SessionShared;

const GATE_POLL: Duration = Duration::from_millis(20);

/// Pull interface onto the host's live audio mix.
pub trait AudioMixdown: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    /// Current position of the live mix on the session clock, in ns.
    fn clock_ns(&self) -> u64;

    /// Append up to `max_frames` interleaved sample frames, starting at
    /// sample frame `start_frame` (frame 0 is the session start), to `out`.
    /// Returns the number of sample frames appended; 0 if none are ready.
    fn read_chunk(&mut self, start_frame: u64, max_frames: usize, out: &mut Vec<f32>) -> usize;
}

/// Destination for the session's 16-bit PCM audio track.
pub trait AudioSink: Send {
    fn write(&mut self, samples: &[i16]) -> CaptureResult<()>;

    /// Flush and close; the sink finalizes its container here.
    fn finish(self: Box<Self>) -> CaptureResult<()>;
}

/// Audio input and output for one session.
pub struct AudioSource {
    pub mixdown: Box<dyn AudioMixdown>,
    pub sink: Box<dyn AudioSink>,
}

impl AudioSource {
    pub fn new(mixdown: Box<dyn AudioMixdown>, sink: Box<dyn AudioSink>) -> Self {
        Self { mixdown, sink }
    }
}

/// Latest audio timestamp that may be released, given the video-relative
/// position and the most recently written video frame.
pub fn release_bound(
    position_ns: u64,
    last_video_ns: Option<u64>,
    interval_ns: u64,
) -> Option<u64> {
    last_video_ns.map(|video| position_ns.min(video.saturating_add(interval_ns)))
}

/// Convert float samples in `[-1, 1]` to 16-bit PCM, clamping out-of-range values.
pub fn f32_to_i16(input: &[f32], output: &mut Vec<i16>) {
    output.clear();
    output.extend(
        input
            .iter()
            .map(|s| (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16),
    );
}

pub(crate) struct AudioCompanion {
    shared: Arc<SessionShared>,
    mixdown: Box<dyn AudioMixdown>,
    sink: Box<dyn AudioSink>,
    reference_ns: u64,
    frame_interval_ns: u64,
    chunk_frames: usize,
    cursor: u64,
    pcm: Vec<f32>,
    converted: Vec<i16>,
}

impl AudioCompanion {
    pub fn new(
        shared: Arc<SessionShared>,
        source: AudioSource,
        reference_ns: u64,
        frame_interval_ns: u64,
        chunk_frames: usize,
    ) -> Self {
        Self {
            shared,
            mixdown: source.mixdown,
            sink: source.sink,
            reference_ns,
            frame_interval_ns,
            chunk_frames: chunk_frames.max(1),
            cursor: 0,
            pcm: Vec::new(),
            converted: Vec::new(),
        }
    }

    /// Sample frames from session start up to `ts_ns`.
    fn frames_until(&self, ts_ns: u64) -> u64 {
        let elapsed = ts_ns.saturating_sub(self.reference_ns);
        let rate = u128::from(self.mixdown.sample_rate());
        (u128::from(elapsed) * rate / u128::from(NANOS_PER_SEC)) as u64
    }

    /// Thread body. Returns the number of sample frames written.
    pub fn run(mut self) -> u64 {
        tracing::info!(
            sample_rate = self.mixdown.sample_rate(),
            channels = self.mixdown.channels(),
            "Audio companion started"
        );

        loop {
            let position = self
                .mixdown
                .clock_ns()
                .saturating_sub(self.frame_interval_ns);
            let gate = self.shared.wait_for_video(position, GATE_POLL);
            let end_frame = release_bound(position, gate.last_video_time, self.frame_interval_ns)
                .map_or(0, |bound| self.frames_until(bound));

            if end_frame > self.cursor {
                let want = (end_frame - self.cursor).min(self.chunk_frames as u64) as usize;
                self.pcm.clear();
                let got = self.mixdown.read_chunk(self.cursor, want, &mut self.pcm);
                if got > 0 {
                    f32_to_i16(&self.pcm, &mut self.converted);
                    if let Err(e) = self.sink.write(&self.converted) {
                        tracing::error!(
                            error = %e,
                            cursor = self.cursor,
                            "Audio sink write failed; stopping session"
                        );
                        let err = match e {
                            CaptureError::AudioWrite { .. } => e,
                            other => CaptureError::audio_write(other.to_string()),
                        };
                        self.shared.request_stop(Some(&err));
                        break;
                    }
                    self.cursor += got as u64;
                    self.shared.record_audio(got as u64);
                    continue;
                }
            }

            if gate.stopping && gate.video_drained {
                break;
            }
            self.shared.wait_audio_idle(GATE_POLL);
        }

        let written = self.cursor;
        if let Err(e) = self.sink.finish() {
            tracing::error!(error = %e, "Failed to finalize audio sink");
            let err = CaptureError::audio_write(format!("finalize failed: {e}"));
            self.shared.request_stop(Some(&err));
        }
        tracing::info!(frames = written, "Audio companion stopped");
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::thread;

    struct ScriptedMixdown {
        clock: Arc<AtomicU64>,
        reads: Arc<Mutex<Vec<(u64, usize)>>>,
    }

    impl AudioMixdown for ScriptedMixdown {
        fn sample_rate(&self) -> u32 {
            1_000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn clock_ns(&self) -> u64 {
            self.clock.load(Ordering::SeqCst)
        }

        fn read_chunk(&mut self, start_frame: u64, max_frames: usize, out: &mut Vec<f32>) -> usize {
            self.reads.lock().unwrap().push((start_frame, max_frames));
            out.extend(std::iter::repeat(0.5).take(max_frames));
            max_frames
        }
    }

    #[derive(Clone, Default)]
    struct MemorySink {
        samples: Arc<Mutex<Vec<i16>>>,
        fail: bool,
    }

    impl AudioSink for MemorySink {
        fn write(&mut self, samples: &[i16]) -> CaptureResult<()> {
            if self.fail {
                return Err(CaptureError::audio_write("device unplugged"));
            }
            self.samples.lock().unwrap().extend_from_slice(samples);
            Ok(())
        }

        fn finish(self: Box<Self>) -> CaptureResult<()> {
            Ok(())
        }
    }

    const MS: u64 = 1_000_000;

    #[test]
    fn bound_is_capped_one_interval_past_video() {
        assert_eq!(release_bound(500, None, 33), None);
        assert_eq!(release_bound(500, Some(600), 33), Some(500));
        assert_eq!(release_bound(500, Some(400), 33), Some(433));
    }

    #[test]
    fn conversion_clamps_and_scales() {
        let mut out = Vec::new();
        f32_to_i16(&[0.0, 1.0, -1.0, 2.0, -3.0, 0.5, f32::NAN], &mut out);
        assert_eq!(out, vec![0, 32767, -32767, 32767, -32767, 16384, 0]);
    }

    #[test]
    fn companion_never_reads_past_video_plus_one_interval() {
        let shared = Arc::new(SessionShared::new(4));
        let clock = Arc::new(AtomicU64::new(0));
        let reads = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink::default();
        let source = AudioSource::new(
            Box::new(ScriptedMixdown {
                clock: clock.clone(),
                reads: reads.clone(),
            }),
            Box::new(sink.clone()),
        );
        let interval = 10 * MS;
        let companion = AudioCompanion::new(shared.clone(), source, 0, interval, 64);
        let worker = thread::spawn(move || companion.run());

        // The mix runs far ahead while video has only reached 100ms.
        clock.store(1_000 * MS, Ordering::SeqCst);
        shared.record_written(100 * MS, 0);
        thread::sleep(Duration::from_millis(150));
        {
            let reads = reads.lock().unwrap();
            let furthest = reads.iter().map(|(s, n)| s + *n as u64).max().unwrap_or(0);
            // 1 kHz: one frame per ms, video + interval = 110ms.
            assert!(furthest <= 110, "read up to frame {furthest}");
        }

        shared.record_written(300 * MS, 0);
        shared.request_stop(None);
        shared.mark_video_drained();
        let written = worker.join().unwrap();

        assert_eq!(written, 310);
        let reads = reads.lock().unwrap();
        assert!(reads.iter().all(|(s, n)| s + *n as u64 <= 310));
        assert_eq!(sink.samples.lock().unwrap().len(), 310);
        assert_eq!(shared.stats().audio_frames_written, 310);
    }

    #[test]
    fn sample_frames_count_from_the_reference_time() {
        let shared = Arc::new(SessionShared::new(4));
        let clock = Arc::new(AtomicU64::new(2_000 * MS));
        let reads = Arc::new(Mutex::new(Vec::new()));
        let sink = MemorySink::default();
        let source = AudioSource::new(
            Box::new(ScriptedMixdown {
                clock,
                reads: reads.clone(),
            }),
            Box::new(sink.clone()),
        );
        // Session starts at 500ms on the shared clock.
        let reference = 500 * MS;
        shared.record_written(600 * MS, 0);
        let companion = AudioCompanion::new(shared.clone(), source, reference, 10 * MS, 64);
        let worker = thread::spawn(move || companion.run());

        thread::sleep(Duration::from_millis(150));
        {
            let reads = reads.lock().unwrap();
            assert_eq!(reads.first().map(|(start, _)| *start), Some(0));
            let furthest = reads.iter().map(|(s, n)| s + *n as u64).max().unwrap_or(0);
            // 600ms + 10ms is 110ms past the reference.
            assert_eq!(furthest, 110);
        }

        shared.record_written(800 * MS, 0);
        shared.request_stop(None);
        shared.mark_video_drained();
        let written = worker.join().unwrap();

        assert_eq!(written, 310);
        assert_eq!(sink.samples.lock().unwrap().len(), 310);
    }

    #[test]
    fn sink_failure_stops_the_session() {
        let shared = Arc::new(SessionShared::new(4));
        let clock = Arc::new(AtomicU64::new(500 * MS));
        let source = AudioSource::new(
            Box::new(ScriptedMixdown {
                clock,
                reads: Arc::new(Mutex::new(Vec::new())),
            }),
            Box::new(MemorySink {
                fail: true,
                ..MemorySink::default()
            }),
        );
        shared.record_written(400 * MS, 0);
        let companion = AudioCompanion::new(shared.clone(), source, 0, 10 * MS, 64);
        let written = thread::spawn(move || companion.run()).join().unwrap();

        assert_eq!(written, 0);
        assert_eq!(shared.state(), crate::shared::SessionState::Stopping);
        assert!(shared.lock().errors[0].contains("device unplugged"));
    }
}
