//! WAV file sink for the session audio track.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};
use livecap_common::error::{CaptureError, CaptureResult};

use crate::audio::AudioSink;

/// 16-bit PCM WAV writer. The RIFF sizes are patched in on [`AudioSink::finish`].
pub struct WavSink {
    writer: WavWriter<BufWriter<File>>,
    path: PathBuf,
}

impl WavSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32, channels: u16) -> CaptureResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(&path, spec).map_err(|e| {
            CaptureError::audio_write(format!("failed to create {}: {e}", path.display()))
        })?;
        Ok(Self { writer, path })
    }
}

impl AudioSink for WavSink {
    fn write(&mut self, samples: &[i16]) -> CaptureResult<()> {
        for &sample in samples {
            self.writer
                .write_sample(sample)
                .map_err(|e| CaptureError::audio_write(e.to_string()))?;
        }
        Ok(())
    }

    fn finish(self: Box<Self>) -> CaptureResult<()> {
        let path = self.path;
        self.writer.finalize().map_err(|e| {
            CaptureError::audio_write(format!("failed to finalize {}: {e}", path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_file_has_header_and_samples() {
        let dir = std::env::temp_dir().join(format!("livecap_test_wav_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("audio.wav");

        let mut sink = Box::new(WavSink::create(&path, 48_000, 2).unwrap());
        sink.write(&[0, 1000, -1000, i16::MAX]).unwrap();
        sink.write(&[7, -7]).unwrap();
        sink.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, 48_000);
        assert_eq!(spec.channels, 2);
        assert_eq!(spec.bits_per_sample, 16);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![0, 1000, -1000, i16::MAX, 7, -7]);

        std::fs::remove_dir_all(&dir).ok();
    }
}
