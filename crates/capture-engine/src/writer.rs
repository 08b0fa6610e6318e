//! Video writer thread: queue → encoder pipe → encoder exit → teardown.

use std::sync::Arc;
use std::thread::JoinHandle;

use livecap_common::error::CaptureError;

use crate::encoder::EncoderProcess;
use crate::shared::SessionShared;

pub(crate) struct VideoWriter {
    shared: Arc<SessionShared>,
    encoder: EncoderProcess,
    audio: Option<JoinHandle<u64>>,
    on_done: Box<dyn FnOnce() + Send>,
}

impl VideoWriter {
    pub fn new(
        shared: Arc<SessionShared>,
        encoder: EncoderProcess,
        audio: Option<JoinHandle<u64>>,
        on_done: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            shared,
            encoder,
            audio,
            on_done,
        }
    }

    /// Hand back the pieces of a writer whose thread never started.
    pub fn into_parts(self) -> (EncoderProcess, Option<JoinHandle<u64>>) {
        (self.encoder, self.audio)
    }

    /// Thread body.
    pub fn run(mut self) {
        let pid = self.encoder.pid();
        tracing::info!(pid, "Video writer started");

        let mut pipe_broken = false;
        while let Some(frame) = self.shared.next_frame() {
            if pipe_broken {
                self.shared.record_discarded();
                continue;
            }
            match self.encoder.write_frame(frame.data()) {
                Ok(()) => self.shared.record_written(frame.timestamp_ns(), frame.len()),
                Err(e) => {
                    log_pipe_failure(pid, &e);
                    pipe_broken = true;
                    self.encoder.close_input();
                    self.shared.record_discarded();
                    self.shared.request_stop(Some(&e));
                }
            }
        }
        self.shared.mark_video_drained();

        let stats = self.shared.stats();
        tracing::info!(
            frames = stats.frames_written,
            dropped = stats.frames_dropped,
            bytes = stats.bytes_written,
            "Video queue drained; waiting for encoder exit"
        );

        let (exit, stderr_tail) = self.encoder.finish();
        let abnormal = exit.abnormal();
        if abnormal.is_some() {
            tracing::warn!(pid, status = %exit, stderr = ?stderr_tail, "Encoder exited abnormally");
        } else {
            tracing::info!(pid, status = %exit, "Encoder exited");
        }
        self.shared.set_encoder_exit(exit.to_string(), abnormal.as_ref());

        if let Some(audio) = self.audio.take() {
            match audio.join() {
                Ok(frames) => tracing::debug!(frames, "Audio companion joined"),
                Err(_) => tracing::warn!("Audio companion panicked"),
            }
        }

        self.shared.terminate();
        tracing::info!(pid, "Capture session terminated");
        (self.on_done)();
    }
}

fn log_pipe_failure(pid: u32, err: &CaptureError) {
    if let CaptureError::PipeWrite {
        written,
        expected,
        source,
    } = err
    {
        tracing::error!(
            pid,
            syscall = "write",
            errno = source.raw_os_error(),
            written,
            expected,
            error = %source,
            "Encoder pipe write failed; stopping session"
        );
    } else {
        tracing::error!(pid, error = %err, "Encoder pipe write failed; stopping session");
    }
}
