//! External encoder process and its raw-frame pipe.
//!
//! The encoder reads fixed-size I420 frames from descriptor
//! [`ENCODER_INPUT_FD`]; there is no in-band framing, so the frame geometry
//! is fixed for the life of the process.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader, ErrorKind, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use livecap_common::clock::FrameRate;
use livecap_common::config::EncoderConfig;
use livecap_common::error::{CaptureError, CaptureResult};

use crate::frame::FrameLayout;

/// Descriptor the pipe's read end occupies in the encoder.
pub const ENCODER_INPUT_FD: RawFd = 3;

/// Descriptors at or above this are never inherited by the encoder.
pub const INHERIT_THRESHOLD_FD: RawFd = ENCODER_INPUT_FD + 1;

const FD_SCAN_CAP: RawFd = 65_536;
const STDERR_TAIL_LINES: usize = 8;

/// Program and arguments used to launch an encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    program: String,
    args: Vec<String>,
}

impl EncoderCommand {
    /// ffmpeg reading raw yuv420p from [`ENCODER_INPUT_FD`].
    pub fn ffmpeg(
        config: &EncoderConfig,
        layout: &FrameLayout,
        rate: FrameRate,
        output: &Path,
    ) -> Self {
        let mut args: Vec<String> = [
            "-y",
            "-nostdin",
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "yuv420p",
            "-s",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        args.push(layout.size_arg());
        args.push("-r".to_string());
        args.push(rate.to_string());
        args.push("-i".to_string());
        args.push(format!("pipe:{ENCODER_INPUT_FD}"));
        args.push("-an".to_string());
        args.extend(config.codec_args.iter().cloned());
        args.push(output.to_string_lossy().into_owned());

        Self {
            program: config.program.clone(),
            args,
        }
    }

    /// Any program that reads raw frames from [`ENCODER_INPUT_FD`].
    pub fn custom<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Whether `program` resolves on PATH.
pub fn encoder_available(program: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {program} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// How the encoder process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderExit {
    Exited(i32),
    Signaled(i32),
    Unknown(String),
}

impl EncoderExit {
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            Self::Exited(code)
        } else if let Some(signal) = status.signal() {
            Self::Signaled(signal)
        } else {
            Self::Unknown(format!("{status:?}"))
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Exited(0))
    }

    /// Diagnostic error for anything but a clean exit.
    pub fn abnormal(&self) -> Option<CaptureError> {
        if self.is_success() {
            None
        } else {
            Some(CaptureError::EncoderExitAbnormal {
                status: self.to_string(),
            })
        }
    }
}

impl fmt::Display for EncoderExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
            Self::Unknown(status) => write!(f, "unexpected status {status}"),
        }
    }
}

/// A running encoder and the write end of its input pipe.
pub struct EncoderProcess {
    child: Child,
    input: Option<File>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    stderr_reader: Option<JoinHandle<()>>,
}

impl EncoderProcess {
    /// Create the pipe, spawn the encoder, and start draining its stderr.
    pub fn spawn(command: &EncoderCommand) -> CaptureResult<Self> {
        let (read_end, write_end) = cloexec_pipe()
            .map_err(|e| CaptureError::process_spawn(format!("pipe creation failed: {e}")))?;

        let read_raw = read_end.as_raw_fd();
        let fd_limit = descriptor_limit();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        // SAFETY: the closure runs between fork and exec and only issues
        // async-signal-safe syscalls (fcntl, dup2) on plain integers.
        unsafe {
            cmd.pre_exec(move || remap_child_descriptors(read_raw, fd_limit));
        }

        let mut child = cmd.spawn().map_err(|e| {
            CaptureError::process_spawn(format!("failed to start '{}': {e}", command.program))
        })?;
        // The child holds its own copy now.
        drop(read_end);

        tracing::info!(
            pid = child.id(),
            program = %command.program,
            args = ?command.args,
            "Encoder process started"
        );

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        let stderr_reader = match child.stderr.take() {
            Some(stderr) => {
                let tail = stderr_tail.clone();
                let spawned = thread::Builder::new()
                    .name("encoder-stderr".into())
                    .spawn(move || drain_stderr(stderr, tail));
                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        reap(&mut child);
                        return Err(CaptureError::thread_spawn("encoder-stderr", e));
                    }
                }
            }
            None => None,
        };

        Ok(Self {
            child,
            input: Some(File::from(write_end)),
            stderr_tail,
            stderr_reader,
        })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Write one whole frame, retrying short and interrupted writes.
    pub fn write_frame(&mut self, data: &[u8]) -> CaptureResult<()> {
        let expected = data.len();
        let Some(input) = self.input.as_mut() else {
            return Err(CaptureError::PipeWrite {
                written: 0,
                expected,
                source: io::Error::new(ErrorKind::BrokenPipe, "encoder input already closed"),
            });
        };

        let mut written = 0;
        while written < expected {
            match input.write(&data[written..]) {
                Ok(0) => {
                    return Err(CaptureError::PipeWrite {
                        written,
                        expected,
                        source: io::Error::from(ErrorKind::WriteZero),
                    });
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    if source.kind() == ErrorKind::BrokenPipe {
                        discard_pending_sigpipe();
                    }
                    return Err(CaptureError::PipeWrite {
                        written,
                        expected,
                        source,
                    });
                }
            }
        }
        Ok(())
    }

    /// Close the write end so the encoder sees end of input.
    pub fn close_input(&mut self) {
        if self.input.take().is_some() {
            tracing::debug!(pid = self.child.id(), "Encoder input closed");
        }
    }

    /// Close input, block until the process exits, and classify the result.
    pub fn wait(mut self) -> EncoderExit {
        self.close_input();
        let exit = match self.child.wait() {
            Ok(status) => EncoderExit::from_status(status),
            Err(e) => EncoderExit::Unknown(format!("wait failed: {e}")),
        };
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
        exit
    }

    /// [`wait`](Self::wait), also returning the last lines the encoder
    /// printed on stderr.
    pub fn finish(self) -> (EncoderExit, Vec<String>) {
        let tail = self.stderr_tail.clone();
        let exit = self.wait();
        let lines = tail
            .lock()
            .map(|tail| tail.iter().cloned().collect())
            .unwrap_or_default();
        (exit, lines)
    }

    /// Kill and reap the process; used when a session fails to start.
    pub fn abort(mut self) {
        self.input.take();
        reap(&mut self.child);
        if let Some(reader) = self.stderr_reader.take() {
            let _ = reader.join();
        }
    }
}

fn reap(child: &mut Child) {
    if let Err(e) = child.kill() {
        tracing::debug!(error = %e, "Encoder kill failed");
    }
    if let Err(e) = child.wait() {
        tracing::warn!(error = %e, "Failed to reap encoder process");
    }
}

fn drain_stderr(stderr: impl io::Read, tail: Arc<Mutex<VecDeque<String>>>) {
    let reader = BufReader::new(stderr);
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let line = line.trim_end().to_string();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(target: "livecap::encoder", "{line}");
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

/// Runs in the forked child: place the pipe on [`ENCODER_INPUT_FD`] and
/// mark every descriptor above it close-on-exec.
fn remap_child_descriptors(read_raw: RawFd, fd_limit: RawFd) -> io::Result<()> {
    // SAFETY: fcntl/dup2 on integer descriptors; failures are reported via errno.
    unsafe {
        if read_raw == ENCODER_INPUT_FD {
            let flags = libc::fcntl(read_raw, libc::F_GETFD);
            if flags < 0 {
                return Err(io::Error::last_os_error());
            }
            if libc::fcntl(read_raw, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                return Err(io::Error::last_os_error());
            }
        } else if libc::dup2(read_raw, ENCODER_INPUT_FD) < 0 {
            return Err(io::Error::last_os_error());
        }
        for fd in INHERIT_THRESHOLD_FD..fd_limit {
            libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
        }
    }
    Ok(())
}

fn sigpipe_set() -> libc::sigset_t {
    // SAFETY: sigemptyset initializes the zeroed set before sigaddset reads it.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGPIPE);
        set
    }
}

/// Block SIGPIPE on the calling thread. Writes to a pipe whose reader has
/// gone then fail with `EPIPE` even when the host keeps the default action.
pub(crate) fn block_sigpipe() -> io::Result<()> {
    let set = sigpipe_set();
    // SAFETY: `set` is initialized; the old mask is not requested.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Consume the SIGPIPE an `EPIPE` write left pending on this thread.
fn discard_pending_sigpipe() {
    let set = sigpipe_set();
    // SAFETY: both sets are initialized before use; sigwait only runs when
    // SIGPIPE is already pending, so it returns without blocking.
    unsafe {
        let mut pending: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut pending);
        if libc::sigpending(&mut pending) == 0 && libc::sigismember(&pending, libc::SIGPIPE) == 1 {
            let mut signal = 0;
            libc::sigwait(&set, &mut signal);
        }
    }
}

/// Highest descriptor number worth scanning in the child.
fn descriptor_limit() -> RawFd {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `limit` is a valid out-pointer for getrlimit.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    if rc != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return FD_SCAN_CAP;
    }
    RawFd::try_from(limit.rlim_cur)
        .unwrap_or(FD_SCAN_CAP)
        .min(FD_SCAN_CAP)
}

#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element buffer.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe2 succeeded; both descriptors are open and owned here.
    Ok(unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) })
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
fn cloexec_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` is a valid two-element buffer.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: pipe succeeded; both descriptors are open and owned here.
    let pair = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    for fd in [&pair.0, &pair.1] {
        // SAFETY: fcntl on a descriptor we own.
        if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(pair)
}
