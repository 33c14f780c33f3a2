//! Pipe drain strategies
//!
//! Two semantically equivalent ways to move bytes from the pipe to the file
//! sink, unified behind `Drainer::pump_once`:
//! - `PollDrainer` waits up to one second for readability, then performs one
//!   bounded read. Used where the platform can wait on an unnamed pipe.
//! - `ThreadDrainer` runs a dedicated worker doing blocking reads and writing
//!   straight to the sink; `pump_once` only sleeps and watches the EOF latch.
//!   Used on Windows, where waiting for readability on an unnamed pipe is not
//!   available.
//!
//! Neither strategy preserves record boundaries: a chunk may start or end in
//! the middle of a line. Writers upstream own the atomicity of their writes.

use crate::collector::sink::FileSink;
use crate::constants::PIPE_CHUNK_SIZE;
use bytes::Bytes;
use os_pipe::PipeReader;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::warn;

/// Result of one drain attempt, bounded at roughly one second of waiting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// One chunk was read; the caller hands it to the sink.
    Data(Bytes),
    /// Nothing arrived within the wait interval.
    Idle,
    /// The last writer closed its end. No further reads will happen.
    Eof,
}

/// One attempt to move data from the pipe toward the sink.
pub trait Drainer {
    fn pump_once(&mut self) -> DrainOutcome;
}

// =============================================================================
// Bounded-wait drain (Unix)
// =============================================================================

#[cfg(unix)]
pub struct PollDrainer {
    pipe: PipeReader,
    buf: [u8; PIPE_CHUNK_SIZE],
}

#[cfg(unix)]
impl PollDrainer {
    pub fn new(pipe: PipeReader) -> Self {
        Self {
            pipe,
            buf: [0; PIPE_CHUNK_SIZE],
        }
    }
}

#[cfg(unix)]
impl Drainer for PollDrainer {
    fn pump_once(&mut self) -> DrainOutcome {
        use crate::constants::PIPE_WAIT_TIMEOUT_MS;
        use std::os::unix::io::AsRawFd;

        let mut pfd = libc::pollfd {
            fd: self.pipe.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut pfd, 1, PIPE_WAIT_TIMEOUT_MS as libc::c_int) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                warn!("wait on logger pipe failed: {}", err);
            }
            return DrainOutcome::Idle;
        }
        if rc == 0 {
            return DrainOutcome::Idle;
        }

        match self.pipe.read(&mut self.buf) {
            // Zero bytes while the pipe polls readable means every write
            // end is closed: the supervised tree is gone.
            Ok(0) => DrainOutcome::Eof,
            Ok(n) => DrainOutcome::Data(Bytes::copy_from_slice(&self.buf[..n])),
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => DrainOutcome::Idle,
            Err(e) => {
                warn!("could not read from logger pipe: {}", e);
                DrainOutcome::Idle
            }
        }
    }
}

// =============================================================================
// Worker-thread drain (Windows strategy, buildable everywhere)
// =============================================================================

/// Drain through a dedicated reader thread.
///
/// The worker owns the pipe read end and writes to the sink under the sink's
/// mutex. Setting the EOF latch is its last act before exiting.
pub struct ThreadDrainer {
    eof: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl ThreadDrainer {
    pub fn spawn(
        mut pipe: PipeReader,
        sink: Arc<FileSink>,
        poll_interval: Duration,
    ) -> std::io::Result<Self> {
        let eof = Arc::new(AtomicBool::new(false));
        let eof_worker = eof.clone();

        thread::Builder::new()
            .name("pipelog-drain".to_string())
            .spawn(move || {
                let mut buf = [0u8; PIPE_CHUNK_SIZE];
                loop {
                    match pipe.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => sink.write(&buf[..n]),
                        Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(ref e) if e.kind() == std::io::ErrorKind::BrokenPipe => break,
                        Err(e) => warn!("could not read from logger pipe: {}", e),
                    }
                }
                eof_worker.store(true, Ordering::SeqCst);
            })?;

        Ok(Self { eof, poll_interval })
    }
}

impl Drainer for ThreadDrainer {
    fn pump_once(&mut self) -> DrainOutcome {
        if self.eof.load(Ordering::SeqCst) {
            return DrainOutcome::Eof;
        }
        thread::sleep(self.poll_interval);
        if self.eof.load(Ordering::SeqCst) {
            DrainOutcome::Eof
        } else {
            DrainOutcome::Idle
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
