//! Ownership of the current output file
//!
//! Exactly one output file is open at any instant. Every append and every
//! handle swap happens under the same mutex, so a chunk read from the pipe
//! lands entirely in one file even while a worker thread is draining.
//!
//! Writes are unbuffered: the files are primarily read by humans tailing
//! them, so timely visibility of partial lines wins over throughput.

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use tracing::warn;

/// Open a log file for appending, returning the file and its current size.
///
/// Log files are never truncated; reopening an existing path continues at
/// its end.
pub fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata().map(|m| m.len()).unwrap_or(0);
    Ok((file, size))
}

/// The currently open output file and its byte position.
pub struct FileSink {
    inner: Mutex<Current>,
}

struct Current {
    file: File,
    pos: u64,
}

impl FileSink {
    pub fn new(file: File, pos: u64) -> Self {
        Self {
            inner: Mutex::new(Current { file, pos }),
        }
    }

    /// Append one chunk to the current file.
    ///
    /// A short or failed write is reported once and not retried: the chunk
    /// is opaque pipe data and there is no better place to put it.
    pub fn write(&self, chunk: &[u8]) {
        let failure = {
            let mut cur = self.inner.lock();
            match cur.file.write(chunk) {
                Ok(n) => {
                    cur.pos += n as u64;
                    if n < chunk.len() {
                        Some(format!("wrote {} of {} bytes", n, chunk.len()))
                    } else {
                        None
                    }
                }
                Err(e) => Some(e.to_string()),
            }
        };
        // Reported after the lock is released; the diagnostic path below
        // takes the same lock.
        if let Some(detail) = failure {
            warn!("could not write to log file: {}", detail);
        }
    }

    /// Append a diagnostic line from the collector itself.
    ///
    /// Failures are swallowed: this is the terminal write path, and an
    /// error here has nowhere left to go.
    pub(crate) fn write_diagnostic(&self, buf: &[u8]) {
        let mut cur = self.inner.lock();
        if let Ok(n) = cur.file.write(buf) {
            cur.pos += n as u64;
        }
    }

    /// Install a freshly opened file as the current one.
    ///
    /// The old file is closed under the lock, so no write can land between
    /// the close and the swap.
    pub fn replace(&self, file: File, pos: u64) {
        let mut cur = self.inner.lock();
        cur.file = file;
        cur.pos = pos;
    }

    /// Byte position of the current file, mirrored from writes.
    pub fn position(&self) -> u64 {
        self.inner.lock().pos
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_open_append_reports_existing_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        fs::write(&path, b"12345").unwrap();

        let (_file, pos) = open_append(&path).unwrap();
        assert_eq!(pos, 5);
    }

    #[test]
    fn test_write_appends_and_tracks_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let (file, pos) = open_append(&path).unwrap();
        let sink = FileSink::new(file, pos);

        sink.write(b"hello ");
        sink.write(b"world\n");

        assert_eq!(sink.position(), 12);
        assert_eq!(fs::read(&path).unwrap(), b"hello world\n");
    }

    #[test]
    fn test_open_append_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");
        fs::write(&path, b"old").unwrap();

        let (file, pos) = open_append(&path).unwrap();
        let sink = FileSink::new(file, pos);
        sink.write(b"new");

        assert_eq!(fs::read(&path).unwrap(), b"oldnew");
    }

    #[test]
    fn test_replace_switches_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");

        let (file, pos) = open_append(&first).unwrap();
        let sink = FileSink::new(file, pos);
        sink.write(b"one");

        let (file, pos) = open_append(&second).unwrap();
        sink.replace(file, pos);
        sink.write(b"two");

        assert_eq!(fs::read(&first).unwrap(), b"one");
        assert_eq!(fs::read(&second).unwrap(), b"two");
        assert_eq!(sink.position(), 3);
    }

    #[test]
    fn test_diagnostic_writes_share_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log");

        let (file, pos) = open_append(&path).unwrap();
        let sink = FileSink::new(file, pos);

        sink.write(b"data");
        sink.write_diagnostic(b" diag");

        assert_eq!(fs::read(&path).unwrap(), b"data diag");
        assert_eq!(sink.position(), 9);
    }
}
