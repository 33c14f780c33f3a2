//! Rotation decisions and log file naming

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Build the log file path for one rotation instant.
///
/// Pure: the same inputs always yield the same path. Two rotations within
/// the same wall-clock second therefore share a path, and the second one
/// amounts to reopening the first file for append.
pub fn logfile_path(
    log_directory: &Path,
    data_dir: &Path,
    prefix: &str,
    supervisor_pid: u32,
    stamp: &DateTime<Local>,
) -> PathBuf {
    let dir = if log_directory.is_absolute() {
        log_directory.to_path_buf()
    } else {
        data_dir.join(log_directory)
    };
    dir.join(format!(
        "{}{:05}_{}.log",
        prefix,
        supervisor_pid,
        stamp.format("%Y-%m-%d_%H%M%S")
    ))
}

/// True when time-based rotation is enabled and due.
pub fn age_exceeded(now_secs: i64, last_rotation_secs: i64, age_minutes: u64) -> bool {
    age_minutes > 0 && now_secs - last_rotation_secs >= age_minutes as i64 * 60
}

/// True when size-based rotation is enabled and the file is large enough.
pub fn size_exceeded(position: u64, size_kib: u64) -> bool {
    size_kib > 0 && position >= size_kib * 1024
}

/// Classify a rotation open failure.
///
/// Descriptor exhaustion clears up by itself on a busy system, so it keeps
/// rotation enabled; any other failure means the directory itself is suspect
/// and disables rotation until the next reload.
pub fn is_fd_exhaustion(err: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE) | Some(libc::ENFILE)
        )
    }
    #[cfg(windows)]
    {
        // ERROR_TOO_MANY_OPEN_FILES
        matches!(err.raw_os_error(), Some(4))
    }
}

// ============================================================================
// Tests
// ============================================================================
