//! Application-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Pipe drain
// =============================================================================

/// Bytes read from the pipe per drain attempt
pub const PIPE_CHUNK_SIZE: usize = 1024;

/// Bounded wait for pipe readability per main-loop iteration (milliseconds)
pub const PIPE_WAIT_TIMEOUT_MS: u64 = 1000;

// =============================================================================
// Collector process
// =============================================================================

/// Argument marker that selects collector mode before CLI parsing
pub const FORKLOG_MARKER: &str = "-forklog";

/// Descriptor slot the inherited log file is moved to in the collector child
#[cfg(unix)]
pub const LOGFILE_FD_SLOT: i32 = 3;

/// Null device path, used to detach the collector's own standard streams
#[cfg(unix)]
pub const NULL_DEVICE: &str = "/dev/null";
#[cfg(windows)]
pub const NULL_DEVICE: &str = "NUL";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name inside the data directory
pub const CONFIG_FILE_NAME: &str = "pipelog.toml";
