//! Centralized error types for the collector
//!
//! All collector errors are represented by the `CollectorError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, CollectorError>`.

use std::fmt;
use std::path::PathBuf;

/// All collector errors
#[derive(Debug)]
pub enum CollectorError {
    // === Startup ===
    /// Failed to create the stderr pipe
    PipeCreate { source: std::io::Error },
    /// Failed to adopt the inherited pipe read end
    PipeInherit { source: std::io::Error },
    /// Failed to open a log file
    LogFileOpen {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to redirect standard streams
    Redirect { source: std::io::Error },
    /// Failed to start the pipe worker
    Worker { source: std::io::Error },
    /// Failed to install signal dispositions
    Signals { source: std::io::Error },

    // === Config ===
    /// Failed to read the configuration file
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Configuration file did not parse
    ConfigParse { path: PathBuf, reason: String },

    // === Handle passing ===
    /// Malformed collector argument list
    ForkArgs { reason: String },
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PipeCreate { source }
            | Self::PipeInherit { source }
            | Self::LogFileOpen { source, .. }
            | Self::Redirect { source }
            | Self::Worker { source }
            | Self::Signals { source }
            | Self::ConfigRead { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for CollectorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PipeCreate { .. } => write!(f, "Cannot create pipe for log collection"),
            Self::PipeInherit { .. } => write!(f, "Cannot adopt inherited pipe read end"),
            Self::LogFileOpen { path, .. } => {
                write!(f, "Cannot open log file: {}", path.display())
            }
            Self::Redirect { .. } => write!(f, "Cannot redirect standard streams"),
            Self::Worker { .. } => write!(f, "Cannot start pipe worker thread"),
            Self::Signals { .. } => write!(f, "Cannot install signal dispositions"),
            Self::ConfigRead { path, .. } => {
                write!(f, "Cannot read config: {}", path.display())
            }
            Self::ConfigParse { path, reason } => {
                write!(f, "Invalid config {}: {}", path.display(), reason)
            }
            Self::ForkArgs { reason } => {
                write!(f, "Malformed collector argument list: {}", reason)
            }
        }
    }
}

/// Alias for Result with CollectorError
pub type Result<T> = std::result::Result<T, CollectorError>;
