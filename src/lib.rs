//! Rotating stderr log collector
//!
//! pipelog drains standard-error output of a supervisor process and all of
//! its descendants through a shared pipe and persists it to a rotating
//! family of log files. The collector runs as a dedicated child process that
//! outlives every writer: it exits only once the last write end of the pipe
//! is closed, so even the dying output of a crashing supervisor is captured.
//!
//! Rotation is driven by wall-clock age and file size, and by configuration
//! reloads that move the log directory. The pipe stream is treated as opaque
//! bytes end to end.

pub mod cli;
pub mod collector;
pub mod config;
pub mod constants;
pub mod error;
pub mod launcher;
pub mod logging;

pub use collector::Collector;
pub use config::CollectorConfig;
pub use error::{CollectorError, Result};
