//! The collector process
//!
//! A dedicated child process that drains stderr of the supervisor and all of
//! its descendants from a shared pipe and appends it to a rotating family of
//! log files. The stream is opaque bytes: nothing here parses, filters, or
//! reframes it.
//!
//! One main loop polls, in order: the reload latch, the rotation clock, the
//! file size, then the pipe. The loop blocks for at most one second at a
//! time, so a reload or rotation trigger is honored within about a second.
//! The process exits only on pipe EOF, which can happen only once every
//! writer, the supervisor included, is gone.

pub mod drain;
pub mod rotation;
pub mod signals;
pub mod sink;

use crate::config::{self, CollectorConfig};
use crate::error::{CollectorError, Result};
use crate::launcher::{self, ForkArgs};
use crate::logging;
use chrono::{DateTime, Local};
use drain::{DrainOutcome, Drainer};
use sink::FileSink;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// Collector state, threaded through the main loop.
///
/// The reload latch is the only piece the signal layer touches; everything
/// else belongs to the loop alone.
pub struct Collector<D: Drainer> {
    drainer: D,
    sink: Arc<FileSink>,
    config: CollectorConfig,
    config_path: PathBuf,
    data_dir: PathBuf,
    supervisor_pid: u32,
    reload_requested: Arc<AtomicBool>,
    current_log_dir: PathBuf,
    last_rotation_time: i64,
    pipe_eof_seen: bool,
}

impl<D: Drainer> Collector<D> {
    pub fn new(
        drainer: D,
        sink: Arc<FileSink>,
        config: CollectorConfig,
        data_dir: PathBuf,
        supervisor_pid: u32,
        reload_requested: Arc<AtomicBool>,
    ) -> Self {
        let current_log_dir = config.log_directory.clone();
        Self {
            drainer,
            sink,
            config_path: config::config_path(&data_dir),
            config,
            data_dir,
            supervisor_pid,
            reload_requested,
            current_log_dir,
            // Suppresses a pointless rotation right after startup.
            last_rotation_time: Local::now().timestamp(),
            pipe_eof_seen: false,
        }
    }

    /// Main loop. Returns after pipe EOF, the only orderly exit.
    pub fn run(mut self) -> Result<()> {
        loop {
            let mut rotation_requested = false;

            if self.reload_requested.swap(false, Ordering::Relaxed) {
                rotation_requested = self.process_reload();
            }

            if !rotation_requested
                && rotation::age_exceeded(
                    Local::now().timestamp(),
                    self.last_rotation_time,
                    self.config.rotation_age_minutes,
                )
            {
                rotation_requested = true;
            }

            if !rotation_requested
                && rotation::size_exceeded(self.sink.position(), self.config.rotation_size_kib)
            {
                rotation_requested = true;
            }

            if rotation_requested {
                self.rotate();
            }

            match self.drainer.pump_once() {
                DrainOutcome::Data(chunk) => {
                    self.sink.write(&chunk);
                    continue;
                }
                DrainOutcome::Idle => {}
                DrainOutcome::Eof => self.pipe_eof_seen = true,
            }

            if self.pipe_eof_seen {
                info!("log collector shutting down");
                return Ok(());
            }
        }
    }

    /// Reread the configuration after a reload signal.
    ///
    /// Returns true when the output directory changed, which forces a
    /// rotation so new files land in the right place.
    fn process_reload(&mut self) -> bool {
        match CollectorConfig::read(&self.config_path) {
            Ok(mut fresh) => {
                // Fixed at supervisor startup; a reload cannot change it.
                fresh.redirect_stderr = self.config.redirect_stderr;
                self.config = fresh;
            }
            Err(e) => {
                warn!("configuration reload failed: {}", e);
                return false;
            }
        }

        if self.config.log_directory != self.current_log_dir {
            self.current_log_dir = self.config.log_directory.clone();
            return true;
        }
        false
    }

    fn rotate(&mut self) {
        self.rotate_at(Local::now());
    }

    /// Open the next file and swap it in.
    ///
    /// On failure the old file stays in place. Descriptor exhaustion leaves
    /// rotation armed so the next trigger retries; any other failure means
    /// the directory is suspect, so automatic rotation is disabled until a
    /// reload re-enables it.
    fn rotate_at(&mut self, now: DateTime<Local>) {
        let path = rotation::logfile_path(
            &self.config.log_directory,
            &self.data_dir,
            &self.config.log_filename_prefix,
            self.supervisor_pid,
            &now,
        );

        match sink::open_append(&path) {
            Ok((file, pos)) => {
                self.sink.replace(file, pos);
                self.last_rotation_time = now.timestamp();
            }
            Err(e) => {
                warn!("could not open new log file {}: {}", path.display(), e);
                if !rotation::is_fd_exhaustion(&e) {
                    warn!("disabling automatic rotation (reload configuration to re-enable)");
                    self.config.rotation_age_minutes = 0;
                    self.config.rotation_size_kib = 0;
                }
            }
        }
    }
}

// =============================================================================
// Bootstrap
// =============================================================================

/// Entry point of the collector child process.
pub fn run_from_args(args: ForkArgs) -> Result<()> {
    // A respawned collector inherits a stderr that already points at the
    // very pipe it is about to drain. Left alone, that descriptor would hold
    // a write end open forever and defeat EOF detection.
    if args.redirection_done {
        point_stdio_at_null().map_err(|e| CollectorError::Redirect { source: e })?;
    }

    let config = CollectorConfig::load(&config::config_path(&args.data_dir));

    let (file, pos) = match args.logfile_handle {
        Some(raw) => {
            let file = unsafe { launcher::adopt_logfile(raw) };
            let pos = file.metadata().map(|m| m.len()).unwrap_or(0);
            (file, pos)
        }
        None => {
            let path = rotation::logfile_path(
                &config.log_directory,
                &args.data_dir,
                &config.log_filename_prefix,
                args.supervisor_pid,
                &Local::now(),
            );
            sink::open_append(&path).map_err(|e| CollectorError::LogFileOpen {
                path,
                source: e,
            })?
        }
    };
    let sink = Arc::new(FileSink::new(file, pos));

    let reload = Arc::new(AtomicBool::new(false));
    signals::install(reload.clone()).map_err(|e| CollectorError::Signals { source: e })?;

    // From here on the collector's own diagnostics land in the log file.
    logging::init_sink_tracing(sink.clone());

    let pipe = os_pipe::dup_stdin().map_err(|e| CollectorError::PipeInherit { source: e })?;

    #[cfg(unix)]
    {
        let drainer = drain::PollDrainer::new(pipe);
        Collector::new(
            drainer,
            sink,
            config,
            args.data_dir,
            args.supervisor_pid,
            reload,
        )
        .run()
    }
    #[cfg(windows)]
    {
        use crate::constants::PIPE_WAIT_TIMEOUT_MS;
        use std::time::Duration;

        let drainer = drain::ThreadDrainer::spawn(
            pipe,
            sink.clone(),
            Duration::from_millis(PIPE_WAIT_TIMEOUT_MS),
        )
        .map_err(|e| CollectorError::Worker { source: e })?;
        Collector::new(
            drainer,
            sink,
            config,
            args.data_dir,
            args.supervisor_pid,
            reload,
        )
        .run()
    }
}

#[cfg(unix)]
fn point_stdio_at_null() -> std::io::Result<()> {
    use crate::constants::NULL_DEVICE;
    use std::os::unix::io::AsRawFd;

    let null = std::fs::OpenOptions::new().write(true).open(NULL_DEVICE)?;
    unsafe {
        if libc::dup2(null.as_raw_fd(), libc::STDOUT_FILENO) < 0
            || libc::dup2(null.as_raw_fd(), libc::STDERR_FILENO) < 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(windows)]
fn point_stdio_at_null() -> std::io::Result<()> {
    use crate::constants::NULL_DEVICE;
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::System::Console::{
        SetStdHandle, STD_ERROR_HANDLE, STD_OUTPUT_HANDLE,
    };

    let null = std::fs::OpenOptions::new().write(true).open(NULL_DEVICE)?;
    unsafe {
        if SetStdHandle(STD_OUTPUT_HANDLE, null.as_raw_handle() as _) == 0
            || SetStdHandle(STD_ERROR_HANDLE, null.as_raw_handle() as _) == 0
        {
            return Err(std::io::Error::last_os_error());
        }
    }
    // The handle backs the standard streams for the rest of the process.
    std::mem::forget(null);
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;

    /// Drainer that never produces data; rotation tests drive the collector
    /// by hand instead of through the loop.
    struct NoopDrainer;

    impl Drainer for NoopDrainer {
        fn pump_once(&mut self) -> DrainOutcome {
            DrainOutcome::Eof
        }
    }

    fn collector_in(
        data_dir: &Path,
        config: CollectorConfig,
    ) -> (Collector<NoopDrainer>, std::path::PathBuf) {
        let initial = data_dir.join("initial.log");
        let (file, pos) = sink::open_append(&initial).unwrap();
        let collector = Collector::new(
            NoopDrainer,
            Arc::new(FileSink::new(file, pos)),
            config,
            data_dir.to_path_buf(),
            77,
            Arc::new(AtomicBool::new(false)),
        );
        (collector, initial)
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 10, h, m, s).unwrap()
    }

    #[test]
    fn test_rotation_moves_following_writes_to_the_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            log_directory: PathBuf::from("logs"),
            ..CollectorConfig::default()
        };
        fs::create_dir(dir.path().join("logs")).unwrap();
        let (mut collector, initial) = collector_in(dir.path(), config);

        collector.sink.write(b"before");
        collector.rotate_at(at(9, 0, 0));
        collector.sink.write(b"after");

        let rotated = dir
            .path()
            .join("logs")
            .join("pipelog-00077_2025-03-10_090000.log");
        assert_eq!(fs::read(&initial).unwrap(), b"before");
        assert_eq!(fs::read(&rotated).unwrap(), b"after");
        assert_eq!(collector.last_rotation_time, at(9, 0, 0).timestamp());
    }

    #[test]
    fn test_same_second_rotation_reopens_the_same_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            log_directory: PathBuf::from("logs"),
            ..CollectorConfig::default()
        };
        fs::create_dir(dir.path().join("logs")).unwrap();
        let (mut collector, _initial) = collector_in(dir.path(), config);

        collector.rotate_at(at(9, 0, 0));
        collector.sink.write(b"one");
        collector.rotate_at(at(9, 0, 0));
        collector.sink.write(b"two");

        let rotated = dir
            .path()
            .join("logs")
            .join("pipelog-00077_2025-03-10_090000.log");
        assert_eq!(fs::read(&rotated).unwrap(), b"onetwo");
    }

    #[test]
    fn test_open_failure_disables_rotation_and_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the log directory should be makes every open
        // fail with something other than descriptor exhaustion.
        fs::write(dir.path().join("blocker"), b"").unwrap();
        let config = CollectorConfig {
            rotation_age_minutes: 60,
            rotation_size_kib: 128,
            log_directory: dir.path().join("blocker").join("logs"),
            ..CollectorConfig::default()
        };
        let (mut collector, initial) = collector_in(dir.path(), config);
        let before = collector.last_rotation_time;

        collector.rotate_at(at(10, 0, 0));

        assert_eq!(collector.config.rotation_age_minutes, 0);
        assert_eq!(collector.config.rotation_size_kib, 0);
        assert_eq!(collector.last_rotation_time, before);

        collector.sink.write(b"still here");
        assert_eq!(fs::read(&initial).unwrap(), b"still here");
    }

    #[test]
    fn test_reload_detects_directory_change() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            log_directory: PathBuf::from("a"),
            ..CollectorConfig::default()
        };
        let (mut collector, _initial) = collector_in(dir.path(), config);

        fs::write(
            config::config_path(dir.path()),
            "log_directory = \"b\"\nrotation_size_kib = 5\n",
        )
        .unwrap();

        assert!(collector.process_reload());
        assert_eq!(collector.current_log_dir, PathBuf::from("b"));
        assert_eq!(collector.config.rotation_size_kib, 5);

        // Same directory again: no rotation request this time.
        assert!(!collector.process_reload());
    }

    #[test]
    fn test_reload_keeps_previous_config_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            rotation_size_kib: 321,
            ..CollectorConfig::default()
        };
        let (mut collector, _initial) = collector_in(dir.path(), config);

        fs::write(config::config_path(dir.path()), "rotation_size_kib = [").unwrap();

        assert!(!collector.process_reload());
        assert_eq!(collector.config.rotation_size_kib, 321);
    }

    #[test]
    fn test_reload_cannot_change_redirect_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let config = CollectorConfig {
            redirect_stderr: true,
            ..CollectorConfig::default()
        };
        let (mut collector, _initial) = collector_in(dir.path(), config);

        fs::write(config::config_path(dir.path()), "redirect_stderr = false").unwrap();

        collector.process_reload();
        assert!(collector.config.redirect_stderr);
    }
}
