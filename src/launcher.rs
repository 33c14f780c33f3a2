//! Supervisor-side startup and the handle-passing boundary
//!
//! The supervisor creates the pipe once and keeps its read end for the whole
//! run: a crashed collector is respawned against the same pipe, because the
//! supervised tree still holds write ends of it. The initial log file is
//! opened here, before anything is spawned, to prove the log directory is
//! writable.
//!
//! Handles cross the process boundary in a fixed five-element argument list:
//! `[program, "-forklog", <pid>:<data_dir>, <handle|-1>, <0|1>]`. The encode
//! and decode halves live together in this module so the layout cannot
//! drift apart.

use crate::collector::{rotation, sink};
use crate::config::CollectorConfig;
use crate::constants::FORKLOG_MARKER;
use crate::error::{CollectorError, Result};
use chrono::Local;
use os_pipe::{PipeReader, PipeWriter};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::warn;

// =============================================================================
// Handle passing
// =============================================================================

/// Everything the collector child learns from its argument list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkArgs {
    pub supervisor_pid: u32,
    pub data_dir: PathBuf,
    /// Raw value of the inherited current-file handle, if one was passed.
    pub logfile_handle: Option<i64>,
    /// Whether the supervisor already points stderr at the pipe.
    pub redirection_done: bool,
}

/// Encode the collector arguments (everything after the program name).
pub fn encode_fork_args(args: &ForkArgs) -> Vec<String> {
    vec![
        FORKLOG_MARKER.to_string(),
        format!("{}:{}", args.supervisor_pid, args.data_dir.display()),
        args.logfile_handle
            .map_or_else(|| "-1".to_string(), |h| h.to_string()),
        if args.redirection_done { "1" } else { "0" }.to_string(),
    ]
}

/// Decode the collector arguments (everything after the program name).
pub fn parse_fork_args(argv: &[String]) -> Result<ForkArgs> {
    let malformed = |reason: String| CollectorError::ForkArgs { reason };

    if argv.len() != 4 {
        return Err(malformed(format!(
            "expected 4 collector arguments, got {}",
            argv.len()
        )));
    }
    if argv[0] != FORKLOG_MARKER {
        return Err(malformed(format!("unknown marker {:?}", argv[0])));
    }

    // The context slot is "<pid>:<data_dir>"; the path may itself contain
    // colons (drive letters), so only the first one splits.
    let (pid, dir) = argv[1]
        .split_once(':')
        .ok_or_else(|| malformed(format!("bad supervisor context {:?}", argv[1])))?;
    let supervisor_pid = pid
        .parse::<u32>()
        .map_err(|_| malformed(format!("bad supervisor pid {:?}", pid)))?;

    let handle = argv[2]
        .parse::<i64>()
        .map_err(|_| malformed(format!("bad handle value {:?}", argv[2])))?;

    let redirection_done = match argv[3].as_str() {
        "0" => false,
        "1" => true,
        other => return Err(malformed(format!("bad redirection flag {:?}", other))),
    };

    Ok(ForkArgs {
        supervisor_pid,
        data_dir: PathBuf::from(dir),
        logfile_handle: (handle >= 0).then_some(handle),
        redirection_done,
    })
}

/// Adopt a handle passed down from the supervisor as an open `File`.
///
/// # Safety
///
/// `raw` must be the handle value carried in the collector argument list,
/// open in this process and owned by nothing else.
pub unsafe fn adopt_logfile(raw: i64) -> File {
    #[cfg(unix)]
    {
        use std::os::unix::io::FromRawFd;
        File::from_raw_fd(raw as i32)
    }
    #[cfg(windows)]
    {
        use std::os::windows::io::FromRawHandle;
        File::from_raw_handle(raw as _)
    }
}

// =============================================================================
// Supervisor-side startup
// =============================================================================

/// Starts the collector and keeps what a respawn needs: the pipe read end
/// and the fact that stderr already points at the pipe.
pub struct Spawner {
    pipe_read: Option<PipeReader>,
    redirection_done: bool,
}

impl Spawner {
    pub fn new() -> Self {
        Self {
            pipe_read: None,
            redirection_done: false,
        }
    }

    /// Start (or restart) the collector child.
    ///
    /// Returns `Ok(None)` when stderr capture is disabled, and also when the
    /// child could not be spawned: the supervisor runs without a collector
    /// rather than not at all. Pipe creation and initial-file failures are
    /// errors, because continuing would lose the log stream silently.
    pub fn start(&mut self, config: &CollectorConfig, data_dir: &Path) -> Result<Option<Child>> {
        if !config.redirect_stderr {
            return Ok(None);
        }

        // First start creates the pipe; a respawn reuses it.
        let (child_stdin, pipe_write) = match &self.pipe_read {
            Some(reader) => (
                reader
                    .try_clone()
                    .map_err(|e| CollectorError::PipeCreate { source: e })?,
                None,
            ),
            None => {
                let (reader, writer) =
                    os_pipe::pipe().map_err(|e| CollectorError::PipeCreate { source: e })?;
                let clone = reader
                    .try_clone()
                    .map_err(|e| CollectorError::PipeCreate { source: e })?;
                self.pipe_read = Some(reader);
                (clone, Some(writer))
            }
        };

        // Create the log directory; an unusable one surfaces on the open
        // right below.
        let log_dir = if config.log_directory.is_absolute() {
            config.log_directory.clone()
        } else {
            data_dir.join(&config.log_directory)
        };
        let _ = create_log_dir(&log_dir);

        let now = Local::now();
        let path = rotation::logfile_path(
            &config.log_directory,
            data_dir,
            &config.log_filename_prefix,
            std::process::id(),
            &now,
        );
        let (logfile, _pos) = sink::open_append(&path).map_err(|e| CollectorError::LogFileOpen {
            path,
            source: e,
        })?;

        let fork_args = ForkArgs {
            supervisor_pid: std::process::id(),
            data_dir: data_dir.to_path_buf(),
            logfile_handle: None,
            redirection_done: self.redirection_done,
        };

        let child = match spawn_collector(&fork_args, child_stdin, &logfile) {
            Ok(child) => child,
            Err(e) => {
                warn!("could not start log collector: {}", e);
                return Ok(None);
            }
        };

        // With the collector up, route our own output into the pipe. Every
        // process spawned from here on inherits these streams. The write-end
        // copy is dropped right after: only inheritable standard streams may
        // keep the pipe open, or EOF detection breaks.
        if let Some(writer) = pipe_write {
            redirect_own_stderr(&writer).map_err(|e| CollectorError::Redirect { source: e })?;
            self.redirection_done = true;
        }

        // The supervisor never writes the file itself.
        drop(logfile);

        Ok(Some(child))
    }
}

impl Default for Spawner {
    fn default() -> Self {
        Self::new()
    }
}

fn create_log_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(path)
    }
    #[cfg(windows)]
    {
        std::fs::create_dir_all(path)
    }
}

#[cfg(unix)]
fn spawn_collector(args: &ForkArgs, pipe: PipeReader, logfile: &File) -> std::io::Result<Child> {
    use crate::constants::LOGFILE_FD_SLOT;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    let argv = encode_fork_args(&ForkArgs {
        logfile_handle: Some(LOGFILE_FD_SLOT as i64),
        ..args.clone()
    });

    let src_fd = logfile.as_raw_fd();
    let mut cmd = Command::new(exe);
    cmd.args(&argv).stdin(Stdio::from(pipe));
    unsafe {
        cmd.pre_exec(move || {
            // dup2 onto the fixed slot clears close-on-exec there; a
            // descriptor already sitting on the slot needs the flag cleared
            // by hand instead.
            if src_fd == LOGFILE_FD_SLOT {
                let flags = libc::fcntl(src_fd, libc::F_GETFD);
                if flags < 0
                    || libc::fcntl(src_fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0
                {
                    return Err(std::io::Error::last_os_error());
                }
            } else if libc::dup2(src_fd, LOGFILE_FD_SLOT) < 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
    cmd.spawn()
}

#[cfg(windows)]
fn spawn_collector(args: &ForkArgs, pipe: PipeReader, logfile: &File) -> std::io::Result<Child> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{SetHandleInformation, HANDLE_FLAG_INHERIT};

    let raw = logfile.as_raw_handle();
    let ok = unsafe { SetHandleInformation(raw as _, HANDLE_FLAG_INHERIT, HANDLE_FLAG_INHERIT) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }

    let exe = std::env::current_exe()?;
    let argv = encode_fork_args(&ForkArgs {
        logfile_handle: Some(raw as i64),
        ..args.clone()
    });

    Command::new(exe)
        .args(&argv)
        .stdin(Stdio::from(pipe))
        .spawn()
}

#[cfg(unix)]
fn redirect_own_stderr(writer: &PipeWriter) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let fd = writer.as_raw_fd();
    unsafe {
        if libc::dup2(fd, libc::STDOUT_FILENO) < 0 || libc::dup2(fd, libc::STDERR_FILENO) < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(windows)]
fn redirect_own_stderr(writer: &PipeWriter) -> std::io::Result<()> {
    use std::os::windows::io::AsRawHandle;
    use windows_sys::Win32::Foundation::{
        DuplicateHandle, GetCurrentProcess, DUPLICATE_SAME_ACCESS,
    };
    use windows_sys::Win32::System::Console::{
        SetStdHandle, STD_ERROR_HANDLE, STD_OUTPUT_HANDLE,
    };

    unsafe {
        let process = GetCurrentProcess();
        let mut dup = std::ptr::null_mut();
        if DuplicateHandle(
            process,
            writer.as_raw_handle() as _,
            process,
            &mut dup,
            0,
            1,
            DUPLICATE_SAME_ACCESS,
        ) == 0
        {
            return Err(std::io::Error::last_os_error());
        }
        if SetStdHandle(STD_OUTPUT_HANDLE, dup) == 0 || SetStdHandle(STD_ERROR_HANDLE, dup) == 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn roundtrip(args: &ForkArgs) -> ForkArgs {
        parse_fork_args(&encode_fork_args(args)).unwrap()
    }

    #[test]
    fn test_fork_args_roundtrip() {
        let args = ForkArgs {
            supervisor_pid: 4242,
            data_dir: PathBuf::from("/srv/data"),
            logfile_handle: Some(3),
            redirection_done: true,
        };
        assert_eq!(roundtrip(&args), args);
    }

    #[test]
    fn test_fork_args_roundtrip_without_handle() {
        let args = ForkArgs {
            supervisor_pid: 1,
            data_dir: PathBuf::from("."),
            logfile_handle: None,
            redirection_done: false,
        };
        assert_eq!(roundtrip(&args), args);
    }

    #[test]
    fn test_context_keeps_colons_in_the_path() {
        let args = ForkArgs {
            supervisor_pid: 99,
            data_dir: PathBuf::from(r"C:\data"),
            logfile_handle: None,
            redirection_done: true,
        };
        assert_eq!(roundtrip(&args).data_dir, PathBuf::from(r"C:\data"));
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        let argv = vec![FORKLOG_MARKER.to_string(), "1:.".to_string()];
        assert!(matches!(
            parse_fork_args(&argv),
            Err(CollectorError::ForkArgs { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_marker() {
        let argv = vec![
            "--forklog".to_string(),
            "1:.".to_string(),
            "-1".to_string(),
            "0".to_string(),
        ];
        assert!(matches!(
            parse_fork_args(&argv),
            Err(CollectorError::ForkArgs { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_bad_pid_and_flag() {
        let bad_pid = vec![
            FORKLOG_MARKER.to_string(),
            "x:.".to_string(),
            "-1".to_string(),
            "0".to_string(),
        ];
        assert!(parse_fork_args(&bad_pid).is_err());

        let bad_flag = vec![
            FORKLOG_MARKER.to_string(),
            "1:.".to_string(),
            "-1".to_string(),
            "yes".to_string(),
        ];
        assert!(parse_fork_args(&bad_flag).is_err());
    }

    proptest! {
        #[test]
        fn prop_fork_args_roundtrip(
            pid in any::<u32>(),
            dir in "[a-zA-Z0-9_/.]{1,24}",
            handle in -1i64..=65535,
            redirected in any::<bool>(),
        ) {
            let args = ForkArgs {
                supervisor_pid: pid,
                data_dir: PathBuf::from(dir),
                logfile_handle: (handle >= 0).then_some(handle),
                redirection_done: redirected,
            };
            prop_assert_eq!(roundtrip(&args), args);
        }
    }
}
