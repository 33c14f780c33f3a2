//! Signal dispositions for the collector process
//!
//! The reload handler performs exactly one atomic store and nothing else.
//! All termination signals are ignored: the collector exits on pipe EOF
//! only, so it can capture the dying output of every writer, the supervisor
//! included.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[cfg(unix)]
pub fn install(reload: Arc<AtomicBool>) -> std::io::Result<()> {
    use signal_hook::consts::signal::SIGHUP;
    use signal_hook::flag;

    flag::register(SIGHUP, reload)?;

    unsafe {
        for sig in [
            libc::SIGINT,
            libc::SIGTERM,
            libc::SIGQUIT,
            libc::SIGALRM,
            libc::SIGPIPE,
            libc::SIGUSR1,
            libc::SIGUSR2,
        ] {
            libc::signal(sig, libc::SIG_IGN);
        }
        // Dispositions inherited from the supervisor that do not apply here
        for sig in [
            libc::SIGCHLD,
            libc::SIGTTIN,
            libc::SIGTTOU,
            libc::SIGCONT,
            libc::SIGWINCH,
        ] {
            libc::signal(sig, libc::SIG_DFL);
        }
    }
    Ok(())
}

/// No reload signal delivery on this platform; configuration changes take
/// effect when the collector is restarted.
#[cfg(windows)]
pub fn install(_reload: Arc<AtomicBool>) -> std::io::Result<()> {
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
