//! Child process layer: pseudo-terminal allocation, fork/exec, and the
//! status pipe that reports setup failures from the child.
//!
//! This module also carries the small reaping helpers used when a pool is
//! shut down. Sessions themselves never wait for their children.

pub mod config;
mod pty;
mod spawn;
mod status;

pub use config::SpawnConfig;
pub(crate) use spawn::spawn;

use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// Interval between `waitpid` polls in [`wait_for_exit`].
const REAP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Mark a file descriptor close-on-exec.
#[cfg(not(target_os = "linux"))]
pub(crate) fn set_cloexec(fd: std::os::fd::RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-owned descriptor only touches its flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Reap `pid` if it has already exited, without blocking.
///
/// Returns `true` when the child is gone (reaped now, or not our child any
/// more).
pub fn try_reap(pid: libc::pid_t) -> bool {
    let mut status = 0;
    // SAFETY: status is a valid out-pointer; WNOHANG never blocks.
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    ret != 0
}

/// Poll for `pid` to exit for up to `timeout`.
///
/// Returns `true` if the child was reaped (or was already gone).
pub fn wait_for_exit(pid: libc::pid_t, timeout: Duration) -> bool {
    let start = Instant::now();
    loop {
        if try_reap(pid) {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        thread::sleep(REAP_POLL_INTERVAL);
    }
}

/// Probe whether `pid` still exists (zombies included).
pub fn is_alive(pid: libc::pid_t) -> bool {
    if pid <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
