//! Fork a child onto a fresh pseudo-terminal and exec the target program.

use std::ffi::CString;
use std::os::fd::{OwnedFd, RawFd};
use std::ptr;

use log::debug;

use super::config::{ExecStrings, SpawnConfig};
use super::pty::open_pty;
use super::status::{report_and_exit, ErrorChannel};
use crate::error::{CreationError, SpawnStep};

/// Highest descriptor the child bothers closing; anything above is expected
/// to be close-on-exec already.
const CLOSE_FD_CEILING: RawFd = 65536;

/// Number of signals to reset in the child (`NSIG`).
#[cfg(target_os = "linux")]
const NSIG: libc::c_int = 65;
#[cfg(not(target_os = "linux"))]
const NSIG: libc::c_int = 32;

/// A child that made it to `execve`.
#[derive(Debug)]
pub(crate) struct SpawnedChild {
    pub pid: libc::pid_t,
    pub master: OwnedFd,
    pub slave_path: CString,
}

/// Everything the child needs, prepared before `fork` so the child never
/// allocates.
struct ExecPlan<'a> {
    strings: &'a ExecStrings,
    slave_path: &'a CString,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
    master: RawFd,
    slave: RawFd,
    status_reader: RawFd,
    status_writer: RawFd,
    max_fd: RawFd,
}

/// Spawn `config` attached to a new pseudo-terminal.
///
/// Returns once the child has either exec'd successfully or reported which
/// setup step failed.
pub(crate) fn spawn(config: &SpawnConfig) -> Result<SpawnedChild, CreationError> {
    let strings = config.to_exec_strings()?;
    let pty = open_pty()?;
    let mut status = ErrorChannel::open()?;

    let (master, slave) = pty.raw_fds();
    let plan = ExecPlan {
        strings: &strings,
        slave_path: &pty.slave_path,
        argv: null_terminated(&strings.argv),
        envp: null_terminated(&strings.envp),
        master,
        slave,
        status_reader: status.reader_fd(),
        status_writer: status.writer_fd(),
        max_fd: open_max(),
    };

    // SAFETY: the child branch only runs async-signal-safe calls on data
    // prepared above and never returns.
    let pid = unsafe { libc::fork() };
    if pid < 0 {
        return Err(CreationError::last_os_error(SpawnStep::Fork));
    }
    if pid == 0 {
        // SAFETY: we are the freshly forked child.
        unsafe { child_exec(&plan) }
    }
    drop(plan);

    // The slave belongs to the child now; the parent only keeps the master.
    let super::pty::PtyPair {
        master,
        slave,
        slave_path,
    } = pty;
    drop(slave);
    status.close_writer();

    match status.wait() {
        Ok(()) => {
            debug!(
                "spawned {} as pid {} on {}",
                config.program.display(),
                pid,
                slave_path.to_string_lossy()
            );
            Ok(SpawnedChild {
                pid,
                master,
                slave_path,
            })
        }
        Err(e) => {
            debug!(
                "child {} for {} failed: {}",
                pid,
                config.program.display(),
                e
            );
            drop(master);
            reap_failed_child(pid, e.step == SpawnStep::StatusRead);
            Err(e)
        }
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

fn open_max() -> RawFd {
    // SAFETY: sysconf has no preconditions.
    let limit = unsafe { libc::sysconf(libc::_SC_OPEN_MAX) };
    if limit <= 0 {
        return 1024;
    }
    RawFd::try_from(limit).map_or(CLOSE_FD_CEILING, |l| l.min(CLOSE_FD_CEILING))
}

/// Collect a child that reported failure; it is already on its way out
/// unless the status record itself was garbled.
fn reap_failed_child(pid: libc::pid_t, kill_first: bool) {
    if kill_first {
        // SAFETY: pid is our own child.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
    let mut status = 0;
    loop {
        // SAFETY: status is a valid out-pointer.
        let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
        if ret >= 0 || std::io::Error::last_os_error().raw_os_error() != Some(libc::EINTR) {
            break;
        }
    }
}

/// Child process setup after fork.
///
/// # Safety
///
/// Must only be called in the child after `fork()`. Never returns: either
/// `execve` replaces the process image or the failing step is reported on the
/// status pipe and the child `_exit`s.
unsafe fn child_exec(plan: &ExecPlan<'_>) -> ! {
    let fail = |step: SpawnStep| -> ! {
        // SAFETY: still in the child, status_writer is open.
        unsafe { report_and_exit(plan.status_writer, step) }
    };

    // SAFETY: every call below is async-signal-safe and operates on
    // descriptors and strings owned by the plan.
    unsafe {
        libc::close(plan.status_reader);

        if libc::close(plan.slave) == -1 {
            fail(SpawnStep::CloseSlave);
        }
        if libc::close(plan.master) == -1 {
            fail(SpawnStep::CloseMaster);
        }
        if libc::setsid() == -1 {
            fail(SpawnStep::SessionDetach);
        }

        // Without O_NOCTTY the slave becomes our controlling terminal.
        let slave = libc::open(plan.slave_path.as_ptr(), libc::O_RDWR);
        if slave < 0 {
            fail(SpawnStep::SlaveReopen);
        }
        if reset_signals().is_err() {
            fail(SpawnStep::SignalReset);
        }
        if make_term(slave).is_err() {
            fail(SpawnStep::TerminalSetup);
        }
        if libc::dup2(slave, libc::STDIN_FILENO) == -1
            || libc::dup2(slave, libc::STDOUT_FILENO) == -1
            || libc::dup2(slave, libc::STDERR_FILENO) == -1
        {
            fail(SpawnStep::DescriptorDuplication);
        }
        if slave > libc::STDERR_FILENO {
            libc::close(slave);
        }

        for fd in (libc::STDERR_FILENO + 1)..plan.max_fd {
            if fd != plan.status_writer {
                libc::close(fd);
            }
        }

        let flags = libc::fcntl(plan.status_writer, libc::F_GETFD);
        if flags < 0
            || libc::fcntl(plan.status_writer, libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0
        {
            fail(SpawnStep::CloseOnExec);
        }

        libc::execve(
            plan.strings.program.as_ptr(),
            plan.argv.as_ptr(),
            plan.envp.as_ptr(),
        );
        fail(SpawnStep::Exec)
    }
}

/// Clear the signal mask and restore default dispositions.
///
/// # Safety
///
/// Only meant for a forked child about to exec.
unsafe fn reset_signals() -> Result<(), ()> {
    // SAFETY: sigset/sigaction structs are plain data, zeroed is a valid start.
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        if libc::sigemptyset(&mut set) < 0 {
            return Err(());
        }
        if libc::sigprocmask(libc::SIG_SETMASK, &set, ptr::null_mut()) < 0 {
            return Err(());
        }

        for sig in 1..NSIG {
            if sig == libc::SIGKILL || sig == libc::SIGSTOP {
                continue;
            }
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = libc::SIG_DFL;
            action.sa_flags = libc::SA_RESTART;
            if libc::sigaction(sig, &action, ptr::null_mut()) < 0 {
                // Signals reserved by the C library are rejected with EINVAL.
                if std::io::Error::last_os_error().raw_os_error() == Some(libc::EINVAL) {
                    continue;
                }
                return Err(());
            }
        }
    }
    Ok(())
}

/// Make `slave` our controlling terminal and re-apply its line discipline.
///
/// # Safety
///
/// Only meant for a forked child that just called `setsid`.
unsafe fn make_term(slave: RawFd) -> Result<(), ()> {
    // SAFETY: termios is plain data; slave is an open tty descriptor.
    unsafe {
        if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) == -1 {
            return Err(());
        }
        let mut term: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(slave, &mut term) != 0 {
            return Err(());
        }
        if libc::tcsetattr(slave, libc::TCSANOW, &term) != 0 {
            return Err(());
        }
    }
    Ok(())
}
