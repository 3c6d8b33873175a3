//! Pseudo-terminal pair allocation.

use std::ffi::{CStr, CString};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

#[cfg(not(target_os = "linux"))]
use super::set_cloexec;
use crate::error::{CreationError, SpawnStep};

/// A freshly allocated master/slave pair.
///
/// Both descriptors are close-on-exec so children spawned concurrently by
/// other threads never inherit them.
#[derive(Debug)]
pub(crate) struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
    pub slave_path: CString,
}

/// Open `/dev/ptmx`, unlock the slave and open it.
pub(crate) fn open_pty() -> Result<PtyPair, CreationError> {
    let master = open_master()?;
    let fd = master.as_raw_fd();

    // SAFETY: grantpt/unlockpt only inspect the master descriptor.
    if unsafe { libc::grantpt(fd) } != 0 || unsafe { libc::unlockpt(fd) } != 0 {
        return Err(CreationError::last_os_error(SpawnStep::PtyOpen));
    }

    let slave_path = slave_name(fd)?;

    // SAFETY: slave_path is a valid NUL-terminated device path.
    let sfd = unsafe {
        libc::open(
            slave_path.as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
        )
    };
    if sfd < 0 {
        return Err(CreationError::last_os_error(SpawnStep::PtyOpen));
    }
    // SAFETY: sfd was just opened and is owned by nobody else.
    let slave = unsafe { OwnedFd::from_raw_fd(sfd) };

    Ok(PtyPair {
        master,
        slave,
        slave_path,
    })
}

/// Open the multiplexer with close-on-exec set atomically.
#[cfg(target_os = "linux")]
fn open_master() -> Result<OwnedFd, CreationError> {
    // SAFETY: the path is a NUL-terminated literal; the result is checked below.
    let fd = unsafe {
        libc::open(
            c"/dev/ptmx".as_ptr(),
            libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return Err(CreationError::last_os_error(SpawnStep::PtyOpen));
    }
    // SAFETY: fd was just opened and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

#[cfg(not(target_os = "linux"))]
fn open_master() -> Result<OwnedFd, CreationError> {
    // SAFETY: posix_openpt takes only flags; the result is checked below.
    let fd = unsafe { libc::posix_openpt(libc::O_RDWR | libc::O_NOCTTY) };
    if fd < 0 {
        return Err(CreationError::last_os_error(SpawnStep::PtyOpen));
    }
    // SAFETY: fd was just returned by posix_openpt and is owned by nobody else.
    let master = unsafe { OwnedFd::from_raw_fd(fd) };
    set_cloexec(fd).map_err(|e| pty_error(&e))?;
    Ok(master)
}

#[cfg(target_os = "linux")]
fn slave_name(master: RawFd) -> Result<CString, CreationError> {
    let mut buf = [0 as libc::c_char; 64];
    // SAFETY: buf is writable for its full length and ptsname_r NUL-terminates.
    let ret = unsafe { libc::ptsname_r(master, buf.as_mut_ptr(), buf.len()) };
    if ret != 0 {
        return Err(CreationError::new(SpawnStep::PtyOpen, ret));
    }
    // SAFETY: ptsname_r succeeded, so buf holds a NUL-terminated string.
    Ok(unsafe { CStr::from_ptr(buf.as_ptr()) }.to_owned())
}

#[cfg(not(target_os = "linux"))]
fn slave_name(master: RawFd) -> Result<CString, CreationError> {
    // ptsname uses a static buffer; copy out immediately.
    // SAFETY: master is a valid, unlocked pty master.
    let name = unsafe { libc::ptsname(master) };
    if name.is_null() {
        return Err(CreationError::last_os_error(SpawnStep::PtyOpen));
    }
    // SAFETY: ptsname returned a non-null NUL-terminated string.
    Ok(unsafe { CStr::from_ptr(name) }.to_owned())
}

#[cfg(not(target_os = "linux"))]
fn pty_error(err: &std::io::Error) -> CreationError {
    CreationError::new(SpawnStep::PtyOpen, err.raw_os_error().unwrap_or(libc::EIO))
}

impl PtyPair {
    /// Raw descriptors for the fork child, which cannot own anything.
    pub fn raw_fds(&self) -> (RawFd, RawFd) {
        (self.master.as_raw_fd(), self.slave.as_raw_fd())
    }
}
