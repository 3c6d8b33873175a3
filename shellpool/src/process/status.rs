//! One-shot status pipe from a forked child back to its parent.
//!
//! The child either writes a single `(step_code, errno)` record and exits, or
//! reaches `execve`, whose close-on-exec handling closes the write end. The
//! parent tells the two apart by reading to end-of-stream: no bytes means the
//! exec went through.
//!
//! The child side cannot use `log` or anything else that may take a lock
//! inherited mid-operation from another thread, so it sticks to raw
//! `write(2)` and `_exit(2)`.

use std::fs::File;
use std::io::{self, Read};
use std::mem::size_of;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

#[cfg(not(target_os = "linux"))]
use super::set_cloexec;
use crate::error::{CreationError, SpawnStep};

/// Size of a status record: two native-endian `i32`s.
const RECORD_LEN: usize = 2 * size_of::<i32>();

/// Exit code of a child that failed before exec.
const CHILD_FAILURE_EXIT: libc::c_int = 127;

/// Status pipe used for the duration of a single spawn.
#[derive(Debug)]
pub(crate) struct ErrorChannel {
    reader: OwnedFd,
    writer: Option<OwnedFd>,
}

impl ErrorChannel {
    /// Create the pipe with both ends close-on-exec.
    pub fn open() -> Result<Self, CreationError> {
        let [reader, writer] = cloexec_pipe()?;
        Ok(Self {
            reader,
            writer: Some(writer),
        })
    }

    /// Raw read end, for the child to close.
    pub fn reader_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    /// Raw write end, for the child to report through.
    pub fn writer_fd(&self) -> RawFd {
        self.writer.as_ref().map_or(-1, AsRawFd::as_raw_fd)
    }

    /// Parent side: drop the write end so end-of-stream becomes observable.
    pub fn close_writer(&mut self) {
        self.writer = None;
    }

    /// Parent side: read to end-of-stream and decode the child's verdict.
    ///
    /// Must be called after [`close_writer`](Self::close_writer), otherwise
    /// the parent's own write end keeps the pipe open forever.
    pub fn wait(self) -> Result<(), CreationError> {
        debug_assert!(self.writer.is_none());

        let mut record = Vec::with_capacity(RECORD_LEN);
        File::from(self.reader)
            .read_to_end(&mut record)
            .map_err(|e| read_error(&e))?;

        decode(&record)
    }
}

/// `pipe2(O_CLOEXEC)`: no window in which a concurrent fork can inherit
/// the ends without the flag.
#[cfg(target_os = "linux")]
fn cloexec_pipe() -> Result<[OwnedFd; 2], CreationError> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: fds is a valid two-element array for pipe2 to fill.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
        return Err(CreationError::last_os_error(SpawnStep::Pipe));
    }
    // SAFETY: pipe2 succeeded, both descriptors are fresh and unowned.
    Ok(fds.map(|fd| unsafe { OwnedFd::from_raw_fd(fd) }))
}

#[cfg(not(target_os = "linux"))]
fn cloexec_pipe() -> Result<[OwnedFd; 2], CreationError> {
    let mut fds: [RawFd; 2] = [-1; 2];
    // SAFETY: fds is a valid two-element array for pipe to fill.
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(CreationError::last_os_error(SpawnStep::Pipe));
    }
    // SAFETY: pipe succeeded, both descriptors are fresh and unowned.
    let owned = fds.map(|fd| unsafe { OwnedFd::from_raw_fd(fd) });
    for fd in fds {
        set_cloexec(fd).map_err(|e| {
            CreationError::new(SpawnStep::Pipe, e.raw_os_error().unwrap_or(libc::EIO))
        })?;
    }
    Ok(owned)
}

/// Interpret everything the child wrote before closing the pipe.
fn decode(record: &[u8]) -> Result<(), CreationError> {
    if record.is_empty() {
        return Ok(());
    }
    if record.len() < RECORD_LEN {
        return Err(CreationError::new(SpawnStep::StatusRead, libc::EIO));
    }

    let (code, errno) = record[..RECORD_LEN].split_at(size_of::<i32>());
    let code = i32::from_ne_bytes(code.try_into().unwrap_or_default());
    let errno = i32::from_ne_bytes(errno.try_into().unwrap_or_default());

    let step = SpawnStep::from_code(code).unwrap_or(SpawnStep::StatusRead);
    Err(CreationError::new(step, errno))
}

fn read_error(err: &io::Error) -> CreationError {
    CreationError::new(SpawnStep::StatusRead, err.raw_os_error().unwrap_or(libc::EIO))
}

/// Child side: write the failed step and current errno, then exit without
/// running destructors or atexit handlers.
///
/// # Safety
///
/// Only call in a forked child between `fork` and `exec`.
pub(crate) unsafe fn report_and_exit(writer: RawFd, step: SpawnStep) -> ! {
    let errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let code = step.code().unwrap_or(0);

    let mut record = [0u8; RECORD_LEN];
    record[..4].copy_from_slice(&code.to_ne_bytes());
    record[4..].copy_from_slice(&errno.to_ne_bytes());

    // SAFETY: write and _exit are async-signal-safe; record lives on the stack.
    unsafe {
        let _ = libc::write(writer, record.as_ptr().cast(), RECORD_LEN);
        libc::_exit(CHILD_FAILURE_EXIT);
    }
}
