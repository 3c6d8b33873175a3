//! Sessions: one child process bound to a pseudo-terminal.
//!
//! The session layer provides the create/expect/destroy primitives, the
//! blocking pool that hands sessions out to concurrent callers, and the
//! shell-pool front end that ties the two together.

mod builder;
mod pool;
pub(crate) mod response;
mod shell;

pub use builder::{ShellPoolBuilder, ShellPoolConfig, DEFAULT_PROMPT, DEFAULT_SHELL};
pub use pool::SessionPool;
pub use response::Response;
pub use shell::ShellPool;

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use log::debug;

use crate::channel::{MatchBuffer, MatchedOffset, PromptMatcher, PtyChannel};
use crate::error::{ChannelError, CreationError};
use crate::process::{self, SpawnConfig};

/// A running child process attached to a pseudo-terminal.
///
/// A `Session` only exists while its child is running: creation either
/// yields a running session or a [`CreationError`], and
/// [`destroy`](Self::destroy) consumes it. There is no internal locking;
/// whoever holds the session owns its descriptor and buffer.
#[derive(Debug)]
pub struct Session {
    /// Master side of the pseudo-terminal plus the match buffer.
    channel: PtyChannel,

    /// Process id of the forked child.
    pid: libc::pid_t,

    /// Slave device the child runs on.
    slave_path: PathBuf,
}

impl Session {
    /// Fork a child running `config.program` on a new pseudo-terminal.
    ///
    /// Blocks until the child has either exec'd or reported the setup step
    /// that failed.
    pub fn create(config: &SpawnConfig) -> Result<Self, CreationError> {
        let child = process::spawn(config)?;

        Ok(Self {
            channel: PtyChannel::new(child.master, config.trace),
            pid: child.pid,
            slave_path: PathBuf::from(OsStr::from_bytes(child.slave_path.to_bytes())),
        })
    }

    /// Block until the literal `pattern` shows up in the child's output.
    ///
    /// On success the consumed offset moves just past the pattern. A read
    /// error leaves the session as is; the caller decides whether to retry
    /// or destroy it.
    pub fn expect(&mut self, pattern: impl AsRef<[u8]>) -> Result<MatchedOffset, ChannelError> {
        self.channel.expect(pattern.as_ref())
    }

    /// Block until `matcher` matches the child's output.
    pub fn expect_matcher(
        &mut self,
        matcher: &dyn PromptMatcher,
    ) -> Result<MatchedOffset, ChannelError> {
        self.channel.expect_matcher(matcher)
    }

    /// Like [`expect`](Self::expect), returning the output before the pattern.
    pub fn expect_output(&mut self, pattern: impl AsRef<[u8]>) -> Result<Vec<u8>, ChannelError> {
        self.channel.expect_output(pattern.as_ref())
    }

    /// Write a command line followed by a newline.
    pub fn send_line(&mut self, line: impl AsRef<[u8]>) -> Result<(), ChannelError> {
        self.channel.send_line(line.as_ref())
    }

    /// Close the master descriptor and release the buffer.
    ///
    /// The child is not signalled or waited for; closing the master hangs up
    /// its terminal. A child that has already exited is collected so it does
    /// not linger as a zombie.
    pub fn destroy(self) {
        let Self {
            channel,
            pid,
            slave_path,
        } = self;
        drop(channel);

        let reaped = process::try_reap(pid);
        debug!(
            "destroyed session pid {} on {} (reaped: {})",
            pid,
            slave_path.display(),
            reaped
        );
    }

    /// Process id of the child.
    pub fn pid(&self) -> libc::pid_t {
        self.pid
    }

    /// Path of the slave device the child runs on.
    pub fn slave_path(&self) -> &Path {
        &self.slave_path
    }

    /// Get a reference to the match buffer.
    pub fn buffer(&self) -> &MatchBuffer {
        self.channel.buffer()
    }

    /// Whether the child process still exists.
    pub fn is_alive(&self) -> bool {
        process::is_alive(self.pid)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::error::SpawnStep;

    const MARKER: &str = "PROMPT> ";

    fn shell_config() -> SpawnConfig {
        SpawnConfig::new("/bin/sh")
            .with_env("PS1", MARKER)
            .with_env("PS2", MARKER)
            .with_env("PATH", "/usr/bin:/bin")
    }

    #[test]
    fn test_create_expect_destroy() {
        let mut session = Session::create(&shell_config()).unwrap();
        assert!(session.pid() > 0);
        assert!(session.slave_path().starts_with("/dev"));

        session.expect(MARKER).unwrap();

        session.send_line("echo hi").unwrap();
        let output = session.expect_output(MARKER).unwrap();
        let text = String::from_utf8_lossy(&output);
        assert!(text.contains("hi\r\n"), "unexpected output: {text:?}");

        let pid = session.pid();
        session.destroy();
        assert!(process::wait_for_exit(pid, Duration::from_secs(5)));
    }

    #[test]
    fn test_large_output_grows_buffer() {
        let mut session = Session::create(&shell_config()).unwrap();
        session.expect(MARKER).unwrap();

        // 3000 bytes of output before the next prompt.
        session
            .send_line("i=0; while [ $i -lt 100 ]; do echo 0123456789012345678901234567; i=$((i+1)); done")
            .unwrap();
        let output = session.expect_output(MARKER).unwrap();

        let lines = String::from_utf8_lossy(&output)
            .lines()
            .filter(|l| l.trim_end() == "0123456789012345678901234567")
            .count();
        assert_eq!(lines, 100);
        assert!(session.buffer().capacity() > crate::channel::INITIAL_CAPACITY);

        session.destroy();
    }

    #[test]
    fn test_create_missing_program() {
        let err = Session::create(&SpawnConfig::new("/no/such/shell")).unwrap_err();
        assert_eq!(err.step, SpawnStep::Exec);
        assert_ne!(err.os_errno, 0);
    }

    #[test]
    fn test_expect_after_child_exit() {
        let mut session = Session::create(&shell_config()).unwrap();
        session.expect(MARKER).unwrap();
        session.send_line("exit").unwrap();

        let err = session.expect(MARKER).unwrap_err();
        assert!(matches!(err, ChannelError::Io(_) | ChannelError::Closed));
        session.destroy();
    }
}
