//! Error types for shellpool.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for shellpool operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Child process creation errors
    #[error("Creation error: {0}")]
    Creation(#[from] CreationError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Pool-level errors
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Setup step at which spawning a session failed.
///
/// Steps executed inside the forked child carry a stable wire code, which is
/// what travels over the status pipe back to the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnStep {
    /// Program path, argument or environment entry was not a valid C string.
    Arguments,
    /// Allocating the pseudo-terminal master/slave pair.
    PtyOpen,
    /// Creating the status pipe.
    Pipe,
    /// `fork()` itself.
    Fork,
    /// Reading the child's status record.
    StatusRead,
    /// `setsid()` in the child.
    SessionDetach,
    /// Re-opening the slave device in the child.
    SlaveReopen,
    /// Closing the inherited master descriptor in the child.
    CloseMaster,
    /// Closing the inherited slave descriptor in the child.
    CloseSlave,
    /// `dup2()` of the slave onto the standard streams.
    DescriptorDuplication,
    /// `execve()`.
    Exec,
    /// Restoring default signal dispositions.
    SignalReset,
    /// Initializing terminal attributes on the slave.
    TerminalSetup,
    /// Marking the status pipe close-on-exec.
    CloseOnExec,
}

impl SpawnStep {
    /// Wire code written by the child, `None` for parent-side steps.
    pub fn code(self) -> Option<i32> {
        match self {
            SpawnStep::SessionDetach => Some(1),
            SpawnStep::SlaveReopen => Some(2),
            SpawnStep::CloseMaster => Some(3),
            SpawnStep::CloseSlave => Some(4),
            SpawnStep::DescriptorDuplication => Some(5),
            SpawnStep::Exec => Some(6),
            SpawnStep::SignalReset => Some(7),
            SpawnStep::TerminalSetup => Some(8),
            SpawnStep::CloseOnExec => Some(9),
            SpawnStep::Arguments
            | SpawnStep::PtyOpen
            | SpawnStep::Pipe
            | SpawnStep::Fork
            | SpawnStep::StatusRead => None,
        }
    }

    /// Decode a wire code received from the child.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(SpawnStep::SessionDetach),
            2 => Some(SpawnStep::SlaveReopen),
            3 => Some(SpawnStep::CloseMaster),
            4 => Some(SpawnStep::CloseSlave),
            5 => Some(SpawnStep::DescriptorDuplication),
            6 => Some(SpawnStep::Exec),
            7 => Some(SpawnStep::SignalReset),
            8 => Some(SpawnStep::TerminalSetup),
            9 => Some(SpawnStep::CloseOnExec),
            _ => None,
        }
    }

    /// Whether the step runs in the forked child.
    pub fn in_child(self) -> bool {
        self.code().is_some()
    }
}

impl fmt::Display for SpawnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpawnStep::Arguments => "argument conversion",
            SpawnStep::PtyOpen => "pseudo-terminal open",
            SpawnStep::Pipe => "status pipe creation",
            SpawnStep::Fork => "fork",
            SpawnStep::StatusRead => "status pipe read",
            SpawnStep::SessionDetach => "session detach",
            SpawnStep::SlaveReopen => "slave reopen",
            SpawnStep::CloseMaster => "master close",
            SpawnStep::CloseSlave => "slave close",
            SpawnStep::DescriptorDuplication => "descriptor duplication",
            SpawnStep::Exec => "exec",
            SpawnStep::SignalReset => "signal reset",
            SpawnStep::TerminalSetup => "terminal setup",
            SpawnStep::CloseOnExec => "close-on-exec",
        };
        f.write_str(name)
    }
}

/// Failure to bring up a session's child process.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{step} failed: {}", io::Error::from_raw_os_error(*os_errno))]
pub struct CreationError {
    /// The step that failed.
    pub step: SpawnStep,

    /// Raw OS error number reported for the step.
    pub os_errno: i32,
}

impl CreationError {
    /// Create an error for a step with an explicit errno.
    pub fn new(step: SpawnStep, os_errno: i32) -> Self {
        Self { step, os_errno }
    }

    /// Create an error for a step from the calling thread's current errno.
    pub fn last_os_error(step: SpawnStep) -> Self {
        let os_errno = io::Error::last_os_error().raw_os_error().unwrap_or(0);
        Self { step, os_errno }
    }

    /// The OS error as an `io::Error`.
    pub fn os_error(&self) -> io::Error {
        io::Error::from_raw_os_error(self.os_errno)
    }
}

/// Channel layer errors (reading and writing the PTY master).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Reading or writing the master descriptor failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The child side stopped producing data
    #[error("Channel closed")]
    Closed,
}

/// Pool layer errors.
#[derive(Error, Debug)]
pub enum PoolError {
    /// The pool has been torn down
    #[error("Pool torn down")]
    TornDown,

    /// Every session was forfeited, nothing can ever be acquired
    #[error("Pool exhausted: all {size} sessions were forfeited")]
    Exhausted { size: usize },

    /// Waiting for a session or a request timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Invalid pool configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// A blocking request task panicked or was cancelled
    #[error("Request task failed: {message}")]
    TaskFailed { message: String },
}

/// Result type alias using shellpool's Error.
pub type Result<T> = std::result::Result<T, Error>;
