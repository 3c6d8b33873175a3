//! Child process spawn configuration.

use std::ffi::{CString, OsStr};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use crate::channel::TraceFlags;
use crate::error::{CreationError, SpawnStep};

/// What to run inside a pseudo-terminal.
///
/// `argv[0]` is the program path itself; `args` follow it. The environment is
/// exactly `env` - nothing is inherited from the parent.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Path of the program to exec.
    pub program: PathBuf,

    /// Arguments after `argv[0]`.
    pub args: Vec<String>,

    /// Environment entries as key/value pairs.
    pub env: Vec<(String, String)>,

    /// Tracing switches for the session's buffer.
    pub trace: TraceFlags,
}

impl SpawnConfig {
    /// Create a configuration for `program` with no arguments and an empty
    /// environment.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            trace: TraceFlags::default(),
        }
    }

    /// Append an argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable, replacing an earlier entry for `key`.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Set the tracing switches.
    pub fn with_trace(mut self, trace: TraceFlags) -> Self {
        self.trace = trace;
        self
    }

    /// Convert to the C strings `execve` needs.
    pub(crate) fn to_exec_strings(&self) -> Result<ExecStrings, CreationError> {
        let program = c_string(self.program.as_os_str())?;

        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(program.clone());
        for arg in &self.args {
            argv.push(c_string(OsStr::new(arg))?);
        }

        let mut envp = Vec::with_capacity(self.env.len());
        for (key, value) in &self.env {
            if key.is_empty() || key.contains('=') {
                return Err(CreationError::new(SpawnStep::Arguments, libc::EINVAL));
            }
            envp.push(c_string(OsStr::new(&format!("{key}={value}")))?);
        }

        Ok(ExecStrings {
            program,
            argv,
            envp,
        })
    }
}

/// NUL-terminated program, argument and environment strings.
#[derive(Debug)]
pub(crate) struct ExecStrings {
    pub program: CString,
    pub argv: Vec<CString>,
    pub envp: Vec<CString>,
}

fn c_string(value: &OsStr) -> Result<CString, CreationError> {
    CString::new(value.as_bytes()).map_err(|_| CreationError::new(SpawnStep::Arguments, libc::EINVAL))
}
