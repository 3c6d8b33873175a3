//! Configuration and builder for shell pools.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::shell::ShellPool;
use crate::channel::TraceFlags;
use crate::error::{PoolError, Result};
use crate::process::SpawnConfig;

/// Default shell to pre-fork.
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default prompt marker. Unique enough that command output never contains it.
pub const DEFAULT_PROMPT: &str = "[shell-a277c062-9bff-11e4-9b0b-c4850831c67b] ";

/// Largest number of shells a single pool may hold.
pub const MAX_SHELLS: usize = 1000;

fn default_shell() -> PathBuf {
    PathBuf::from(DEFAULT_SHELL)
}

fn default_prompt() -> String {
    DEFAULT_PROMPT.to_string()
}

fn default_failure_patterns() -> Vec<String> {
    [
        "command not found",
        "No such file or directory",
        "Permission denied",
        "Operation not permitted",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Shell pool configuration.
///
/// Deserializable so it can come straight out of a workload description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellPoolConfig {
    /// Number of pre-forked shells. Match it to the number of worker threads.
    pub num_shells: usize,

    /// Path to the shell binary.
    #[serde(default = "default_shell")]
    pub shell: PathBuf,

    /// Arguments passed after `argv[0]`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Marker the shell prints as `PS1`/`PS2`.
    #[serde(default = "default_prompt")]
    pub prompt: String,

    /// Extra environment for the shells.
    #[serde(default)]
    pub env: Vec<(String, String)>,

    /// Output substrings that mark a request as failed.
    #[serde(default = "default_failure_patterns")]
    pub failed_when_contains: Vec<String>,

    /// Bound on async requests, including the wait for a free shell.
    #[serde(default)]
    pub request_timeout: Option<Duration>,

    /// Buffer tracing switches.
    #[serde(default)]
    pub trace: TraceFlags,
}

impl ShellPoolConfig {
    /// Create a configuration for `num_shells` default shells.
    pub fn new(num_shells: usize) -> Self {
        Self {
            num_shells,
            shell: default_shell(),
            args: Vec::new(),
            prompt: default_prompt(),
            env: Vec::new(),
            failed_when_contains: default_failure_patterns(),
            request_timeout: None,
            trace: TraceFlags::default(),
        }
    }

    /// Check ranges and marker sanity.
    pub fn validate(&self) -> std::result::Result<(), PoolError> {
        if !(1..=MAX_SHELLS).contains(&self.num_shells) {
            return Err(invalid(format!(
                "num_shells must be between 1 and {MAX_SHELLS}, got {}",
                self.num_shells
            )));
        }
        if self.shell.as_os_str().is_empty() {
            return Err(invalid("shell path is empty".to_string()));
        }
        if self.prompt.is_empty() {
            return Err(invalid("prompt is empty".to_string()));
        }
        if self.prompt.contains(['\n', '\r']) {
            return Err(invalid("prompt must fit on one line".to_string()));
        }
        Ok(())
    }

    /// Spawn parameters for one shell: the configured environment with
    /// `PS1` and `PS2` forced to the prompt marker.
    pub fn spawn_config(&self) -> SpawnConfig {
        self.env
            .iter()
            .fold(SpawnConfig::new(&self.shell), |config, (k, v)| {
                config.with_env(k.as_str(), v.as_str())
            })
            .with_args(self.args.iter().cloned())
            .with_env("PS1", self.prompt.as_str())
            .with_env("PS2", self.prompt.as_str())
            .with_trace(self.trace)
    }
}

fn invalid(message: String) -> PoolError {
    PoolError::InvalidConfig { message }
}

/// Builder for constructing shell pools.
///
/// # Example
///
/// ```rust,no_run
/// use shellpool::ShellPoolBuilder;
///
/// # fn example() -> Result<(), shellpool::Error> {
/// let pool = ShellPoolBuilder::new(4)
///     .shell("/bin/bash")
///     .prompt("PROMPT> ")
///     .build()?;
///
/// let response = pool.run_request("uname -a")?;
/// println!("{}", response.result);
///
/// pool.shutdown(std::time::Duration::from_secs(1));
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ShellPoolBuilder {
    config: ShellPoolConfig,
}

impl ShellPoolBuilder {
    /// Create a new builder for a pool of `num_shells` shells.
    pub fn new(num_shells: usize) -> Self {
        Self {
            config: ShellPoolConfig::new(num_shells),
        }
    }

    /// Start from an existing configuration.
    pub fn from_config(config: ShellPoolConfig) -> Self {
        Self { config }
    }

    /// Set the shell binary (default: `/bin/sh`).
    pub fn shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.config.shell = shell.into();
        self
    }

    /// Add a shell argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.config.args.push(arg.into());
        self
    }

    /// Set the prompt marker.
    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = prompt.into();
        self
    }

    /// Add an environment variable for the shells.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.env.push((key.into(), value.into()));
        self
    }

    /// Add a failure pattern.
    pub fn failure_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.failed_when_contains.push(pattern.into());
        self
    }

    /// Set the async request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = Some(timeout);
        self
    }

    /// Set buffer tracing.
    pub fn trace(mut self, trace: TraceFlags) -> Self {
        self.config.trace = trace;
        self
    }

    /// Get the configuration built so far.
    pub fn config(&self) -> &ShellPoolConfig {
        &self.config
    }

    /// Spawn the shells and build the pool.
    pub fn build(self) -> Result<ShellPool> {
        ShellPool::configure(self.config)
    }
}
