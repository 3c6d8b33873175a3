//! # Shellpool
//!
//! A pool of pre-forked interactive shells, each attached to its own
//! pseudo-terminal, for running many short commands from many threads
//! without paying for a `fork`/`exec` per command.
//!
//! ## Features
//!
//! - Pseudo-terminal sessions spawned with `fork`/`exec`, with setup failures
//!   reported back from the child by step and errno
//! - Expect-style matching on a growable buffer (literal or regex prompts)
//! - Blocking FIFO session pool with timeouts and failed-session replacement
//! - Async requests on tokio's blocking pool
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use shellpool::ShellPoolBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), shellpool::Error> {
//!     let pool = Arc::new(ShellPoolBuilder::new(4).build()?);
//!
//!     let response = pool.run_request_async("uname -a").await?;
//!     println!("{}", response.result);
//!
//!     pool.shutdown(Duration::from_secs(1));
//!     Ok(())
//! }
//! ```
//!
//! ## Sessions
//!
//! The lower layers are usable on their own:
//!
//! ```rust,no_run
//! use shellpool::{Session, SpawnConfig};
//!
//! # fn example() -> Result<(), shellpool::Error> {
//! let config = SpawnConfig::new("/bin/sh").with_env("PS1", "$ ");
//! let mut session = Session::create(&config)?;
//! session.expect("$ ")?;
//! session.send_line("ls")?;
//! let _listing = session.expect_output("$ ")?;
//! session.destroy();
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod process;
pub mod session;

// Re-export main types for convenience
pub use channel::{LiteralPrompt, MatchBuffer, MatchedOffset, PromptMatcher, TraceFlags};
pub use error::{ChannelError, CreationError, Error, PoolError, SpawnStep};
pub use process::SpawnConfig;
pub use session::{
    Response, Session, SessionPool, ShellPool, ShellPoolBuilder, ShellPoolConfig, DEFAULT_PROMPT,
    DEFAULT_SHELL,
};
