//! Channel layer for pattern matching over a PTY master.
//!
//! This module handles the blocking "read until marker" protocol:
//! the growable match buffer, prompt matchers and the master-side channel.

mod buffer;
mod patterns;
mod pty;

pub use buffer::{
    GROWTH_INCREMENT, INITIAL_CAPACITY, MatchBuffer, MatchedOffset, TraceFlags, WATERMARK,
};
pub use patterns::{LiteralPrompt, PromptMatcher};
pub use pty::PtyChannel;
