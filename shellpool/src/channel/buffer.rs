//! Growable match buffer for blocking "read until pattern" loops.
//!
//! The buffer is a single byte region with two cursors: `consumed` marks the
//! first byte not yet handed back by a match, `filled` marks the end of the
//! data read so far. When the free tail runs low the buffer first tries to
//! shift the pending bytes down over the consumed prefix, and only grows when
//! that would free too little.

use std::io::{self, Read};
use std::ops::Range;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use super::patterns::PromptMatcher;
use crate::error::ChannelError;

/// Initial storage size, also the growth increment.
pub const INITIAL_CAPACITY: usize = 2048;

/// Bytes added to the storage on each growth step.
pub const GROWTH_INCREMENT: usize = INITIAL_CAPACITY;

/// Minimum slack before a read; also the minimum prefix worth compacting.
pub const WATERMARK: usize = 128;

/// Consecutive empty reads tolerated before the source is considered closed.
const MAX_EMPTY_READS: usize = 16;

/// Verbose tracing switches for buffer and descriptor activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceFlags {
    /// Log cursor positions around every read.
    pub pointers: bool,

    /// Log the scanned text whenever a pattern matches.
    pub buffers: bool,
}

/// Location of a match inside the buffer.
///
/// Offsets are only meaningful until the next call that may read into the
/// buffer, since compaction relocates pending bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedOffset {
    /// Bytes between the previous consumed offset and the match.
    pub output: Range<usize>,

    /// The matched pattern itself.
    pub pattern: Range<usize>,
}

impl MatchedOffset {
    /// Offset where consumption resumes (just past the pattern).
    pub fn resume(&self) -> usize {
        self.pattern.end
    }
}

/// Buffer accumulating child output until a pattern shows up.
#[derive(Debug)]
pub struct MatchBuffer {
    /// Backing bytes; `storage.len()` is the capacity.
    storage: Vec<u8>,

    /// First byte not yet consumed by a match.
    consumed: usize,

    /// One past the last byte written by a read.
    filled: usize,

    trace: TraceFlags,
}

impl MatchBuffer {
    /// Create an empty buffer with the default capacity.
    pub fn new(trace: TraceFlags) -> Self {
        Self {
            storage: vec![0; INITIAL_CAPACITY],
            consumed: 0,
            filled: 0,
            trace,
        }
    }

    /// Read from `source` until `matcher` matches at or after the consumed
    /// offset.
    ///
    /// Data already in the buffer is searched first, so a match there costs
    /// no I/O. On success the consumed offset moves past the match.
    pub fn append_and_search<R>(
        &mut self,
        source: &mut R,
        matcher: &dyn PromptMatcher,
    ) -> Result<MatchedOffset, ChannelError>
    where
        R: Read + ?Sized,
    {
        let mut scan = self.consumed;
        let mut empty_reads = 0;

        loop {
            if let Some(found) = matcher.find_match(&self.storage[scan..self.filled]) {
                return Ok(self.consume(scan + found.start..scan + found.end));
            }

            // A match may straddle the end of what was just scanned, so keep
            // the last `max_len - 1` bytes in the next pass.
            if let Some(len) = matcher.max_len() {
                let keep = len.saturating_sub(1);
                scan = scan.max(self.filled.saturating_sub(keep));
            }

            let available = self.make_room(&mut scan);
            let end = self.filled + available;

            let rbytes = match source.read(&mut self.storage[self.filled..end]) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(ChannelError::Io(e)),
            };

            if self.trace.pointers {
                trace!(
                    "READ {:5} {:5} {:5} -> {:5}",
                    self.consumed, self.filled, available, rbytes
                );
            }

            if rbytes == 0 {
                empty_reads += 1;
                if empty_reads >= MAX_EMPTY_READS {
                    return Err(ChannelError::Closed);
                }
                continue;
            }
            empty_reads = 0;

            self.filled += rbytes;
            self.storage[self.filled] = 0;
        }
    }

    /// Search the pending bytes without reading.
    pub fn find_pending(&self, matcher: &dyn PromptMatcher) -> Option<Range<usize>> {
        matcher
            .find_match(self.pending())
            .map(|r| self.consumed + r.start..self.consumed + r.end)
    }

    fn consume(&mut self, pattern: Range<usize>) -> MatchedOffset {
        if self.trace.buffers {
            debug!(
                "{}",
                String::from_utf8_lossy(&self.storage[self.consumed..pattern.end])
            );
        }

        let output = self.consumed..pattern.start;
        self.consumed = pattern.end;
        MatchedOffset { output, pattern }
    }

    /// Ensure there is at least `WATERMARK` bytes of slack, compacting first
    /// and growing only if that is not enough. Returns the slack.
    fn make_room(&mut self, scan: &mut usize) -> usize {
        let mut available = self.available();

        if available < WATERMARK {
            if self.consumed > WATERMARK {
                self.compact(scan);
                available = self.available();
            }

            if available < WATERMARK {
                self.grow();
                available = self.available();
            }
        }

        available
    }

    /// Drop `[0, consumed)` by shifting pending bytes to the front.
    fn compact(&mut self, scan: &mut usize) {
        let shift = self.consumed;
        self.storage.copy_within(self.consumed..self.filled, 0);
        self.filled -= shift;
        self.consumed = 0;
        *scan -= shift;
        self.storage[self.filled] = 0;
    }

    fn grow(&mut self) {
        let capacity = self.storage.len() + GROWTH_INCREMENT;
        self.storage.resize(capacity, 0);
    }

    /// Free bytes after `filled`, one reserved for the terminator.
    pub fn available(&self) -> usize {
        self.storage.len() - self.filled - 1
    }

    /// Current storage size.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Offset of the first unconsumed byte.
    pub fn consumed_offset(&self) -> usize {
        self.consumed
    }

    /// Offset one past the last byte read.
    pub fn filled_offset(&self) -> usize {
        self.filled
    }

    /// Bytes read but not yet consumed by a match.
    pub fn pending(&self) -> &[u8] {
        &self.storage[self.consumed..self.filled]
    }

    /// Borrow a range of the filled region, e.g. from a `MatchedOffset`.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.storage[range.start.min(self.filled)..range.end.min(self.filled)]
    }

    /// Whether there are no pending bytes.
    pub fn is_empty(&self) -> bool {
        self.consumed == self.filled
    }

    /// Tracing switches this buffer was built with.
    pub fn trace_flags(&self) -> TraceFlags {
        self.trace
    }
}

impl Default for MatchBuffer {
    fn default() -> Self {
        Self::new(TraceFlags::default())
    }
}
