//! PTY master channel: writes command lines and reads until a marker.

use std::fs::File;
use std::io::Write;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use super::buffer::{MatchBuffer, MatchedOffset, TraceFlags};
use super::patterns::{LiteralPrompt, PromptMatcher};
use crate::error::ChannelError;

/// The parent's end of a pseudo-terminal plus its match buffer.
///
/// A channel has a single reader and writer: whoever holds it mutably.
#[derive(Debug)]
pub struct PtyChannel {
    /// Master side of the pseudo-terminal.
    master: File,

    /// Output accumulated from the master.
    buffer: MatchBuffer,
}

impl PtyChannel {
    /// Wrap an owned master descriptor.
    pub fn new(master: OwnedFd, trace: TraceFlags) -> Self {
        Self {
            master: File::from(master),
            buffer: MatchBuffer::new(trace),
        }
    }

    /// Write `line` followed by a single newline.
    pub fn send_line(&mut self, line: &[u8]) -> Result<(), ChannelError> {
        self.send_raw(line)?;
        self.send_raw(b"\n")
    }

    /// Write bytes as-is.
    pub fn send_raw(&mut self, data: &[u8]) -> Result<(), ChannelError> {
        self.master.write_all(data)?;
        Ok(())
    }

    /// Block until the literal `pattern` appears.
    pub fn expect(&mut self, pattern: &[u8]) -> Result<MatchedOffset, ChannelError> {
        let matcher = LiteralPrompt::new(pattern);
        self.expect_matcher(&matcher)
    }

    /// Block until `matcher` matches.
    pub fn expect_matcher(
        &mut self,
        matcher: &dyn PromptMatcher,
    ) -> Result<MatchedOffset, ChannelError> {
        self.buffer.append_and_search(&mut self.master, matcher)
    }

    /// Block until the literal `pattern` appears and return the bytes before it.
    pub fn expect_output(&mut self, pattern: &[u8]) -> Result<Vec<u8>, ChannelError> {
        let found = self.expect(pattern)?;
        Ok(self.buffer.slice(found.output).to_vec())
    }

    /// Get a reference to the buffer.
    pub fn buffer(&self) -> &MatchBuffer {
        &self.buffer
    }

    /// Raw master descriptor.
    pub fn raw_fd(&self) -> RawFd {
        self.master.as_raw_fd()
    }
}

impl AsFd for PtyChannel {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;

    use super::*;

    fn channel_pair() -> (PtyChannel, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        let fd = OwnedFd::from(ours);
        (PtyChannel::new(fd, TraceFlags::default()), theirs)
    }

    #[test]
    fn test_send_line_appends_newline() {
        let (mut channel, mut peer) = channel_pair();
        channel.send_line(b"echo hi").unwrap();

        let mut received = [0u8; 8];
        peer.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"echo hi\n");
    }

    #[test]
    fn test_expect_output() {
        let (mut channel, mut peer) = channel_pair();
        peer.write_all(b"hi\r\nPROMPT> ").unwrap();

        let output = channel.expect_output(b"PROMPT> ").unwrap();
        assert_eq!(output, b"hi\r\n");
        assert!(channel.buffer().is_empty());
    }

    #[test]
    fn test_expect_on_closed_peer() {
        let (mut channel, peer) = channel_pair();
        drop(peer);

        let err = channel.expect(b"PROMPT> ").unwrap_err();
        assert!(matches!(err, ChannelError::Closed));
    }
}
