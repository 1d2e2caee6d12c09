//! Carryover buffer for sniffed bytes
//!
//! The sniffer has to read from the socket to decide which transport to use.
//! Those bytes belong to whichever path is chosen, so they are parked here and
//! handed out before any further socket read happens.

use super::DEFAULT_PEEK_SIZE;
use bytes::{Buf, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Largest single socket read into the carryover buffer
const READ_LIMIT: usize = DEFAULT_PEEK_SIZE;

/// A socket together with the bytes already read from it but not consumed
///
/// Owned by exactly one connection; never shared.
#[derive(Debug)]
pub struct Carryover<S> {
    inner: S,
    pending: BytesMut,
}

impl<S> Carryover<S> {
    /// Wrap `inner`, delivering `prefix` before anything read from it
    pub fn new(inner: S, prefix: impl Into<BytesMut>) -> Self {
        Carryover {
            inner,
            pending: prefix.into(),
        }
    }

    /// Bytes waiting to be consumed
    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    /// Get a reference to the underlying socket
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Get a mutable reference to the underlying socket
    ///
    /// Reading through this reference bypasses the buffered bytes.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    /// Split into the socket and the unconsumed bytes
    pub fn into_parts(self) -> (S, Bytes) {
        (self.inner, self.pending.freeze())
    }
}

impl<S: Read> Carryover<S> {
    /// Fetch exactly `n` bytes, buffered bytes first
    ///
    /// Reads the socket until `n` bytes are available, at most `READ_LIMIT`
    /// bytes per read. A read returning zero bytes ends the stream; whatever
    /// was gathered is returned, possibly shorter than `n`.
    pub fn fetch(&mut self, n: usize) -> io::Result<Bytes> {
        while self.pending.len() < n {
            let wanted = (n - self.pending.len()).min(READ_LIMIT);
            if recv_into(&mut self.inner, &mut self.pending, wanted)? == 0 {
                break;
            }
        }

        let take = n.min(self.pending.len());
        Ok(self.pending.split_to(take).freeze())
    }

    /// Fetch at most `n` bytes
    ///
    /// Buffered bytes are returned without touching the socket. Otherwise one
    /// socket read of at most `READ_LIMIT` bytes is issued; an empty result
    /// means end of stream.
    pub fn fetch_some(&mut self, n: usize) -> io::Result<Bytes> {
        if !self.pending.is_empty() || n == 0 {
            let take = n.min(self.pending.len());
            return Ok(self.pending.split_to(take).freeze());
        }

        let mut chunk = BytesMut::new();
        recv_into(&mut self.inner, &mut chunk, n.min(READ_LIMIT))?;
        Ok(chunk.freeze())
    }
}

impl<S: Read> Read for Carryover<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pending.is_empty() {
            loop {
                match self.inner.read(buf) {
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    other => return other,
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.advance(n);
        Ok(n)
    }
}

impl<S: Write> Write for Carryover<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Append one read of at most `max` bytes to `dst`, retrying on EINTR
pub(crate) fn recv_into<R: Read + ?Sized>(
    src: &mut R,
    dst: &mut BytesMut,
    max: usize,
) -> io::Result<usize> {
    let start = dst.len();
    dst.resize(start + max, 0);

    loop {
        match src.read(&mut dst[start..]) {
            Ok(n) => {
                dst.truncate(start + n);
                return Ok(n);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                dst.truncate(start);
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::socket::mock::ScriptedSocket;

    #[test]
    fn test_fetch_prefers_buffered_bytes() {
        let socket = ScriptedSocket::new(vec![b"world".to_vec()]);
        let mut io = Carryover::new(socket, &b"hello "[..]);

        let got = io.fetch(3).unwrap();
        assert_eq!(&got[..], b"hel");
        assert_eq!(io.get_ref().reads(), 0);
        assert_eq!(io.buffered(), b"lo ");
    }

    #[test]
    fn test_fetch_appends_socket_reads() {
        let socket = ScriptedSocket::new(vec![b"wo".to_vec(), b"rld!".to_vec()]);
        let mut io = Carryover::new(socket, &b"hello "[..]);

        let got = io.fetch(11).unwrap();
        assert_eq!(&got[..], b"hello world");
        assert_eq!(io.get_ref().reads(), 2);
        // Reads are bounded by what is still missing
        assert!(io.buffered().is_empty());
        assert_eq!(&io.fetch_some(8).unwrap()[..], b"!");
    }

    #[test]
    fn test_fetch_short_at_end_of_stream() {
        let socket = ScriptedSocket::new(vec![b"abc".to_vec()]);
        let mut io = Carryover::new(socket, BytesMut::new());

        let got = io.fetch(10).unwrap();
        assert_eq!(&got[..], b"abc");
        assert!(io.buffered().is_empty());

        // Stream is finished, further fetches come back empty
        assert!(io.fetch(4).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_never_duplicates_or_drops() {
        let delivered: Vec<Vec<u8>> = (0u8..20)
            .map(|i| (0..(i as usize % 7) + 1).map(|j| i.wrapping_mul(31) ^ j as u8).collect())
            .collect();
        let expected: Vec<u8> = b"peeked-".iter().copied().chain(delivered.concat()).collect();

        let socket = ScriptedSocket::new(delivered);
        let mut io = Carryover::new(socket, &b"peeked-"[..]);

        let mut seen = Vec::new();
        for size in [1, 5, 0, 13, 2, 64, 3, 1000] {
            seen.extend_from_slice(&io.fetch(size).unwrap());
        }
        assert_eq!(seen, expected);
    }

    #[test]
    fn test_fetch_some_does_not_read_while_buffered() {
        let socket = ScriptedSocket::new(vec![b"later".to_vec()]);
        let mut io = Carryover::new(socket, &b"GET / HTTP/1.1\r\n"[..]);

        assert_eq!(&io.fetch_some(4).unwrap()[..], b"GET ");
        assert_eq!(&io.fetch_some(100).unwrap()[..], b"/ HTTP/1.1\r\n");
        assert_eq!(io.get_ref().reads(), 0);

        assert_eq!(&io.fetch_some(100).unwrap()[..], b"later");
        assert_eq!(io.get_ref().reads(), 1);
        assert!(io.fetch_some(100).unwrap().is_empty());
    }

    #[test]
    fn test_read_drains_prefix_then_socket() {
        let socket = ScriptedSocket::new(vec![b"cd".to_vec()]);
        let mut io = Carryover::new(socket, &b"ab"[..]);

        let mut all = Vec::new();
        io.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"abcd");
    }

    #[test]
    fn test_fetch_propagates_socket_errors() {
        let socket = ScriptedSocket::failing(io::ErrorKind::ConnectionReset);
        let mut io = Carryover::new(socket, &b"x"[..]);

        let err = io.fetch(2).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        // The buffered byte is still there
        assert_eq!(io.buffered(), b"x");
    }

    #[test]
    fn test_huge_fetch_returns_short_stream() {
        let socket = ScriptedSocket::new(vec![b"abc".to_vec()]);
        let mut io = Carryover::new(socket, BytesMut::new());

        assert_eq!(&io.fetch(usize::MAX).unwrap()[..], b"abc");
        assert!(io.fetch_some(usize::MAX).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_reads_are_bounded() {
        let socket = ScriptedSocket::new(vec![vec![7u8; 3 * READ_LIMIT]]);
        let mut io = Carryover::new(socket, BytesMut::new());

        assert_eq!(io.fetch(3 * READ_LIMIT).unwrap().len(), 3 * READ_LIMIT);
        assert_eq!(io.get_ref().reads(), 3);
    }

    #[test]
    fn test_read_retries_interrupted() {
        let socket = ScriptedSocket::new(vec![b"record".to_vec()]).interrupt(2);
        let mut io = Carryover::new(socket, BytesMut::new());

        let mut buf = [0u8; 16];
        let n = io.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"record");
        assert_eq!(io.get_ref().reads(), 3);
    }
}
