//! Protocol detection on freshly accepted connections
//!
//! A TLS client always opens with a handshake record, whose content type byte
//! is `0x16`. Plain HTTP starts with an ASCII method name, so the first byte is
//! enough to tell the two apart.

use super::carryover::{recv_into, Carryover};
use super::DEFAULT_PEEK_SIZE;
use bytes::BytesMut;
use std::io::Read;

/// Content type of a TLS handshake record
pub const HANDSHAKE_MARKER: u8 = 0x16;

/// Transport chosen for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// TLS handshake detected
    Secure,
    /// Anything else, including a connection that closed before sending
    Plain,
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Secure => "tls",
            Transport::Plain => "plain",
        }
    }
}

/// Classify a connection from the bytes it sent first
#[inline]
pub fn classify(prefix: &[u8]) -> Transport {
    match prefix.first() {
        Some(&HANDSHAKE_MARKER) => Transport::Secure,
        _ => Transport::Plain,
    }
}

/// Peek at a new connection and decide its transport
///
/// Issues a single read of up to `DEFAULT_PEEK_SIZE` bytes. A short read or
/// an immediate end of stream are both normal outcomes. A read error is
/// treated like an empty read; the chosen path will hit the same error on its
/// own first read.
pub fn sniff<S: Read>(mut socket: S) -> (Transport, Carryover<S>) {
    let mut peeked = BytesMut::with_capacity(DEFAULT_PEEK_SIZE);

    if let Err(e) = recv_into(&mut socket, &mut peeked, DEFAULT_PEEK_SIZE) {
        tracing::debug!("sniff read failed, treating as empty: {}", e);
    }

    let transport = classify(&peeked);
    tracing::trace!(
        peeked = peeked.len(),
        transport = transport.as_str(),
        "classified connection"
    );

    (transport, Carryover::new(socket, peeked))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::socket::mock::ScriptedSocket;

    #[test]
    fn test_classify_marker_byte() {
        assert_eq!(classify(&[0x16]), Transport::Secure);
        assert_eq!(classify(&[0x16, 0x03, 0x01, 0x02, 0x00]), Transport::Secure);

        for first in (0u8..=255).filter(|b| *b != HANDSHAKE_MARKER) {
            assert_eq!(classify(&[first, 0x16]), Transport::Plain, "first byte {first:#04x}");
        }
    }

    #[test]
    fn test_classify_empty_is_plain() {
        assert_eq!(classify(&[]), Transport::Plain);
    }

    #[test]
    fn test_sniff_keeps_peeked_bytes() {
        let socket = ScriptedSocket::new(vec![b"GET / HTTP/1.1\r\n\r\n".to_vec(), b"tail".to_vec()]);
        let (transport, io) = sniff(socket);

        assert_eq!(transport, Transport::Plain);
        assert_eq!(io.buffered(), b"GET / HTTP/1.1\r\n\r\n");
        assert_eq!(io.get_ref().reads(), 1);
    }

    #[test]
    fn test_sniff_reads_at_most_peek_size() {
        let mut hello = vec![HANDSHAKE_MARKER; 1];
        hello.resize(DEFAULT_PEEK_SIZE + 100, 0xaa);
        let (transport, io) = sniff(ScriptedSocket::new(vec![hello]));

        assert_eq!(transport, Transport::Secure);
        assert_eq!(io.buffered().len(), DEFAULT_PEEK_SIZE);
    }

    #[test]
    fn test_sniff_immediate_close_is_plain() {
        let (transport, io) = sniff(ScriptedSocket::new(Vec::new()));

        assert_eq!(transport, Transport::Plain);
        assert!(io.buffered().is_empty());
    }

    #[test]
    fn test_sniff_read_error_is_plain() {
        let socket = ScriptedSocket::failing(std::io::ErrorKind::ConnectionReset);
        let (transport, io) = sniff(socket);

        assert_eq!(transport, Transport::Plain);
        assert!(io.buffered().is_empty());
    }
}
