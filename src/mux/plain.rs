//! Unencrypted connections
//!
//! A plaintext client is either served like any other connection or, when
//! plaintext is denied, answered with a fixed response and closed.

use super::carryover::Carryover;
use super::connection::{Connection, FileSpan, Received};
use super::socket::Socket;
use super::{Error, Result, DEFAULT_PEEK_SIZE, DENY_RESPONSE_HEAD};
use bytes::Bytes;
use std::fs::File;
use std::io;

/// Plaintext connection over a sniffed socket
#[derive(Debug)]
pub struct PlainConnection<S> {
    io: Carryover<S>,
    closed: bool,
}

impl<S: Socket> PlainConnection<S> {
    pub fn new(io: Carryover<S>) -> Self {
        PlainConnection { io, closed: false }
    }

    /// Receive at most `n` bytes
    ///
    /// Bytes left over from sniffing are returned first without reading the
    /// socket. An empty result means the peer closed the stream.
    pub fn receive_up_to(&mut self, n: usize) -> Result<Bytes> {
        Ok(self.io.fetch_some(n)?)
    }

    /// Receive exactly `n` bytes, or fewer if the stream ends first
    pub fn receive_exact(&mut self, n: usize) -> Result<Bytes> {
        Ok(self.io.fetch(n)?)
    }

    /// Get reference to the underlying socket
    pub fn get_ref(&self) -> &S {
        self.io.get_ref()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "connection closed",
            )));
        }
        Ok(())
    }
}

impl<S: Socket> Connection for PlainConnection<S> {
    fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.io.get_mut().write_all(buf)?;
        Ok(())
    }

    fn send_file(&mut self, mut span: FileSpan<'_>) -> Result<()> {
        self.ensure_open()?;

        for chunk in &span.header {
            self.io.get_mut().write_all(chunk)?;
        }

        let mut file = File::open(&span.path)?;
        let sent = self
            .io
            .get_mut()
            .send_file(&mut file, span.offset, span.length)?;
        tracing::trace!(sent, path = %span.path.display(), "file sent");

        span.progress();
        Ok(())
    }

    fn receive(&mut self) -> Result<Received> {
        let chunk = self.receive_up_to(DEFAULT_PEEK_SIZE)?;
        Ok(Received::from_chunk(chunk))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.io.get_mut().close()?;
        Ok(())
    }

    fn is_secure(&self) -> bool {
        false
    }
}

/// Answer a plaintext client with a fixed text response and close the socket
///
/// Bytes the client already sent are discarded unread.
pub fn deny<S: Socket>(io: Carryover<S>, body: &[u8]) -> Result<()> {
    let (mut socket, _unread) = io.into_parts();
    write_denial(&mut socket, body)
}

pub(crate) fn write_denial<S: Socket + ?Sized>(socket: &mut S, body: &[u8]) -> Result<()> {
    let written = socket
        .write_all(DENY_RESPONSE_HEAD)
        .and_then(|_| socket.write_all(body))
        .and_then(|_| socket.flush());
    let closed = socket.close();

    written?;
    closed?;
    Ok(())
}
