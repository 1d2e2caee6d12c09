//! TLS connection
//!
//! Wraps an OpenSSL session as a `Connection`. The session does not talk to
//! the socket directly: it goes through `Backend`, which first replays the
//! bytes consumed while sniffing and only then reads the socket.

use super::config::Verbosity;
use super::credential::SecureContext;
use super::vars::SessionInfo;
use crate::mux::carryover::Carryover;
use crate::mux::connection::{Connection, FileSpan, Received};
use crate::mux::socket::Socket;
use crate::mux::teardown::Teardown;
use crate::mux::{Error, Result, BUFFER_SIZE, DEFAULT_CHUNK_SIZE};
use bytes::Bytes;
use openssl::ssl::{self, ErrorCode, HandshakeError, SslStream};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Byte transport under the TLS session
///
/// Reads come from the carryover buffer, writes block until every byte is on
/// the socket, flushing does nothing.
#[derive(Debug)]
pub struct Backend<S> {
    io: Carryover<S>,
}

impl<S: Socket> Backend<S> {
    pub fn new(io: Carryover<S>) -> Self {
        Backend { io }
    }

    /// Close the socket
    pub fn close(&mut self) -> io::Result<()> {
        self.io.get_mut().close()
    }

    pub fn get_ref(&self) -> &S {
        self.io.get_ref()
    }
}

impl<S: Socket> Read for Backend<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.io.read(buf)
    }
}

impl<S: Socket> Write for Backend<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.get_mut().write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// TLS connection
///
/// Owns the session, the socket (through the session's backend) and a pair
/// of fixed-size buffers used for receiving and for staging outgoing data.
pub struct SecureConnection<S: Socket> {
    stream: SslStream<Backend<S>>,
    read_buf: Vec<u8>,
    write_buf: Vec<u8>,
    info: SessionInfo,
    verbosity: Verbosity,
    failed: bool,
    closed: bool,
}

impl<S: Socket> SecureConnection<S> {
    /// Run the server handshake over `io` and return the established connection
    pub fn accept(io: Carryover<S>, context: &SecureContext) -> Result<Self> {
        let ssl = context.session()?;

        // Blocking socket: the handshake completes or fails here
        let stream = ssl.accept(Backend::new(io)).map_err(handshake_error)?;

        let info = SessionInfo::from_ssl(stream.ssl());
        if context.verbosity() >= Verbosity::Handshake {
            tracing::info!("TLS handshake complete: {}", info);
        }

        Ok(SecureConnection {
            stream,
            read_buf: vec![0u8; BUFFER_SIZE],
            write_buf: vec![0u8; BUFFER_SIZE],
            info,
            verbosity: context.verbosity(),
            failed: false,
            closed: false,
        })
    }

    /// Parameters negotiated during the handshake
    pub fn info(&self) -> &SessionInfo {
        &self.info
    }

    /// Check if a session operation failed
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Get reference to the underlying socket
    pub fn get_ref(&self) -> &S {
        self.stream.get_ref().get_ref()
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

    fn record(&self, direction: &str, len: usize) {
        if self.verbosity >= Verbosity::Records {
            tracing::debug!("TLS {} {} bytes", direction, len);
        }
    }

    fn write_session(&mut self, len: usize) -> Result<()> {
        let result = write_records(&mut self.stream, &self.write_buf[..len]);
        self.settle(result, len)
    }

    fn settle(&mut self, result: Result<()>, len: usize) -> Result<()> {
        match result {
            Ok(()) => {
                self.record("sent", len);
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }
}

impl<S: Socket> Connection for SecureConnection<S> {
    fn send_all(&mut self, buf: &[u8]) -> Result<()> {
        self.ensure_open()?;
        let result = write_records(&mut self.stream, buf);
        self.settle(result, buf.len())
    }

    /// Chunks are staged in the write buffer so small pieces share records
    fn send_many(&mut self, chunks: &[&[u8]]) -> Result<()> {
        self.ensure_open()?;

        let mut filled = 0;
        for chunk in chunks {
            let mut rest = *chunk;
            while !rest.is_empty() {
                if filled == self.write_buf.len() {
                    self.write_session(filled)?;
                    filled = 0;
                }
                let n = rest.len().min(self.write_buf.len() - filled);
                self.write_buf[filled..filled + n].copy_from_slice(&rest[..n]);
                filled += n;
                rest = &rest[n..];
            }
        }

        if filled > 0 {
            self.write_session(filled)?;
        }
        Ok(())
    }

    /// No kernel zero-copy through an encrypted session: the file is read in
    /// chunks and each one goes through the session.
    fn send_file(&mut self, mut span: FileSpan<'_>) -> Result<()> {
        self.ensure_open()?;

        if !span.header.is_empty() {
            self.send_many(&span.header_slices())?;
        }

        let mut file = File::open(&span.path)?;
        file.seek(SeekFrom::Start(span.offset))?;

        let mut remaining = span.length;
        while remaining > 0 {
            let want = remaining.min(DEFAULT_CHUNK_SIZE as u64) as usize;
            let want = want.min(self.write_buf.len());

            let n = read_some(&mut file, &mut self.write_buf[..want])?;
            if n == 0 {
                break;
            }
            self.write_session(n)?;
            remaining -= n as u64;
            span.progress();
        }

        Ok(())
    }

    fn receive(&mut self) -> Result<Received> {
        loop {
            match self.stream.ssl_read(&mut self.read_buf) {
                Ok(0) => return Ok(Received::EndOfStream),
                Ok(n) => {
                    self.record("received", n);
                    return Ok(Received::Data(Bytes::copy_from_slice(&self.read_buf[..n])));
                }
                Err(e) => match read_failure(e) {
                    ReadFailure::Retry => continue,
                    ReadFailure::EndOfStream => return Ok(Received::EndOfStream),
                    ReadFailure::Fatal(err) => {
                        self.failed = true;
                        return Err(err);
                    }
                },
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let mut teardown = Teardown::new("tls connection");

        teardown.release("read buffer", || -> io::Result<()> {
            self.read_buf = Vec::new();
            Ok(())
        });
        teardown.release("write buffer", || -> io::Result<()> {
            self.write_buf = Vec::new();
            Ok(())
        });

        let failed = self.failed;
        teardown.release("session shutdown", || {
            if failed {
                return Ok(());
            }
            match self.stream.shutdown() {
                Ok(_) => Ok(()),
                // The peer may already be gone
                Err(e) if e.io_error().is_some() || e.code() == ErrorCode::SYSCALL => Ok(()),
                Err(e) => Err(e),
            }
        });

        teardown.finish("socket close", || {
            self.stream.get_mut().close().map_err(Error::Transport)
        })
    }

    fn buffer_size(&self) -> usize {
        BUFFER_SIZE
    }

    fn is_secure(&self) -> bool {
        true
    }
}

/// Encrypt and send every byte of `buf`
fn write_records<S: Socket>(stream: &mut SslStream<Backend<S>>, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        match stream.ssl_write(buf) {
            Ok(n) => buf = &buf[n..],
            Err(e) if is_retry(&e) => continue,
            Err(e) => return Err(session_error(e)),
        }
    }
    Ok(())
}

fn read_some(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match file.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

enum ReadFailure {
    Retry,
    EndOfStream,
    Fatal(Error),
}

/// Sort a failed session read into retry, end of stream, or a real error
fn read_failure(err: ssl::Error) -> ReadFailure {
    if is_retry(&err) {
        return ReadFailure::Retry;
    }

    match err.code() {
        ErrorCode::ZERO_RETURN => ReadFailure::EndOfStream,
        ErrorCode::SYSCALL => match err.into_io_error() {
            Ok(io) if io.kind() == io::ErrorKind::UnexpectedEof => ReadFailure::EndOfStream,
            Ok(io) => ReadFailure::Fatal(Error::Transport(io)),
            // EOF without close_notify
            Err(_) => ReadFailure::EndOfStream,
        },
        ErrorCode::SSL if is_unexpected_eof(&err) => ReadFailure::EndOfStream,
        _ => ReadFailure::Fatal(session_error(err)),
    }
}

fn is_retry(err: &ssl::Error) -> bool {
    matches!(err.code(), ErrorCode::WANT_READ | ErrorCode::WANT_WRITE) && err.io_error().is_none()
}

/// OpenSSL 3 reports a missing close_notify as a protocol error
fn is_unexpected_eof(err: &ssl::Error) -> bool {
    err.ssl_error()
        .map(|stack| {
            stack
                .errors()
                .iter()
                .any(|e| e.reason() == Some("unexpected eof while reading"))
        })
        .unwrap_or(false)
}

fn session_error(err: ssl::Error) -> Error {
    match err.into_io_error() {
        Ok(io) => Error::Transport(io),
        Err(err) => Error::Protocol(err.to_string()),
    }
}

fn handshake_error<S>(err: HandshakeError<S>) -> Error {
    match err {
        HandshakeError::SetupFailure(stack) => {
            Error::Protocol(format!("session setup failed: {}", stack))
        }
        HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
            match session_error(mid.into_error()) {
                Error::Protocol(msg) => Error::Protocol(format!("handshake failed: {}", msg)),
                other => other,
            }
        }
    }
}
