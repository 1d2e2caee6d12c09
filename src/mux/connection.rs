//! The connection abstraction handed to the application
//!
//! `Connection` plays the same role for the HTTP engine that a plain socket
//! would: send bytes, send a file, receive bytes, close. Whether the bytes are
//! encrypted on the wire is invisible from this side.

use super::{Result, BUFFER_SIZE};
use bytes::Bytes;
use std::fmt;
use std::path::{Path, PathBuf};

/// Outcome of a receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    /// A non-empty chunk of application bytes
    Data(Bytes),
    /// The peer closed the stream
    EndOfStream,
}

impl Received {
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Received::EndOfStream)
    }

    /// The received bytes, empty at end of stream
    pub fn into_bytes(self) -> Bytes {
        match self {
            Received::Data(bytes) => bytes,
            Received::EndOfStream => Bytes::new(),
        }
    }

    pub(crate) fn from_chunk(chunk: Bytes) -> Self {
        if chunk.is_empty() {
            Received::EndOfStream
        } else {
            Received::Data(chunk)
        }
    }
}

/// A byte range of a file to transmit, with optional leading bytes
///
/// `header` chunks (typically the HTTP response head) are sent before the file
/// contents. The optional hook runs after every piece of the file that went
/// out, which lets a surrounding server loop push its idle deadline forward.
pub struct FileSpan<'a> {
    pub path: PathBuf,
    pub offset: u64,
    pub length: u64,
    pub header: Vec<Bytes>,
    pub hook: Option<Box<dyn FnMut() + 'a>>,
}

impl<'a> FileSpan<'a> {
    pub fn new(path: impl AsRef<Path>, offset: u64, length: u64) -> Self {
        FileSpan {
            path: path.as_ref().to_path_buf(),
            offset,
            length,
            header: Vec::new(),
            hook: None,
        }
    }

    /// Bytes to send before the file contents
    pub fn header(mut self, chunk: impl Into<Bytes>) -> Self {
        self.header.push(chunk.into());
        self
    }

    /// Callback invoked after each transmitted piece of the file
    pub fn on_progress(mut self, hook: impl FnMut() + 'a) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub(crate) fn header_slices(&self) -> Vec<&[u8]> {
        self.header.iter().map(|chunk| &chunk[..]).collect()
    }

    pub(crate) fn progress(&mut self) {
        if let Some(hook) = self.hook.as_mut() {
            hook();
        }
    }
}

impl fmt::Debug for FileSpan<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpan")
            .field("path", &self.path)
            .field("offset", &self.offset)
            .field("length", &self.length)
            .field("header_chunks", &self.header.len())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Bidirectional stream presented to the application
///
/// Implemented by `SecureConnection` and `PlainConnection`; both behave the
/// same from the caller's point of view.
pub trait Connection {
    /// Send every byte of `buf` or fail
    fn send_all(&mut self, buf: &[u8]) -> Result<()>;

    /// Send several chunks back to back
    fn send_many(&mut self, chunks: &[&[u8]]) -> Result<()> {
        for chunk in chunks {
            self.send_all(chunk)?;
        }
        Ok(())
    }

    /// Send header chunks followed by `min(length, file_size - offset)` bytes
    /// of the file
    fn send_file(&mut self, span: FileSpan<'_>) -> Result<()>;

    /// Receive the next chunk of bytes
    fn receive(&mut self) -> Result<Received>;

    /// Release the connection's resources and close the socket
    fn close(&mut self) -> Result<()>;

    /// Size of the buffers used for framing on this connection
    fn buffer_size(&self) -> usize {
        BUFFER_SIZE
    }

    /// Whether bytes on the wire are encrypted
    fn is_secure(&self) -> bool;
}
