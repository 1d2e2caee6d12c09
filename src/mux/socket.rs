//! Raw byte transport under a connection
//!
//! `Socket` is what both connection flavours are built on: a blocking byte
//! stream that can also be closed and, where the platform allows it, can move
//! file contents without passing them through user space.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::net::{Shutdown, TcpStream};

/// Blocking byte stream accepted from a listener
pub trait Socket: Read + Write {
    /// Close both directions of the stream
    fn close(&mut self) -> io::Result<()>;

    /// Send `length` bytes of `file` starting at `offset`
    ///
    /// Returns the number of bytes sent, which is smaller than `length` when
    /// the file ends first.
    fn send_file(&mut self, file: &mut File, offset: u64, length: u64) -> io::Result<u64> {
        copy_span(file, offset, length, self)
    }
}

/// Copy a byte range of `file` into `dst` through a user-space buffer
pub(crate) fn copy_span<W: Write + ?Sized>(
    file: &mut File,
    offset: u64,
    length: u64,
    dst: &mut W,
) -> io::Result<u64> {
    file.seek(SeekFrom::Start(offset))?;
    io::copy(&mut Read::by_ref(file).take(length), dst)
}

fn shutdown_tcp(stream: &TcpStream) -> io::Result<()> {
    match stream.shutdown(Shutdown::Both) {
        // Peer is already gone, nothing left to close
        Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
        other => other,
    }
}

impl Socket for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        shutdown_tcp(self)
    }

    #[cfg(target_os = "linux")]
    fn send_file(&mut self, file: &mut File, offset: u64, length: u64) -> io::Result<u64> {
        sendfile(self, file, offset, length)
    }
}

#[cfg(unix)]
impl Socket for std::os::unix::net::UnixStream {
    fn close(&mut self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Largest count handed to a single sendfile(2) call
#[cfg(target_os = "linux")]
const SENDFILE_MAX: u64 = 0x7fff_f000;

/// Kernel zero-copy transfer from `file` to `stream`
#[cfg(target_os = "linux")]
fn sendfile(stream: &TcpStream, file: &File, offset: u64, length: u64) -> io::Result<u64> {
    use std::os::fd::AsRawFd;

    let mut off = libc::off_t::try_from(offset)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "file offset out of range"))?;
    let mut sent = 0u64;

    while sent < length {
        let count = (length - sent).min(SENDFILE_MAX) as usize;
        let n = unsafe { libc::sendfile(stream.as_raw_fd(), file.as_raw_fd(), &mut off, count) };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            break;
        }
        sent += n as u64;
    }

    Ok(sent)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    fn fixture(len: usize) -> (tempfile::NamedTempFile, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();
        (file, data)
    }

    #[test]
    fn test_copy_span_clamps_to_file_end() {
        let (file, data) = fixture(1000);
        let mut out = Vec::new();

        let mut handle = file.reopen().unwrap();
        let sent = copy_span(&mut handle, 900, 500, &mut out).unwrap();
        assert_eq!(sent, 100);
        assert_eq!(out, &data[900..]);
    }

    #[test]
    fn test_tcp_send_file() {
        let (file, data) = fixture(200_000);
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let reader = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut got = Vec::new();
            stream.read_to_end(&mut got).unwrap();
            got
        });

        let mut stream = TcpStream::connect(addr).unwrap();
        let mut handle = file.reopen().unwrap();
        let sent = stream.send_file(&mut handle, 10, 150_000).unwrap();
        assert_eq!(sent, 150_000);
        stream.close().unwrap();

        let got = reader.join().unwrap();
        assert_eq!(got, &data[10..150_010]);
    }

    #[test]
    fn test_tcp_close_after_peer_left() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();
        drop(client);

        assert!(server_side.close().is_ok());
    }
}
