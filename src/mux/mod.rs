//! Transport multiplexing for a single listening port
//!
//! Every accepted socket goes through the same pipeline:
//!
//! 1. `sniff` reads up to `DEFAULT_PEEK_SIZE` bytes and classifies the
//!    connection by its first byte (`0x16` starts a TLS handshake).
//! 2. The sniffed bytes are kept in a `Carryover` buffer so that whichever
//!    path is chosen sees them first, in order.
//! 3. A TLS connection becomes a `SecureConnection`; anything else becomes a
//!    `PlainConnection`, or is answered and closed when plaintext is denied.
//! 4. The application receives a `&mut dyn Connection` and never needs to know
//!    which transport it is talking to.
//!
//! # Examples
//!
//! ```no_run
//! use tlsmux::mux::{run, Connection, Received, ServerSettings, Settings};
//!
//! let settings = Settings::from_files("certificate.pem", "key.pem");
//! let server = ServerSettings::default().port(8443);
//!
//! run(settings, server, |conn: &mut dyn Connection, _peer: std::net::SocketAddr| {
//!     while let Received::Data(_) = conn.receive()? {}
//!     conn.send_all(b"HTTP/1.1 204 No Content\r\n\r\n")
//! })
//! .unwrap();
//! ```

pub mod carryover;
pub mod connection;
pub mod plain;
pub mod server;
pub mod sniff;
pub mod socket;
pub mod teardown;
pub mod tls;

pub use carryover::Carryover;
pub use connection::{Connection, FileSpan, Received};
pub use plain::PlainConnection;
pub use server::{
    handle_connection, negotiate, run, run_listener, Application, Negotiated, Outcome, Server,
    ServerSettings,
};
pub use sniff::{classify, sniff, Transport};
pub use socket::Socket;
pub use teardown::Teardown;
pub use tls::{
    Credential, InsecurePolicy, SecureConnection, SecureContext, SessionInfo, Settings,
    SettingsBuilder, Source, TlsVersion, Verbosity,
};

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Connection and configuration errors
///
/// A plaintext connection refused by `InsecurePolicy::Deny` is not an error;
/// it is reported as `Negotiated::Rejected`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Certificate, key or chain material that cannot be used.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O failure on a live connection.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Handshake or record layer failure.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}

/// Bytes read while sniffing a new connection
pub const DEFAULT_PEEK_SIZE: usize = 4096;

/// Size of the fixed read and write buffers of a connection
pub const BUFFER_SIZE: usize = 16384;

/// Largest piece of a file sent through one encrypt-and-send call
pub const DEFAULT_CHUNK_SIZE: usize = 16384;

/// Status line and headers written before the body of a plaintext denial
pub const DENY_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n";

/// Body of the plaintext denial when none is configured
pub const DEFAULT_DENY_BODY: &str = "This server only accepts secure HTTPS connections.";
