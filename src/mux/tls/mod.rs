//! TLS side of the multiplexer
//!
//! Settings and credential loading, the shared server context, and the
//! connection type that runs an OpenSSL session over a sniffed socket.

pub mod cert;
pub mod config;
pub mod credential;
pub mod session;
pub mod vars;

pub use config::{
    InsecurePolicy, Settings, SettingsBuilder, Source, TlsVersion, Verbosity, DEFAULT_CIPHERS,
    DEFAULT_VERSIONS,
};
pub use credential::{Credential, SecureContext};
pub use session::{Backend, SecureConnection};
pub use vars::SessionInfo;
