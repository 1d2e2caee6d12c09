//! Negotiated session parameters
//!
//! Captured once after the handshake, for logging and for applications that
//! want to know what was agreed with the client.

use openssl::ssl::{NameType, SslRef};
use std::fmt;

/// Parameters agreed during the handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Negotiated TLS version (e.g., "TLSv1.3")
    pub version: String,

    /// Negotiated cipher suite
    pub cipher: String,

    /// SNI servername sent by the client
    pub servername: Option<String>,

    /// Whether the session was resumed
    pub reused: bool,
}

impl SessionInfo {
    /// Read the negotiated parameters from an established session
    pub fn from_ssl(ssl: &SslRef) -> Self {
        SessionInfo {
            version: ssl.version_str().to_string(),
            cipher: ssl
                .current_cipher()
                .map(|c| c.name().to_string())
                .unwrap_or_else(|| "<undef>".to_string()),
            servername: ssl.servername(NameType::HOST_NAME).map(|s| s.to_string()),
            reused: ssl.session_reused(),
        }
    }
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.version, self.cipher)?;
        if let Some(name) = &self.servername {
            write!(f, " sni={}", name)?;
        }
        if self.reused {
            f.write_str(" resumed")?;
        }
        Ok(())
    }
}
