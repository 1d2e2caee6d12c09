//! TLS settings
//!
//! `Settings` is built once at startup and shared read-only by every
//! connection. Certificates and keys can come from files or from memory.

use crate::mux::{Error, Result, DEFAULT_DENY_BODY};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// TLS version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlsVersion {
    /// TLS 1.0
    Tls10,
    /// TLS 1.1
    Tls11,
    /// TLS 1.2
    Tls12,
    /// TLS 1.3
    Tls13,
}

impl TlsVersion {
    /// Get OpenSSL protocol version constant
    pub fn to_openssl_version(&self) -> openssl::ssl::SslVersion {
        use openssl::ssl::SslVersion;
        match self {
            TlsVersion::Tls10 => SslVersion::TLS1,
            TlsVersion::Tls11 => SslVersion::TLS1_1,
            TlsVersion::Tls12 => SslVersion::TLS1_2,
            TlsVersion::Tls13 => SslVersion::TLS1_3,
        }
    }

    /// Get version as string
    pub fn as_str(&self) -> &'static str {
        match self {
            TlsVersion::Tls10 => "TLSv1.0",
            TlsVersion::Tls11 => "TLSv1.1",
            TlsVersion::Tls12 => "TLSv1.2",
            TlsVersion::Tls13 => "TLSv1.3",
        }
    }
}

impl FromStr for TlsVersion {
    type Err = Error;

    /// Parse TLS version from string (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TLSV1.0" | "TLS1.0" | "TLSV1" | "TLS1" => Ok(TlsVersion::Tls10),
            "TLSV1.1" | "TLS1.1" => Ok(TlsVersion::Tls11),
            "TLSV1.2" | "TLS1.2" => Ok(TlsVersion::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsVersion::Tls13),
            _ => Err(Error::config(format!("invalid TLS version: {}", s))),
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions enabled by default, most preferred first
pub const DEFAULT_VERSIONS: [TlsVersion; 3] =
    [TlsVersion::Tls13, TlsVersion::Tls12, TlsVersion::Tls11];

/// Cipher suites (TLS 1.2 and below) enabled by default, in preference order
pub const DEFAULT_CIPHERS: [&str; 4] = [
    "ECDHE-ECDSA-AES128-GCM-SHA256",
    "ECDHE-RSA-AES128-GCM-SHA256",
    "ECDHE-ECDSA-AES256-GCM-SHA384",
    "ECDHE-RSA-AES256-GCM-SHA384",
];

/// Where PEM material is read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(PathBuf),
    Memory(Bytes),
}

impl Source {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Source::File(path.as_ref().to_path_buf())
    }

    pub fn memory(pem: impl Into<Bytes>) -> Self {
        Source::Memory(pem.into())
    }

    /// Read the PEM bytes
    pub fn load(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            Source::File(path) => std::fs::read(path)
                .map(Cow::Owned)
                .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e))),
            Source::Memory(pem) => Ok(Cow::Borrowed(&pem[..])),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::File(path) => write!(f, "{}", path.display()),
            Source::Memory(pem) => write!(f, "<{} bytes in memory>", pem.len()),
        }
    }
}

/// What to do with a connection that does not start a TLS handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsecurePolicy {
    /// Answer with this text body and close
    Deny(Bytes),
    /// Serve the connection without encryption
    Allow,
}

impl InsecurePolicy {
    pub fn deny(body: impl Into<Bytes>) -> Self {
        InsecurePolicy::Deny(body.into())
    }
}

impl Default for InsecurePolicy {
    fn default() -> Self {
        InsecurePolicy::Deny(Bytes::from_static(DEFAULT_DENY_BODY.as_bytes()))
    }
}

/// How much TLS detail is logged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// Failures only
    #[default]
    Quiet,
    /// Negotiated parameters of every handshake
    Handshake,
    /// Every record sent and received
    Records,
}

impl FromStr for Verbosity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "quiet" | "none" => Ok(Verbosity::Quiet),
            "handshake" => Ok(Verbosity::Handshake),
            "records" | "all" => Ok(Verbosity::Records),
            _ => Err(Error::config(format!("invalid verbosity: {}", s))),
        }
    }
}

/// TLS settings (immutable after building)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    certificate: Source,
    chain: Vec<Source>,
    key: Source,
    versions: Vec<TlsVersion>,
    ciphers: Vec<String>,
    verbosity: Verbosity,
    insecure: InsecurePolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            certificate: Source::file("certificate.pem"),
            chain: Vec::new(),
            key: Source::file("key.pem"),
            versions: DEFAULT_VERSIONS.to_vec(),
            ciphers: DEFAULT_CIPHERS.iter().map(|c| c.to_string()).collect(),
            verbosity: Verbosity::default(),
            insecure: InsecurePolicy::default(),
        }
    }
}

impl Settings {
    /// Create a new settings builder starting from the defaults
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Certificate and key from PEM files
    pub fn from_files(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Self {
        Settings {
            certificate: Source::file(cert),
            key: Source::file(key),
            ..Settings::default()
        }
    }

    /// Certificate and key from PEM bytes
    pub fn from_memory(cert: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        Settings {
            certificate: Source::memory(cert),
            key: Source::memory(key),
            ..Settings::default()
        }
    }

    /// Certificate, intermediate chain and key from PEM files
    pub fn from_chain_files<P: AsRef<Path>>(
        cert: impl AsRef<Path>,
        chain: impl IntoIterator<Item = P>,
        key: impl AsRef<Path>,
    ) -> Self {
        Settings {
            chain: chain.into_iter().map(Source::file).collect(),
            ..Settings::from_files(cert, key)
        }
    }

    /// Certificate, intermediate chain and key from PEM bytes
    pub fn from_chain_memory<B: Into<Bytes>>(
        cert: impl Into<Bytes>,
        chain: impl IntoIterator<Item = B>,
        key: impl Into<Bytes>,
    ) -> Self {
        Settings {
            chain: chain.into_iter().map(Source::memory).collect(),
            ..Settings::from_memory(cert, key)
        }
    }

    /// Same settings with a different plaintext policy
    pub fn with_insecure(mut self, policy: InsecurePolicy) -> Self {
        self.insecure = policy;
        self
    }

    pub fn certificate(&self) -> &Source {
        &self.certificate
    }

    pub fn chain(&self) -> &[Source] {
        &self.chain
    }

    pub fn key(&self) -> &Source {
        &self.key
    }

    pub fn versions(&self) -> &[TlsVersion] {
        &self.versions
    }

    pub fn ciphers(&self) -> &[String] {
        &self.ciphers
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn insecure(&self) -> &InsecurePolicy {
        &self.insecure
    }

    /// Lowest and highest enabled version
    ///
    /// OpenSSL only supports a contiguous range, so a set with gaps is
    /// widened to cover everything between its extremes.
    pub fn version_range(&self) -> Option<(TlsVersion, TlsVersion)> {
        let min = self.versions.iter().min()?;
        let max = self.versions.iter().max()?;
        Some((*min, *max))
    }

    /// OpenSSL cipher list string
    pub fn cipher_list(&self) -> String {
        self.ciphers.join(":")
    }
}

/// Settings builder
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    fn new() -> Self {
        SettingsBuilder {
            settings: Settings::default(),
        }
    }

    /// Set the leaf certificate source
    pub fn certificate(mut self, source: Source) -> Self {
        self.settings.certificate = source;
        self
    }

    /// Append an intermediate certificate source
    pub fn chain(mut self, source: Source) -> Self {
        self.settings.chain.push(source);
        self
    }

    /// Set the private key source
    pub fn key(mut self, source: Source) -> Self {
        self.settings.key = source;
        self
    }

    /// Set the allowed protocol versions
    pub fn versions(mut self, versions: &[TlsVersion]) -> Self {
        self.settings.versions = versions.to_vec();
        self
    }

    /// Set the cipher list (for TLS <= 1.2), most preferred first
    pub fn ciphers<I, C>(mut self, ciphers: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.settings.ciphers = ciphers.into_iter().map(Into::into).collect();
        self
    }

    /// Set how much TLS detail is logged
    pub fn verbosity(mut self, verbosity: Verbosity) -> Self {
        self.settings.verbosity = verbosity;
        self
    }

    /// Set the plaintext policy
    pub fn insecure(mut self, policy: InsecurePolicy) -> Self {
        self.settings.insecure = policy;
        self
    }

    /// Serve plaintext connections instead of denying them
    pub fn allow_insecure(self) -> Self {
        self.insecure(InsecurePolicy::Allow)
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        if self.settings.versions.is_empty() {
            return Err(Error::config("no TLS version enabled"));
        }
        if self.settings.ciphers.is_empty() {
            return Err(Error::config("empty cipher list"));
        }
        if let Some(bad) = self.settings.ciphers.iter().find(|c| c.is_empty() || c.contains(':')) {
            return Err(Error::config(format!("invalid cipher name: {:?}", bad)));
        }
        Ok(self.settings)
    }
}
