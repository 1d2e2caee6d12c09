//! Server credential and the shared TLS context
//!
//! The credential (certificate chain and private key) is resolved once at
//! startup. Together with the version and cipher settings it produces a
//! `SecureContext`, from which every connection's session is created.

use super::cert::common_name;
use super::config::{Settings, Verbosity};
use crate::mux::{Error, Result};
use openssl::pkey::{PKey, Private};
use openssl::ssl::{Ssl, SslContext, SslContextBuilder, SslMethod, SslVerifyMode};
use openssl::x509::{X509Ref, X509};

/// Certificate chain (leaf first) and private key
pub struct Credential {
    chain: Vec<X509>,
    key: PKey<Private>,
}

impl Credential {
    /// Load the certificate, chain and key named by `settings`
    pub fn load(settings: &Settings) -> Result<Self> {
        let cert = settings.certificate().load()?;
        let chain = settings
            .chain()
            .iter()
            .map(|source| source.load())
            .collect::<Result<Vec<_>>>()?;
        let key = settings.key().load()?;

        let chain: Vec<&[u8]> = chain.iter().map(|pem| &pem[..]).collect();
        Self::from_pem(&cert, &chain, &key)
    }

    /// Build a credential from PEM bytes
    ///
    /// Every certificate found in `cert` is kept, followed by those of each
    /// `chain` entry in order.
    pub fn from_pem(cert: &[u8], chain: &[&[u8]], key: &[u8]) -> Result<Self> {
        let mut certs = X509::stack_from_pem(cert)
            .map_err(|e| Error::config(format!("Failed to load certificate: {}", e)))?;
        if certs.is_empty() {
            return Err(Error::config("no certificate found"));
        }

        for pem in chain {
            let extra = X509::stack_from_pem(pem)
                .map_err(|e| Error::config(format!("Failed to load chain certificate: {}", e)))?;
            if extra.is_empty() {
                return Err(Error::config("no certificate found in chain entry"));
            }
            certs.extend(extra);
        }

        let key = PKey::private_key_from_pem(key)
            .map_err(|e| Error::config(format!("Failed to load private key: {}", e)))?;

        Ok(Credential { chain: certs, key })
    }

    /// The server's own certificate
    pub fn leaf(&self) -> &X509Ref {
        &self.chain[0]
    }

    /// The full chain, leaf first
    pub fn chain(&self) -> &[X509] {
        &self.chain
    }

    pub fn key(&self) -> &PKey<Private> {
        &self.key
    }
}

/// Server-side TLS context shared by all connections
///
/// Built from a credential and the version and cipher settings. Immutable;
/// cloning only bumps a reference count inside OpenSSL.
#[derive(Clone)]
pub struct SecureContext {
    ctx: SslContext,
    verbosity: Verbosity,
}

impl SecureContext {
    pub fn new(credential: &Credential, settings: &Settings) -> Result<Self> {
        let config = |e: openssl::error::ErrorStack| Error::config(e.to_string());

        let mut builder = SslContextBuilder::new(SslMethod::tls_server()).map_err(config)?;

        builder.set_certificate(credential.leaf()).map_err(config)?;
        for extra in &credential.chain()[1..] {
            builder.add_extra_chain_cert(extra.clone()).map_err(config)?;
        }
        builder.set_private_key(credential.key()).map_err(config)?;
        builder
            .check_private_key()
            .map_err(|e| Error::config(format!("private key does not match certificate: {}", e)))?;

        let (min, max) = settings
            .version_range()
            .ok_or_else(|| Error::config("no TLS version enabled"))?;
        builder
            .set_min_proto_version(Some(min.to_openssl_version()))
            .map_err(config)?;
        builder
            .set_max_proto_version(Some(max.to_openssl_version()))
            .map_err(config)?;

        builder
            .set_cipher_list(&settings.cipher_list())
            .map_err(|e| Error::config(format!("no usable cipher in list: {}", e)))?;

        // Client certificates are never requested
        builder.set_verify(SslVerifyMode::NONE);

        tracing::info!(
            "TLS context ready: certificate {}, {} chain cert(s), versions {}..{}",
            common_name(credential.leaf()),
            credential.chain().len() - 1,
            min,
            max
        );

        Ok(SecureContext {
            ctx: builder.build(),
            verbosity: settings.verbosity(),
        })
    }

    /// Load the credential named by `settings` and build the context
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let credential = Credential::load(settings)?;
        Self::new(&credential, settings)
    }

    /// Create a fresh server session
    pub(crate) fn session(&self) -> Result<Ssl> {
        Ssl::new(&self.ctx).map_err(|e| Error::Protocol(format!("session setup failed: {}", e)))
    }

    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn ssl_context(&self) -> &SslContext {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mux::tls::cert::generate;
    use crate::mux::tls::config::Source;

    #[test]
    fn test_chain_order_leaf_first() {
        let leaf = generate("leaf.example").unwrap();
        let mid = generate("intermediate.example").unwrap();
        let root = generate("root.example").unwrap();

        let credential = Credential::from_pem(
            &leaf.certificate_pem,
            &[&mid.certificate_pem[..], &root.certificate_pem[..]],
            &leaf.key_pem,
        )
        .unwrap();

        let names: Vec<String> = credential.chain().iter().map(|c| common_name(c)).collect();
        assert_eq!(names, vec!["leaf.example", "intermediate.example", "root.example"]);
        assert_eq!(common_name(credential.leaf()), "leaf.example");
    }

    #[test]
    fn test_context_from_memory_settings() {
        let identity = generate("localhost").unwrap();
        let settings = Settings::from_memory(identity.certificate_pem, identity.key_pem);

        let context = SecureContext::from_settings(&settings).unwrap();
        assert_eq!(context.verbosity(), Verbosity::Quiet);
        assert!(context.session().is_ok());
    }

    #[test]
    fn test_missing_files_fail_fast() {
        let settings = Settings::from_files("/nonexistent/certificate.pem", "/nonexistent/key.pem");
        assert!(matches!(SecureContext::from_settings(&settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_garbage_pem_is_config_error() {
        let identity = generate("localhost").unwrap();

        let bad_cert = Credential::from_pem(b"not a certificate", &[], &identity.key_pem);
        assert!(matches!(bad_cert, Err(Error::Config(_))));

        let bad_key = Credential::from_pem(&identity.certificate_pem, &[], b"not a key");
        assert!(matches!(bad_key, Err(Error::Config(_))));

        let bad_chain = Credential::from_pem(&identity.certificate_pem, &[&b"junk"[..]], &identity.key_pem);
        assert!(matches!(bad_chain, Err(Error::Config(_))));
    }

    #[test]
    fn test_mismatched_key_rejected() {
        let one = generate("one.example").unwrap();
        let two = generate("two.example").unwrap();

        let settings = Settings::builder()
            .certificate(Source::memory(one.certificate_pem))
            .key(Source::memory(two.key_pem))
            .build()
            .unwrap();
        assert!(matches!(SecureContext::from_settings(&settings), Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_ciphers_rejected() {
        let identity = generate("localhost").unwrap();
        let settings = Settings::builder()
            .certificate(Source::memory(identity.certificate_pem))
            .key(Source::memory(identity.key_pem))
            .ciphers(["NOT-A-CIPHER"])
            .build()
            .unwrap();
        assert!(matches!(SecureContext::from_settings(&settings), Err(Error::Config(_))));
    }
}
