//! Certificate helpers
//!
//! Name extraction for logging, and generation of a throwaway self-signed
//! identity for development servers and tests.

use crate::mux::{Error, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::extension::{BasicConstraints, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509Ref, X509};

/// Common Name of a certificate's subject
pub fn common_name(cert: &X509Ref) -> String {
    cert.subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "<undef>".to_string())
}

/// PEM encoded certificate and private key
#[derive(Debug, Clone)]
pub struct SelfSigned {
    pub certificate_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

/// Generate a self-signed P-256 certificate for `name`
///
/// The name is used as Common Name and as DNS subject alternative name. The
/// certificate is valid from now for one year.
pub fn generate(name: &str) -> Result<SelfSigned> {
    build(name).map_err(|e| Error::config(format!("Failed to generate certificate: {}", e)))
}

fn build(name: &str) -> std::result::Result<SelfSigned, openssl::error::ErrorStack> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    let key = PKey::from_ec_key(EcKey::generate(&group)?)?;

    let mut subject = X509NameBuilder::new()?;
    subject.append_entry_by_nid(Nid::COMMONNAME, name)?;
    let subject = subject.build();

    let mut serial = BigNum::new()?;
    serial.rand(64, MsbOption::MAYBE_ZERO, false)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    let serial = serial.to_asn1_integer()?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&subject)?;
    builder.set_issuer_name(&subject)?;
    builder.set_pubkey(&key)?;
    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(365)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(BasicConstraints::new().build()?)?;

    let san = SubjectAlternativeName::new()
        .dns(name)
        .build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok(SelfSigned {
        certificate_pem: builder.build().to_pem()?,
        key_pem: key.private_key_to_pem_pkcs8()?,
    })
}
