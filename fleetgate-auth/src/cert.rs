//! X.509 helpers shared by the pinning verifier and the gateway.
//!
//! # Security
//!
//! - Input is limited to 16KB to prevent DoS
//! - The x509_parser library handles ASN.1 parsing safely

use thiserror::Error;
use x509_parser::prelude::*;

/// Maximum certificate size (16KB is generous for a single cert)
pub const MAX_CERT_SIZE: usize = 16 * 1024;

/// Errors that can occur during certificate parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CertError {
    #[error("certificate too large: {0} bytes (max {MAX_CERT_SIZE})")]
    TooLarge(usize),

    #[error("failed to parse X.509 certificate: {0}")]
    ParseError(String),
}

/// Human-facing description of one certificate in a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertSummary {
    pub subject: String,
    pub issuer: String,
    /// Unix seconds.
    pub not_after: i64,
    pub is_ca: bool,
}

/// Parse a DER certificate, enforcing [`MAX_CERT_SIZE`].
///
/// # Errors
///
/// Returns `CertError::TooLarge` if certificate exceeds 16KB.
/// Returns `CertError::ParseError` if the certificate is malformed.
pub fn parse(cert_der: &[u8]) -> Result<X509Certificate<'_>, CertError> {
    if cert_der.len() > MAX_CERT_SIZE {
        return Err(CertError::TooLarge(cert_der.len()));
    }

    let (_, cert) = X509Certificate::from_der(cert_der)
        .map_err(|e| CertError::ParseError(format!("{:?}", e)))?;
    Ok(cert)
}

/// Extract the DER-encoded SubjectPublicKeyInfo, the input to every pin.
pub fn subject_public_key_info(cert_der: &[u8]) -> Result<Vec<u8>, CertError> {
    Ok(parse(cert_der)?.public_key().raw.to_vec())
}

/// Summarize a certificate for display.
pub fn summarize(cert_der: &[u8]) -> Result<CertSummary, CertError> {
    let cert = parse(cert_der)?;
    Ok(CertSummary {
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        not_after: cert.validity().not_after.timestamp(),
        is_ca: cert.is_ca(),
    })
}
