//! TLS client configuration for the bootstrap connection.
//!
//! Uses rustls 0.23+ with a custom verifier; there are no WebPKI roots.
//!
//! # Verifiers
//!
//! - [`PinningVerifier`]: Accepts a chain only if one of its certificates
//!   matches a configured pin

use std::sync::{Arc, Mutex};

use fleetgate_auth::{verify_chain, TrustAnchors, TrustError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

/// Certificate verifier that pins the gateway chain.
///
/// # Security
///
/// - The whole presented chain is checked against the anchors; a match above
///   the leaf also requires every link below it to be correctly signed
/// - Hostnames and validity periods are not checked; the pin is the trust root
/// - Handshake signatures are still verified against the leaf key
#[derive(Debug)]
pub struct PinningVerifier {
    anchors: TrustAnchors,
    provider: Arc<CryptoProvider>,
    /// Why the last handshake was refused, for error reporting.
    last_failure: Mutex<Option<TrustError>>,
}

impl PinningVerifier {
    pub fn new(anchors: TrustAnchors) -> Arc<Self> {
        Arc::new(Self {
            anchors,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            last_failure: Mutex::new(None),
        })
    }

    /// The trust failure behind the most recent rejected handshake, if any.
    pub fn take_failure(&self) -> Option<TrustError> {
        match self.last_failure.lock() {
            Ok(mut failure) => failure.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn record_failure(&self, error: TrustError) {
        match self.last_failure.lock() {
            Ok(mut failure) => *failure = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }
}

impl ServerCertVerifier for PinningVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let chain: Vec<&[u8]> = std::iter::once(end_entity.as_ref())
            .chain(intermediates.iter().map(|c| c.as_ref()))
            .collect();

        match verify_chain(&chain, &self.anchors) {
            Ok(matched) => {
                tracing::debug!(index = matched.index, pin = %matched.pin, "Gateway chain pinned");
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => {
                // Potential MITM: never fall back to anything weaker
                tracing::warn!(error = %e, "Gateway chain does not match any pin");
                self.record_failure(e);
                Err(rustls::Error::InvalidCertificate(
                    rustls::CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build a client config that trusts only what `verifier` pins.
pub fn build_pinned_config(verifier: Arc<PinningVerifier>) -> Result<ClientConfig, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .dangerous()
        .with_custom_certificate_verifier(verifier)
        .with_no_client_auth();
    Ok(config)
}
