//! Public-key pinning for gateway certificate chains.
//!
//! A [`Pin`] is a digest of a certificate's DER SubjectPublicKeyInfo,
//! written `{algorithm}:{url_safe_base64_no_padding}`. Agents receive one or
//! more pins out-of-band and refuse any TLS peer whose chain matches none
//! of them.
//!
//! - [`HashAlgorithm`] - Supported pin digests (`sha256`, `b3-256`)
//! - [`TrustAnchors`] - The set of pins an agent accepts
//! - [`verify_chain`] - Chain check run during the TLS handshake
//!
//! # Security Properties
//!
//! - Pins hash the key, not the certificate, so reissued certificates
//!   over the same key stay trusted
//! - Pin equality is constant-time
//! - Verification fails closed: empty chains, empty anchor sets,
//!   malformed certificates and unknown algorithms are all errors
//! - Matching an intermediate or root pin requires every certificate
//!   below it to be signed by its successor

mod pin;
mod verify;

pub use pin::{HashAlgorithm, Pin, PinError};
pub use verify::{verify, verify_chain, PinMatch, TrustAnchors, TrustError};
