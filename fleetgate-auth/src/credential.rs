//! Bootstrap credential format.
//!
//! Operators hand agents a credential of the form `{id}.{secret}`:
//! - `id`: 6 random bytes, lowercase hex. Public; names the token in the store.
//! - `secret`: 32 random bytes, lowercase hex. Only its SHA-256 is ever stored.
//!
//! # Security
//!
//! - Randomness comes from `OsRng`
//! - `Debug` never prints the secret
//! - Secret checks compare digests in constant time

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const TOKEN_ID_BYTES: usize = 6;
pub const TOKEN_SECRET_BYTES: usize = 32;

/// Errors from parsing a credential string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CredentialError {
    #[error("credential must have the form <id>.<secret>")]
    Malformed,

    #[error("invalid token id")]
    InvalidId,

    #[error("invalid token secret")]
    InvalidSecret,
}

/// A bootstrap token id plus its secret.
#[derive(Clone)]
pub struct BootstrapCredential {
    id: String,
    secret: Zeroizing<String>,
}

impl BootstrapCredential {
    /// Generate a fresh credential.
    #[must_use]
    pub fn generate() -> Self {
        let mut id = [0u8; TOKEN_ID_BYTES];
        OsRng.fill_bytes(&mut id);
        let mut secret = Zeroizing::new([0u8; TOKEN_SECRET_BYTES]);
        OsRng.fill_bytes(&mut secret[..]);

        Self {
            id: hex::encode(id),
            secret: Zeroizing::new(hex::encode(&secret[..])),
        }
    }

    /// Parse `{id}.{secret}`. Surrounding whitespace is ignored.
    pub fn parse(s: &str) -> Result<Self, CredentialError> {
        let (id, secret) = s.trim().split_once('.').ok_or(CredentialError::Malformed)?;
        Self::from_parts(id, secret)
    }

    /// Build from an id and secret received separately.
    pub fn from_parts(id: &str, secret: &str) -> Result<Self, CredentialError> {
        if !is_valid_token_id(id) {
            return Err(CredentialError::InvalidId);
        }
        if !is_lower_hex(secret, TOKEN_SECRET_BYTES) {
            return Err(CredentialError::InvalidSecret);
        }
        Ok(Self {
            id: id.to_string(),
            secret: Zeroizing::new(secret.to_string()),
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The raw secret. Send it only over a pinned channel.
    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The value the gateway stores in place of the secret.
    #[must_use]
    pub fn secret_digest(&self) -> String {
        digest_secret(&self.secret)
    }

    /// The full `{id}.{secret}` string for out-of-band delivery.
    #[must_use]
    pub fn expose(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("{}.{}", self.id, self.secret.as_str()))
    }
}

impl std::fmt::Debug for BootstrapCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapCredential")
            .field("id", &self.id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Hex SHA-256 of a secret, as stored by the gateway.
#[must_use]
pub fn digest_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Check a presented secret against a stored digest.
///
/// The presented secret is hashed first so the comparison always runs over
/// two 32 byte values regardless of input length.
#[must_use]
pub fn secret_matches(presented: &str, stored_digest: &str) -> bool {
    let Ok(stored) = hex::decode(stored_digest) else {
        return false;
    };
    let computed = Sha256::digest(presented.as_bytes());
    stored.len() == computed.len() && bool::from(computed.as_slice().ct_eq(&stored))
}

/// Token ids are 12 lowercase hex characters.
#[must_use]
pub fn is_valid_token_id(id: &str) -> bool {
    is_lower_hex(id, TOKEN_ID_BYTES)
}

fn is_lower_hex(s: &str, bytes: usize) -> bool {
    s.len() == bytes * 2 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_format() {
        let cred = BootstrapCredential::generate();
        assert_eq!(cred.id().len(), 12);
        assert_eq!(cred.secret().len(), 64);
        assert!(is_valid_token_id(cred.id()));

        let full = cred.expose();
        assert_eq!(full.len(), 12 + 1 + 64);
    }

    #[test]
    fn test_parse_roundtrip() {
        let cred = BootstrapCredential::generate();
        let parsed = BootstrapCredential::parse(&cred.expose()).unwrap();
        assert_eq!(parsed.id(), cred.id());
        assert_eq!(parsed.secret(), cred.secret());
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            BootstrapCredential::parse("no-dot-here").unwrap_err(),
            CredentialError::Malformed
        );
        let secret = "a".repeat(64);
        assert_eq!(
            BootstrapCredential::parse(&format!("XYZ.{secret}")).unwrap_err(),
            CredentialError::InvalidId
        );
        assert_eq!(
            BootstrapCredential::parse("0123456789ab.short").unwrap_err(),
            CredentialError::InvalidSecret
        );
        // uppercase hex is not canonical
        assert_eq!(
            BootstrapCredential::parse(&format!("0123456789AB.{secret}")).unwrap_err(),
            CredentialError::InvalidId
        );
    }

    #[test]
    fn test_secret_matches_digest() {
        let cred = BootstrapCredential::generate();
        let digest = cred.secret_digest();

        assert!(secret_matches(cred.secret(), &digest));
        assert!(!secret_matches(&"0".repeat(64), &digest));
        assert!(!secret_matches(cred.secret(), "not-hex"));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = BootstrapCredential::generate();
        let debug = format!("{:?}", cred);
        assert!(debug.contains(cred.id()));
        assert!(!debug.contains(cred.secret()));
    }

    #[test]
    fn test_generated_ids_unique() {
        let a = BootstrapCredential::generate();
        let b = BootstrapCredential::generate();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.secret(), b.secret());
    }
}
