//! Ed25519 signing keys with secret handling suitable for on-disk persistence.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors that can occur during key operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The provided bytes have an invalid length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// The provided bytes do not represent a valid key.
    #[error("invalid key format")]
    InvalidFormat,
}

/// Zeroize-on-drop buffer for exported key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Borrow the secret bytes. Do not copy them somewhere that outlives this value.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Copy into a plain `Vec<u8>` that will NOT be zeroized.
    ///
    /// Only for APIs that insist on owning the buffer (rustls key types).
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self.0.clone()
    }
}

impl AsRef<[u8]> for SecretBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::ops::Deref for SecretBytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A private Ed25519 signing key.
///
/// `SigningKey` is `ZeroizeOnDrop`, so the wrapped material is wiped when this
/// value goes away. There is deliberately no `Debug` impl.
pub struct PrivateKey(ed25519_dalek::SigningKey);

impl PrivateKey {
    /// Generate a new random key from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        Self(ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng))
    }

    /// Derive the public key.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Export as PKCS#8 v2 DER, the form rcgen and rustls consume.
    #[must_use]
    pub fn to_pkcs8_der(&self) -> SecretBytes {
        use ed25519_dalek::pkcs8::EncodePrivateKey;
        SecretBytes(
            self.0
                .to_pkcs8_der()
                .expect("Ed25519 key should always encode to PKCS#8")
                .as_bytes()
                .to_vec(),
        )
    }

    /// Load from PKCS#8 DER.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidFormat` if the bytes are not an Ed25519 PKCS#8 document.
    pub fn from_pkcs8_der(bytes: &[u8]) -> Result<Self, KeyError> {
        use ed25519_dalek::pkcs8::DecodePrivateKey;
        let key =
            ed25519_dalek::SigningKey::from_pkcs8_der(bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }
}

/// A public Ed25519 verification key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    /// Load a public key from its 32 raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `KeyError::InvalidLength` for anything but 32 bytes and
    /// `KeyError::InvalidFormat` if the bytes are not a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let key =
            ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| KeyError::InvalidFormat)?;
        Ok(Self(key))
    }

    /// Raw public key bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 32] {
        self.0.to_bytes()
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.to_bytes()[..8]))
    }
}
