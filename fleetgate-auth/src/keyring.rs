//! Keyring derivation for admitted agents.
//!
//! During `Join` both sides generate an ephemeral X25519 key and swap public
//! halves. Each side then runs HKDF-SHA256 over the shared secret:
//!
//! ```text
//! salt = client_public || server_public
//! info = "fleetgate-keyring-v1:" || side label
//! ```
//!
//! producing a 64 byte client key and a 64 byte server key. The shared
//! secret never crosses the wire; the gateway and agent end up holding the
//! same [`SharedKeys`]. A [`Keyring`] bundles those keys with the pins of the
//! gateway chain the agent verified, so later connections can pin without
//! out-of-band input.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::pkp::Pin;

/// Size of each derived key.
pub const SHARED_KEY_LEN: usize = 64;

const INFO_PREFIX: &[u8] = b"fleetgate-keyring-v1:";

/// Errors from keyring derivation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyringError {
    #[error("invalid peer public key: expected 32 bytes, got {0}")]
    InvalidPublicKey(usize),

    /// The peer sent a low-order point; the exchange produced no entropy.
    #[error("key exchange was not contributory")]
    NonContributory,

    #[error("key derivation failed")]
    Derivation,
}

/// Which end of the exchange we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// One-shot X25519 key for a single `Join`.
pub struct EphemeralExchange {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralExchange {
    #[must_use]
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = X25519PublicKey::from(&secret);
        Self { secret, public }
    }

    #[must_use]
    pub fn public_key(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Finish the exchange against the peer's public key.
    ///
    /// Consumes `self`: an ephemeral secret is used exactly once.
    pub fn complete(self, side: Side, peer_public: &[u8]) -> Result<SharedKeys, KeyringError> {
        let peer: [u8; 32] = peer_public
            .try_into()
            .map_err(|_| KeyringError::InvalidPublicKey(peer_public.len()))?;
        let ours = self.public.to_bytes();
        let (client_public, server_public) = match side {
            Side::Client => (ours, peer),
            Side::Server => (peer, ours),
        };

        let shared = self.secret.diffie_hellman(&X25519PublicKey::from(peer));
        if !shared.was_contributory() {
            return Err(KeyringError::NonContributory);
        }

        SharedKeys::derive(shared.as_bytes(), &client_public, &server_public)
    }
}

/// The symmetric keys an agent and the gateway share after bootstrap.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SharedKeys {
    #[serde(with = "b64")]
    client_key: Vec<u8>,
    #[serde(with = "b64")]
    server_key: Vec<u8>,
}

impl SharedKeys {
    fn derive(
        shared_secret: &[u8; 32],
        client_public: &[u8; 32],
        server_public: &[u8; 32],
    ) -> Result<Self, KeyringError> {
        let mut salt = [0u8; 64];
        salt[..32].copy_from_slice(client_public);
        salt[32..].copy_from_slice(server_public);
        let hk = Hkdf::<Sha256>::new(Some(&salt), shared_secret);

        let mut client_key = vec![0u8; SHARED_KEY_LEN];
        let mut server_key = vec![0u8; SHARED_KEY_LEN];
        hk.expand(&info(b"client"), &mut client_key)
            .map_err(|_| KeyringError::Derivation)?;
        hk.expand(&info(b"server"), &mut server_key)
            .map_err(|_| KeyringError::Derivation)?;

        Ok(Self {
            client_key,
            server_key,
        })
    }

    #[must_use]
    pub fn client_key(&self) -> &[u8] {
        &self.client_key
    }

    #[must_use]
    pub fn server_key(&self) -> &[u8] {
        &self.server_key
    }
}

impl PartialEq for SharedKeys {
    fn eq(&self, other: &Self) -> bool {
        let client = self.client_key.ct_eq(&other.client_key);
        let server = self.server_key.ct_eq(&other.server_key);
        (client & server).into()
    }
}

impl Eq for SharedKeys {}

impl std::fmt::Debug for SharedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedKeys(<redacted>)")
    }
}

fn info(label: &[u8]) -> Vec<u8> {
    let mut info = Vec::with_capacity(INFO_PREFIX.len() + label.len());
    info.extend_from_slice(INFO_PREFIX);
    info.extend_from_slice(label);
    info
}

/// Credential bundle issued to an admitted agent.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyring {
    pub shared_keys: SharedKeys,
    /// Pins of the gateway chain, for all later connections.
    pub pinned_keys: Vec<Pin>,
}

impl Keyring {
    #[must_use]
    pub fn new(shared_keys: SharedKeys, pinned_keys: Vec<Pin>) -> Self {
        Self {
            shared_keys,
            pinned_keys,
        }
    }

    /// Short, non-secret identifier for logs: hex of a truncated hash over both keys.
    #[must_use]
    pub fn key_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"fleetgate-keyring-id:");
        hasher.update(self.shared_keys.client_key());
        hasher.update(self.shared_keys.server_key());
        hex::encode(&hasher.finalize()[..8])
    }
}

impl std::fmt::Debug for Keyring {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyring")
            .field("key_id", &self.key_id())
            .field("pinned_keys", &self.pinned_keys)
            .finish()
    }
}

mod b64 {
    use super::{Engine, STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = STANDARD.decode(s).map_err(serde::de::Error::custom)?;
        if bytes.len() != super::SHARED_KEY_LEN {
            return Err(serde::de::Error::invalid_length(bytes.len(), &"64 bytes"));
        }
        Ok(bytes)
    }
}
