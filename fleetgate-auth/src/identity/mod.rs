//! Ed25519 key material for gateway certificates.
//!
//! The gateway signs its certificate chain with long-lived Ed25519 keys.
//! Agents never see these keys; they pin the public half through
//! [`crate::pkp`].
//!
//! - [`PrivateKey`] - Signing key, zeroized on drop, PKCS#8 import/export
//! - [`PublicKey`] - Verification key
//!
//! # Example
//!
//! ```
//! use fleetgate_auth::identity::PrivateKey;
//!
//! let key = PrivateKey::generate();
//! let der = key.to_pkcs8_der();
//! let restored = PrivateKey::from_pkcs8_der(&der).unwrap();
//! assert_eq!(key.public_key(), restored.public_key());
//! ```

mod keys;

pub use keys::{KeyError, PrivateKey, PublicKey, SecretBytes};
