//! Trust primitives for fleet agent bootstrap.
//!
//! This crate is intentionally IO-free:
//! - No filesystem operations
//! - No network calls
//! - No database interactions
//! - No logging
//!
//! It provides the pieces both sides of a bootstrap handshake agree on:
//! - [`identity`] - Ed25519 keys backing the gateway's TLS chain
//! - [`pkp`] - Public-key pinning over presented certificate chains
//! - [`credential`] - The `id.secret` bootstrap credential format
//! - [`keyring`] - X25519 exchange and keyring derivation
//!
//! # Example
//!
//! ```ignore
//! use fleetgate_auth::pkp::{verify_chain, TrustAnchors};
//!
//! let anchors = TrustAnchors::parse(["sha256:Zm9v..."])?;
//! let matched = verify_chain(&presented_chain, &anchors)?;
//! ```

pub mod cert;
pub mod credential;
pub mod identity;
pub mod keyring;
pub mod pkp;

pub use cert::{CertError, CertSummary};
pub use credential::{BootstrapCredential, CredentialError};
pub use identity::{KeyError, PrivateKey, PublicKey};
pub use keyring::{EphemeralExchange, Keyring, KeyringError, SharedKeys, Side};
pub use pkp::{verify_chain, HashAlgorithm, Pin, PinError, PinMatch, TrustAnchors, TrustError};
