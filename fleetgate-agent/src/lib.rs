//! Fleetgate agent: joins a cluster to the fleet through a gateway.
//!
//! The agent refuses to send its bootstrap token until the gateway's
//! certificate chain matches a configured pin ([`tls::PinningVerifier`]).
//! On success it derives the cluster keyring locally and stores it.

pub mod bootstrap;
pub mod keyring_store;
pub mod tls;

pub use bootstrap::{BootstrapError, BootstrapRequest, Bootstrapper};
pub use keyring_store::KeyringStore;
