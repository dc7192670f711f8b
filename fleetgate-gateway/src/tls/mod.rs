//! TLS for the bootstrap listener.
//!
//! Provides the gateway certificate chain, the rustls server configuration,
//! and the stream wrapper tonic serves over.

mod cert;
mod connect_info;
mod io;
mod server;

pub use cert::{CertError, CertParams, ChainEntry, GatewayIdentity};
pub use connect_info::TlsConnectInfo;
pub use io::TlsConnection;
pub use server::{server_config, TlsConfigError};
