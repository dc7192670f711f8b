//! Per-connection info for bootstrap handlers.

use std::net::SocketAddr;

/// Connection info extracted from TLS streams.
///
/// Available via `request.extensions()` in gRPC handlers, so rejections can
/// be logged with the peer that caused them.
#[derive(Debug, Clone)]
pub struct TlsConnectInfo {
    pub remote_addr: Option<SocketAddr>,
    /// Negotiated ALPN protocol, if any
    pub alpn: Option<Vec<u8>>,
}

impl TlsConnectInfo {
    pub fn new(remote_addr: Option<SocketAddr>, alpn: Option<Vec<u8>>) -> Self {
        Self { remote_addr, alpn }
    }
}
