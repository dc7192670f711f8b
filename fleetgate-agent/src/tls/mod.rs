//! TLS configuration for the pinned bootstrap connection.

mod client;

use tonic::transport::Channel;

pub use client::{build_pinned_config, PinningVerifier};

/// Build a TLS channel with the given configuration.
///
/// Converts HTTP addresses to HTTPS and connects eagerly, so a chain that
/// fails pinning is reported here, before any request exists.
pub async fn build_tls_channel(
    addr: &str,
    tls_config: rustls::ClientConfig,
) -> Result<Channel, ChannelError> {
    let tls_addr = if addr.contains("://") {
        addr.replace("http://", "https://")
    } else {
        format!("https://{addr}")
    };
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls_config)
        .https_only()
        .enable_http2()
        .build();
    let channel = Channel::from_shared(tls_addr)?
        .connect_with_connector(https_connector)
        .await?;
    Ok(channel)
}

/// Errors that can occur while opening the bootstrap channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid gateway address: {0}")]
    InvalidAddress(#[from] tonic::codegen::http::uri::InvalidUri),
    #[error("failed to connect via TLS: {0}")]
    Connect(#[from] tonic::transport::Error),
}
