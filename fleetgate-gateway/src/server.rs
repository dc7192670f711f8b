//! Listeners for the two gRPC surfaces.
//!
//! - The bootstrap listener speaks TLS with server auth only and serves `Join`
//!   behind the rate limiter.
//! - The management listener is plaintext and meant for loopback; it carries
//!   the operator API and gRPC reflection.

use fleetgate_proto::bootstrap::v1::bootstrap_server::BootstrapServer;
use fleetgate_proto::management::v1::management_server::ManagementServer;
use fleetgate_proto::FILE_DESCRIPTOR_SET;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

use crate::services::{BootstrapService, JoinRateLimiter, ManagementService, RateLimitInterceptor};
use crate::shutdown::Shutdown;
use crate::tls::{self, GatewayIdentity, TlsConnection};

/// TLS handshake timeout to prevent slow-loris style attacks.
/// Connections that don't complete the handshake within this time are dropped.
pub const TLS_HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Serve the bootstrap endpoint on `listener` until `shutdown` fires.
pub async fn serve_bootstrap(
    listener: TcpListener,
    identity: &GatewayIdentity,
    service: BootstrapService,
    limiter: JoinRateLimiter,
    shutdown: Shutdown,
) -> Result<(), ServeError> {
    let acceptor = TlsAcceptor::from(tls::server_config(identity)?);
    let local_addr = listener.local_addr().ok();
    tracing::info!(addr = ?local_addr, "Bootstrap listener ready (TLS)");

    let mut accept_shutdown = shutdown.clone();
    let incoming = async_stream::stream! {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, peer_addr)) => {
                            match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(tcp_stream)).await {
                                Ok(Ok(tls_stream)) => {
                                    tracing::debug!(peer = %peer_addr, "TLS handshake successful");
                                    yield Ok::<_, std::io::Error>(TlsConnection::new(tls_stream, Some(peer_addr)));
                                }
                                Ok(Err(e)) => {
                                    // Agents that reject our pins abort here
                                    tracing::debug!(peer = %peer_addr, error = %e, "TLS handshake failed");
                                }
                                Err(_) => {
                                    tracing::warn!(peer = %peer_addr, timeout_secs = ?TLS_HANDSHAKE_TIMEOUT, "TLS handshake timed out");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "TCP accept failed");
                        }
                    }
                }
                _ = accept_shutdown.wait() => {
                    tracing::info!("Shutdown signal received, stopping bootstrap accept loop");
                    break;
                }
            }
        }
    };

    let mut shutdown = shutdown;
    Server::builder()
        .add_service(BootstrapServer::with_interceptor(
            service,
            RateLimitInterceptor::new(limiter),
        ))
        .serve_with_incoming_shutdown(incoming, async move { shutdown.wait().await })
        .await?;

    tracing::info!("Bootstrap listener stopped");
    Ok(())
}

/// Serve the management API on `listener` until `shutdown` fires.
pub async fn serve_management(
    listener: TcpListener,
    service: ManagementService,
    mut shutdown: Shutdown,
) -> Result<(), ServeError> {
    let local_addr = listener.local_addr().ok();
    if let Some(addr) = local_addr {
        if !addr.ip().is_loopback() {
            tracing::warn!(%addr, "Management listener is not on loopback; it has no authentication");
        }
    }
    tracing::info!(addr = ?local_addr, "Management listener ready");

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    Server::builder()
        .add_service(reflection)
        .add_service(ManagementServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            shutdown.wait().await
        })
        .await?;

    tracing::info!("Management listener stopped");
    Ok(())
}

/// Errors that stop a listener.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("TLS configuration: {0}")]
    Tls(#[from] tls::TlsConfigError),
    #[error("reflection service: {0}")]
    Reflection(#[from] tonic_reflection::server::Error),
    #[error("transport: {0}")]
    Transport(#[from] tonic::transport::Error),
}
