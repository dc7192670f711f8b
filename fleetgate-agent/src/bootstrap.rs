//! Agent side of the admission flow.
//!
//! 1. Open a TLS channel that only completes if the gateway chain is pinned
//! 2. Send the token, the desired cluster id and an ephemeral X25519 key
//! 3. Derive the keyring from the gateway's half of the exchange
//!
//! Each attempt walks the admission [`Stage`]s; a failure exits with the
//! matching [`Rejection`]. A failed attempt is final; callers decide whether
//! to try again.

use fleetgate_auth::{BootstrapCredential, EphemeralExchange, Keyring, Pin, Side, TrustAnchors, TrustError};
use fleetgate_core::{ClusterId, Progress, Rejection, Stage};
use fleetgate_proto::bootstrap::v1::bootstrap_client::BootstrapClient;
use fleetgate_proto::bootstrap::v1::JoinRequest;
use tonic::Code;

use crate::tls::{build_pinned_config, build_tls_channel, PinningVerifier};

/// What to join as.
pub struct BootstrapRequest {
    pub credential: BootstrapCredential,
    pub cluster_id: ClusterId,
}

impl std::fmt::Debug for BootstrapRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapRequest")
            .field("token_id", &self.credential.id())
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

/// Joins clusters through one gateway.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    gateway_addr: String,
    anchors: TrustAnchors,
}

impl Bootstrapper {
    /// `anchors` must hold at least one pin of the gateway chain.
    pub fn new(gateway_addr: impl Into<String>, anchors: TrustAnchors) -> Result<Self, BootstrapError> {
        if anchors.is_empty() {
            return Err(BootstrapError::TrustFailed(TrustError::NoAnchors));
        }
        Ok(Self {
            gateway_addr: gateway_addr.into(),
            anchors,
        })
    }

    /// Run one admission attempt.
    pub async fn join(&self, request: &BootstrapRequest) -> Result<Keyring, BootstrapError> {
        let mut progress = Progress::new();
        let result = self.run(request, &mut progress).await;
        if let Err(e) = &result {
            match e.rejection() {
                Some(rejection) => {
                    let reason = progress.reject(rejection);
                    tracing::warn!(
                        stage = progress.stage().as_str(),
                        reason = reason.as_str(),
                        error = %e,
                        "Bootstrap rejected"
                    );
                }
                None => tracing::warn!(error = %e, "Bootstrap attempt failed"),
            }
        }
        result
    }

    async fn run(
        &self,
        request: &BootstrapRequest,
        progress: &mut Progress,
    ) -> Result<Keyring, BootstrapError> {
        let verifier = PinningVerifier::new(self.anchors.clone());
        let tls_config = build_pinned_config(verifier.clone())
            .map_err(|e| BootstrapError::Internal(e.to_string()))?;

        let channel = match build_tls_channel(&self.gateway_addr, tls_config).await {
            Ok(channel) => channel,
            Err(e) => {
                // The token has not left the process
                return Err(match verifier.take_failure() {
                    Some(trust) => BootstrapError::TrustFailed(trust),
                    None => BootstrapError::Transport(e.to_string()),
                });
            }
        };
        advance(progress, Stage::TrustEstablished)?;
        tracing::debug!(gateway = %self.gateway_addr, "Gateway chain pinned, sending join");

        let exchange = EphemeralExchange::generate();
        let response = BootstrapClient::new(channel)
            .join(JoinRequest {
                token_id: request.credential.id().to_string(),
                token_secret: request.credential.secret().to_string(),
                cluster_id: request.cluster_id.to_string(),
                client_public_key: exchange.public_key().to_vec(),
            })
            .await
            .map_err(|status| BootstrapError::from_status(status, &request.cluster_id))?
            .into_inner();
        // The gateway validated the token and reserved the id before answering
        advance(progress, Stage::TokenValidated)?;
        advance(progress, Stage::ClusterReserved)?;

        let shared_keys = exchange
            .complete(Side::Client, &response.server_public_key)
            .map_err(|e| BootstrapError::Internal(format!("gateway key exchange: {e}")))?;
        let pinned_keys = response
            .pinned_keys
            .iter()
            .map(|p| Pin::parse(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| BootstrapError::Internal(format!("gateway pins: {e}")))?;

        let keyring = Keyring::new(shared_keys, pinned_keys);
        advance(progress, Stage::KeyringIssued)?;
        tracing::info!(
            cluster_id = %request.cluster_id,
            key_id = %keyring.key_id(),
            "Cluster admitted"
        );
        Ok(keyring)
    }
}

fn advance(progress: &mut Progress, to: Stage) -> Result<(), BootstrapError> {
    progress
        .advance(to)
        .map_err(|e| BootstrapError::Internal(e.to_string()))
}

/// Errors that can occur during bootstrap.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BootstrapError {
    /// The gateway chain did not match any pin; nothing was sent.
    #[error("gateway is not trusted: {0}")]
    TrustFailed(TrustError),
    #[error("bootstrap token rejected")]
    TokenInvalid,
    #[error("cluster {0} is already registered")]
    ClusterConflict(ClusterId),
    #[error("invalid request: {0}")]
    InvalidArgument(String),
    #[error("gateway unreachable: {0}")]
    Transport(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl BootstrapError {
    /// The admission failure exit this error represents.
    ///
    /// Transport failures are not an admission outcome and map to `None`.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::TrustFailed(_) => Some(Rejection::TrustFailed),
            Self::TokenInvalid => Some(Rejection::TokenInvalid),
            Self::ClusterConflict(_) => Some(Rejection::ClusterConflict),
            Self::InvalidArgument(_) => Some(Rejection::InvalidArgument),
            Self::Internal(_) => Some(Rejection::Internal),
            Self::Transport(_) => None,
        }
    }

    fn from_status(status: tonic::Status, cluster_id: &ClusterId) -> Self {
        match status.code() {
            Code::PermissionDenied | Code::Unauthenticated | Code::NotFound => Self::TokenInvalid,
            Code::AlreadyExists => Self::ClusterConflict(cluster_id.clone()),
            Code::InvalidArgument => Self::InvalidArgument(status.message().to_string()),
            Code::Unavailable | Code::ResourceExhausted | Code::DeadlineExceeded => {
                Self::Transport(status.message().to_string())
            }
            _ => Self::Internal(status.message().to_string()),
        }
    }
}
