//! Admission coordinator: turns a valid token and a free cluster id into a keyring.
//!
//! Each attempt walks the [`Stage`] machine. Reaching `TrustEstablished` is
//! implicit on the gateway: requests only arrive over the bootstrap listener,
//! and agents refuse to send a token before pinning its chain.
//!
//! The usage increment and the cluster insert commit in one SQLite
//! transaction, increment first. Any failure after `BEGIN` (including the
//! request future being dropped) rolls both back, so usage counts and cluster
//! records never drift apart.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fleetgate_auth::{EphemeralExchange, Keyring, KeyringError, Pin, Side};
use fleetgate_core::{
    AuditAction, AuditEvent, AuditTarget, BootstrapToken, ClusterId, ClusterRecord,
    ClusterSummary, Progress, Rejection, Stage, TokenId,
};
use tracing::Instrument;

use crate::audit::AuditSink;
use crate::store::{stored_now, ClusterRegistry, RegistryError, TokenStore, TokenStoreError};

/// What an agent sends to join.
#[derive(Clone)]
pub struct AdmissionRequest {
    pub token_id: String,
    pub token_secret: String,
    pub cluster_id: String,
    /// Agent's ephemeral X25519 public key.
    pub client_public_key: Vec<u8>,
}

impl std::fmt::Debug for AdmissionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionRequest")
            .field("token_id", &self.token_id)
            .field("token_secret", &"<redacted>")
            .field("cluster_id", &self.cluster_id)
            .finish()
    }
}

/// A completed admission.
#[derive(Debug, Clone)]
pub struct Admission {
    pub cluster: ClusterSummary,
    /// Token usage after this admission.
    pub usage_count: u64,
    /// Gateway's half of the exchange; the agent derives the same keyring from it.
    pub server_public_key: [u8; 32],
    pub pinned_keys: Vec<Pin>,
    pub key_id: String,
}

/// Errors that end an admission attempt.
///
/// Token failures are deliberately collapsed into one variant.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum AdmissionError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("bootstrap token rejected")]
    TokenInvalid,
    #[error("cluster {0} is already registered")]
    ClusterConflict(ClusterId),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    pub fn rejection(&self) -> Rejection {
        match self {
            Self::InvalidArgument(_) => Rejection::InvalidArgument,
            Self::TokenInvalid => Rejection::TokenInvalid,
            Self::ClusterConflict(_) => Rejection::ClusterConflict,
            Self::Internal(_) => Rejection::Internal,
        }
    }
}

impl From<sqlx::Error> for AdmissionError {
    fn from(e: sqlx::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<RegistryError> for AdmissionError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Conflict(id) => Self::ClusterConflict(id),
            other => Self::Internal(other.to_string()),
        }
    }
}

fn token_rejected(e: TokenStoreError) -> AdmissionError {
    match e {
        TokenStoreError::NotFound
        | TokenStoreError::Expired
        | TokenStoreError::Revoked
        | TokenStoreError::InvalidSecret => {
            tracing::debug!(reason = %e, "Token check failed");
            AdmissionError::TokenInvalid
        }
        other => AdmissionError::Internal(other.to_string()),
    }
}

/// In-process claims on cluster ids that are mid-admission.
///
/// Concurrent attempts for one id are settled here before either touches
/// the database. The primary key on `clusters` still backs this up across
/// processes sharing a database.
#[derive(Clone, Default)]
pub struct ClusterReservations {
    inner: Arc<DashMap<ClusterId, ()>>,
}

impl ClusterReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id`, or `None` if another attempt holds it.
    pub fn try_reserve(&self, id: &ClusterId) -> Option<Reservation> {
        // Entry API keeps check-and-insert atomic
        match self.inner.entry(id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(entry) => {
                entry.insert(());
                Some(Reservation {
                    map: self.inner.clone(),
                    id: id.clone(),
                })
            }
        }
    }

    pub fn is_reserved(&self, id: &ClusterId) -> bool {
        self.inner.contains_key(id)
    }
}

/// Released on drop.
pub struct Reservation {
    map: Arc<DashMap<ClusterId, ()>>,
    id: ClusterId,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

/// Orchestrates token validation, cluster reservation and keyring issuance.
pub struct AdmissionCoordinator {
    tokens: Arc<TokenStore>,
    clusters: Arc<ClusterRegistry>,
    reservations: ClusterReservations,
    /// Pins of the gateway chain, handed to every admitted agent.
    pinned_keys: Vec<Pin>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionCoordinator {
    /// `tokens` and `clusters` must share one pool so they can commit together.
    pub fn new(
        tokens: Arc<TokenStore>,
        clusters: Arc<ClusterRegistry>,
        pinned_keys: Vec<Pin>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tokens,
            clusters,
            reservations: ClusterReservations::new(),
            pinned_keys,
            audit,
        }
    }

    pub fn pinned_keys(&self) -> &[Pin] {
        &self.pinned_keys
    }

    /// Run one admission attempt.
    pub async fn admit(&self, request: AdmissionRequest) -> Result<Admission, AdmissionError> {
        let span = tracing::info_span!(
            "admission",
            cluster_id = %request.cluster_id,
            token_id = %request.token_id,
        );

        async {
            let mut progress = Progress::new();
            let result = self.run(&request, &mut progress).await;
            match &result {
                Ok(admission) => self.admitted(&request, admission),
                Err(e) => self.rejected(&request, &mut progress, e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request: &AdmissionRequest,
        progress: &mut Progress,
    ) -> Result<Admission, AdmissionError> {
        advance(progress, Stage::TrustEstablished)?;

        let cluster_id = ClusterId::new(request.cluster_id.as_str())
            .map_err(|e| AdmissionError::InvalidArgument(e.to_string()))?;
        if request.client_public_key.len() != 32 {
            return Err(AdmissionError::InvalidArgument(
                "client public key must be 32 bytes".to_string(),
            ));
        }
        let token_id = TokenId::parse(&request.token_id).map_err(|_| AdmissionError::TokenInvalid)?;

        let token = self
            .tokens
            .authenticate(&token_id, &request.token_secret)
            .await
            .map_err(token_rejected)?;
        advance(progress, Stage::TokenValidated)?;

        let _reservation = self
            .reservations
            .try_reserve(&cluster_id)
            .ok_or_else(|| AdmissionError::ClusterConflict(cluster_id.clone()))?;
        if self.clusters.exists(&cluster_id).await? {
            return Err(AdmissionError::ClusterConflict(cluster_id));
        }
        advance(progress, Stage::ClusterReserved)?;

        let exchange = EphemeralExchange::generate();
        let server_public_key = exchange.public_key();
        let shared_keys = exchange
            .complete(Side::Server, &request.client_public_key)
            .map_err(|e| match e {
                KeyringError::InvalidPublicKey(_) | KeyringError::NonContributory => {
                    AdmissionError::InvalidArgument(e.to_string())
                }
                other => AdmissionError::Internal(other.to_string()),
            })?;
        let record = ClusterRecord {
            id: cluster_id,
            labels: token.labels.clone(),
            keyring: Keyring::new(shared_keys, self.pinned_keys.clone()),
            registered_at: stored_now(),
        };

        let updated = self.commit(&token_id, &record).await?;
        advance(progress, Stage::KeyringIssued)?;

        Ok(Admission {
            cluster: record.summary(),
            usage_count: updated.usage_count,
            server_public_key,
            pinned_keys: record.keyring.pinned_keys.clone(),
            key_id: record.keyring.key_id(),
        })
    }

    async fn commit(
        &self,
        token_id: &TokenId,
        record: &ClusterRecord,
    ) -> Result<BootstrapToken, AdmissionError> {
        let mut tx = self.tokens.pool().begin().await?;

        let token = self
            .tokens
            .increment_usage_in(&mut *tx, token_id)
            .await
            .map_err(token_rejected)?;
        self.clusters.register_in(&mut *tx, record, token_id).await?;

        tx.commit().await?;
        Ok(token)
    }

    /// Administrative keyring deletion; the id may be admitted again afterwards.
    pub async fn remove_cluster(&self, id: &ClusterId) -> Result<(), RegistryError> {
        self.clusters.delete(id).await?;
        self.audit.record(AuditEvent::new(
            AuditAction::ClusterRemoved,
            AuditTarget::Cluster(id.clone()),
        ));
        Ok(())
    }

    fn admitted(&self, request: &AdmissionRequest, admission: &Admission) {
        tracing::info!(
            usage_count = admission.usage_count,
            key_id = %admission.key_id,
            "Cluster admitted"
        );
        self.audit.record(
            AuditEvent::new(
                AuditAction::ClusterAdmitted,
                AuditTarget::Cluster(admission.cluster.id.clone()),
            )
            .with_metadata("token_id", request.token_id.as_str())
            .with_metadata("key_id", admission.key_id.as_str()),
        );
    }

    fn rejected(&self, request: &AdmissionRequest, progress: &mut Progress, error: &AdmissionError) {
        let reason = progress.reject(error.rejection());
        let stage = progress.stage();

        match error {
            AdmissionError::Internal(detail) => {
                tracing::error!(stage = stage.as_str(), error = %detail, "Admission failed");
            }
            _ => {
                tracing::warn!(stage = stage.as_str(), reason = reason.as_str(), "Admission rejected");
            }
        }

        let target = ClusterId::new(request.cluster_id.as_str())
            .map(AuditTarget::Cluster)
            .or_else(|_| TokenId::parse(&request.token_id).map(AuditTarget::Token));
        if let Ok(target) = target {
            self.audit.record(
                AuditEvent::new(AuditAction::AdmissionRejected, target)
                    .with_metadata("stage", stage.as_str())
                    .with_metadata("reason", reason.as_str()),
            );
        }
    }
}

fn advance(progress: &mut Progress, to: Stage) -> Result<(), AdmissionError> {
    progress
        .advance(to)
        .map_err(|e| AdmissionError::Internal(e.to_string()))?;
    tracing::debug!(stage = to.as_str(), "Admission stage reached");
    Ok(())
}
