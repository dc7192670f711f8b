//! Management gRPC service: the operator surface for tokens and clusters.
//!
//! Served only on the loopback management listener.

use std::sync::Arc;

use chrono::{Duration, Utc};
use fleetgate_core::{AuditAction, AuditEvent, AuditTarget, ClusterId, Labels, TokenId};
use fleetgate_proto::management::v1::management_server::Management;
use fleetgate_proto::management::v1::*;
use tonic::{Request, Response, Status};

use crate::admission::AdmissionCoordinator;
use crate::audit::AuditSink;
use crate::convert::{chain_entry_to_proto, cluster_to_proto, token_to_proto};
use crate::store::{ClusterRegistry, RegistryError, TokenStore, TokenStoreError};
use crate::tls::GatewayIdentity;

/// Implementation of the Management gRPC service.
#[derive(Clone)]
pub struct ManagementService {
    tokens: Arc<TokenStore>,
    clusters: Arc<ClusterRegistry>,
    coordinator: Arc<AdmissionCoordinator>,
    identity: Arc<GatewayIdentity>,
    audit: Arc<dyn AuditSink>,
}

impl ManagementService {
    pub fn new(
        tokens: Arc<TokenStore>,
        clusters: Arc<ClusterRegistry>,
        coordinator: Arc<AdmissionCoordinator>,
        identity: Arc<GatewayIdentity>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            tokens,
            clusters,
            coordinator,
            identity,
            audit,
        }
    }
}

/// Parse a token id from a request, rejecting empty and malformed ids up front.
fn parse_token_id(id: &str) -> Result<TokenId, Status> {
    if id.is_empty() {
        return Err(Status::invalid_argument("token id is required"));
    }
    TokenId::parse(id).map_err(|_| Status::invalid_argument("invalid token id format"))
}

fn token_status(e: TokenStoreError) -> Status {
    match e {
        TokenStoreError::InvalidArgument(v) => Status::invalid_argument(v.to_string()),
        TokenStoreError::NotFound | TokenStoreError::Expired | TokenStoreError::Revoked => {
            Status::not_found("bootstrap token not found")
        }
        other => {
            tracing::error!(error = %other, "Token store operation failed");
            Status::internal("internal error")
        }
    }
}

fn registry_status(e: RegistryError) -> Status {
    match e {
        RegistryError::NotFound => Status::not_found("cluster not found"),
        RegistryError::Conflict(id) => Status::already_exists(format!("cluster {id} already exists")),
        other => {
            tracing::error!(error = %other, "Cluster registry operation failed");
            Status::internal("internal error")
        }
    }
}

#[tonic::async_trait]
impl Management for ManagementService {
    async fn create_bootstrap_token(
        &self,
        request: Request<CreateBootstrapTokenRequest>,
    ) -> Result<Response<CreateBootstrapTokenResponse>, Status> {
        let req = request.into_inner();

        if req.ttl_millis <= 0 {
            return Err(Status::invalid_argument("ttl_millis must be positive"));
        }
        let labels =
            Labels::new(req.labels).map_err(|e| Status::invalid_argument(e.to_string()))?;

        let issued = self
            .tokens
            .create_token(Duration::milliseconds(req.ttl_millis), labels)
            .await
            .map_err(token_status)?;

        tracing::info!(
            token_id = %issued.token.id,
            expires_at = %issued.token.lease.expires_at,
            labels = issued.token.labels.len(),
            "Bootstrap token created"
        );
        self.audit.record(
            AuditEvent::new(
                AuditAction::TokenCreated,
                AuditTarget::Token(issued.token.id.clone()),
            )
            .with_metadata("ttl_ms", req.ttl_millis.to_string()),
        );

        Ok(Response::new(CreateBootstrapTokenResponse {
            token: Some(token_to_proto(&issued.token, Utc::now())),
            secret: issued.credential.secret().to_string(),
            credential: issued.credential.expose().to_string(),
        }))
    }

    async fn revoke_bootstrap_token(
        &self,
        request: Request<RevokeBootstrapTokenRequest>,
    ) -> Result<Response<RevokeBootstrapTokenResponse>, Status> {
        let id = parse_token_id(&request.into_inner().id)?;

        let transitioned = self.tokens.delete_token(&id).await.map_err(token_status)?;
        if transitioned {
            tracing::info!(token_id = %id, "Bootstrap token revoked");
            self.audit.record(AuditEvent::new(
                AuditAction::TokenRevoked,
                AuditTarget::Token(id),
            ));
        } else {
            tracing::debug!(token_id = %id, "Revoke of already-ended token");
        }

        Ok(Response::new(RevokeBootstrapTokenResponse {}))
    }

    async fn get_bootstrap_token(
        &self,
        request: Request<GetBootstrapTokenRequest>,
    ) -> Result<Response<BootstrapToken>, Status> {
        let id = parse_token_id(&request.into_inner().id)?;
        let token = self.tokens.get_token(&id).await.map_err(token_status)?;
        Ok(Response::new(token_to_proto(&token, Utc::now())))
    }

    async fn list_bootstrap_tokens(
        &self,
        _request: Request<ListBootstrapTokensRequest>,
    ) -> Result<Response<ListBootstrapTokensResponse>, Status> {
        let now = Utc::now();
        let tokens = self.tokens.list_tokens().await.map_err(token_status)?;
        Ok(Response::new(ListBootstrapTokensResponse {
            tokens: tokens.iter().map(|t| token_to_proto(t, now)).collect(),
        }))
    }

    async fn certs_info(
        &self,
        _request: Request<CertsInfoRequest>,
    ) -> Result<Response<CertsInfoResponse>, Status> {
        Ok(Response::new(CertsInfoResponse {
            chain: self
                .identity
                .entries()
                .iter()
                .map(chain_entry_to_proto)
                .collect(),
        }))
    }

    async fn list_clusters(
        &self,
        _request: Request<ListClustersRequest>,
    ) -> Result<Response<ListClustersResponse>, Status> {
        let clusters = self.clusters.list().await.map_err(registry_status)?;
        Ok(Response::new(ListClustersResponse {
            clusters: clusters.iter().map(cluster_to_proto).collect(),
        }))
    }

    async fn delete_cluster(
        &self,
        request: Request<DeleteClusterRequest>,
    ) -> Result<Response<DeleteClusterResponse>, Status> {
        let id = ClusterId::new(request.into_inner().id)
            .map_err(|e| Status::invalid_argument(e.to_string()))?;
        self.coordinator
            .remove_cluster(&id)
            .await
            .map_err(registry_status)?;
        Ok(Response::new(DeleteClusterResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::TokenStoreConfig;
    use crate::tls::CertParams;
    use fleetgate_auth::PrivateKey;
    use std::collections::HashMap;

    async fn service() -> (ManagementService, Arc<MemoryAuditSink>) {
        let pool = crate::db::open_in_memory().await.unwrap();
        let tokens = Arc::new(
            TokenStore::new(pool.clone(), TokenStoreConfig::default())
                .await
                .unwrap(),
        );
        let clusters = Arc::new(ClusterRegistry::new(pool).await.unwrap());
        let identity = Arc::new(
            GatewayIdentity::generate(
                &PrivateKey::generate(),
                &PrivateKey::generate(),
                &CertParams::default(),
            )
            .unwrap(),
        );
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator = Arc::new(AdmissionCoordinator::new(
            tokens.clone(),
            clusters.clone(),
            identity.pinned_keys(),
            audit.clone(),
        ));
        let svc = ManagementService::new(tokens, clusters, coordinator, identity, audit.clone());
        (svc, audit)
    }

    fn create_request(ttl_millis: i64) -> Request<CreateBootstrapTokenRequest> {
        Request::new(CreateBootstrapTokenRequest {
            ttl_millis,
            labels: HashMap::from([("env".to_string(), "prod".to_string())]),
        })
    }

    #[tokio::test]
    async fn test_create_returns_credential_once() {
        let (svc, audit) = service().await;

        let resp = svc
            .create_bootstrap_token(create_request(60_000))
            .await
            .unwrap()
            .into_inner();
        let token = resp.token.unwrap();

        assert_eq!(token.usage_count, 0);
        assert_eq!(token.state, TokenState::Active as i32);
        assert_eq!(resp.credential, format!("{}.{}", token.id, resp.secret));

        let fetched = svc
            .get_bootstrap_token(Request::new(GetBootstrapTokenRequest { id: token.id }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(fetched.labels.get("env").map(String::as_str), Some("prod"));
        assert_eq!(audit.events()[0].action, AuditAction::TokenCreated);
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let (svc, _) = service().await;

        for ttl in [0, -5] {
            let err = svc.create_bootstrap_token(create_request(ttl)).await.unwrap_err();
            assert_eq!(err.code(), tonic::Code::InvalidArgument);
        }

        let too_long = 31 * 24 * 60 * 60 * 1000;
        let err = svc
            .create_bootstrap_token(create_request(too_long))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let bad_labels = Request::new(CreateBootstrapTokenRequest {
            ttl_millis: 60_000,
            labels: HashMap::from([("".to_string(), "x".to_string())]),
        });
        let err = svc.create_bootstrap_token(bad_labels).await.unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent_and_hides_token() {
        let (svc, audit) = service().await;
        let id = svc
            .create_bootstrap_token(create_request(60_000))
            .await
            .unwrap()
            .into_inner()
            .token
            .unwrap()
            .id;

        for _ in 0..2 {
            svc.revoke_bootstrap_token(Request::new(RevokeBootstrapTokenRequest {
                id: id.clone(),
            }))
            .await
            .unwrap();
        }

        let err = svc
            .get_bootstrap_token(Request::new(GetBootstrapTokenRequest { id: id.clone() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let revocations = audit
            .events()
            .into_iter()
            .filter(|e| e.action == AuditAction::TokenRevoked)
            .count();
        assert_eq!(revocations, 1);

        let listed = svc
            .list_bootstrap_tokens(Request::new(ListBootstrapTokensRequest {}))
            .await
            .unwrap()
            .into_inner()
            .tokens;
        assert!(listed.is_empty());

        let stored = svc
            .tokens
            .inspect_token(&TokenId::parse(&id).unwrap())
            .await
            .unwrap();
        assert_eq!(stored.state, fleetgate_core::TokenState::Revoked);
    }

    #[tokio::test]
    async fn test_id_validation() {
        let (svc, _) = service().await;

        let err = svc
            .get_bootstrap_token(Request::new(GetBootstrapTokenRequest { id: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let err = svc
            .revoke_bootstrap_token(Request::new(RevokeBootstrapTokenRequest {
                id: "ffffffffffff".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_certs_info_lists_chain() {
        let (svc, _) = service().await;

        let chain = svc
            .certs_info(Request::new(CertsInfoRequest {}))
            .await
            .unwrap()
            .into_inner()
            .chain;

        assert_eq!(chain.len(), 2);
        assert!(!chain[0].is_ca);
        assert!(chain[1].is_ca);
        assert!(chain[0].pins.iter().any(|p| p.starts_with("sha256:")));
    }

    #[tokio::test]
    async fn test_delete_unknown_cluster() {
        let (svc, _) = service().await;

        let err = svc
            .delete_cluster(Request::new(DeleteClusterRequest {
                id: "edge-1".to_string(),
            }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::NotFound);

        let err = svc
            .delete_cluster(Request::new(DeleteClusterRequest { id: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);
    }
}
