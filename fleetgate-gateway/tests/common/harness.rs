//! Test harness for admission E2E tests.
//!
//! Uses tonic's pattern of passing server directly to client (no network).

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use fleetgate_auth::{EphemeralExchange, Keyring, Pin, Side};
use fleetgate_gateway::admission::AdmissionCoordinator;
use fleetgate_gateway::audit::MemoryAuditSink;
use fleetgate_gateway::db;
use fleetgate_gateway::reaper::{LeaseReaper, ReaperConfig};
use fleetgate_gateway::services::{
    BootstrapService, JoinRateLimiter, ManagementService, RateLimitInterceptor,
};
use fleetgate_gateway::shutdown::{self, ShutdownTrigger};
use fleetgate_gateway::store::{ClusterRegistry, TokenStore, TokenStoreConfig};
use fleetgate_gateway::tls::{CertParams, GatewayIdentity};
use fleetgate_proto::bootstrap::v1::bootstrap_client::BootstrapClient;
use fleetgate_proto::bootstrap::v1::bootstrap_server::BootstrapServer;
use fleetgate_proto::bootstrap::v1::JoinRequest;
use fleetgate_proto::management::v1::management_client::ManagementClient;
use fleetgate_proto::management::v1::management_server::ManagementServer;
use fleetgate_proto::management::v1::{
    BootstrapToken, CreateBootstrapTokenRequest, GetBootstrapTokenRequest,
};
use tonic::service::interceptor::InterceptedService;

pub type TestManagementClient = ManagementClient<ManagementServer<ManagementService>>;
pub type TestBootstrapClient =
    BootstrapClient<InterceptedService<BootstrapServer<BootstrapService>, RateLimitInterceptor>>;

/// Gateway whose services are driven in-process.
///
/// The lease reaper runs in the background until the gateway is dropped.
pub struct TestGateway {
    pub tokens: Arc<TokenStore>,
    pub clusters: Arc<ClusterRegistry>,
    pub coordinator: Arc<AdmissionCoordinator>,
    pub identity: Arc<GatewayIdentity>,
    pub audit: Arc<MemoryAuditSink>,
    limiter: JoinRateLimiter,
    _shutdown: ShutdownTrigger,
}

impl TestGateway {
    pub async fn new() -> Self {
        let pool = db::open_in_memory()
            .await
            .expect("Failed to create in-memory database");
        let tokens = Arc::new(
            TokenStore::new(pool.clone(), TokenStoreConfig::default())
                .await
                .expect("Failed to create token store"),
        );
        let clusters = Arc::new(
            ClusterRegistry::new(pool)
                .await
                .expect("Failed to create cluster registry"),
        );
        let identity = Arc::new(
            GatewayIdentity::generate(
                &fleetgate_auth::PrivateKey::generate(),
                &fleetgate_auth::PrivateKey::generate(),
                &CertParams::default(),
            )
            .expect("Failed to build gateway identity"),
        );
        let audit = Arc::new(MemoryAuditSink::new());
        let coordinator = Arc::new(AdmissionCoordinator::new(
            tokens.clone(),
            clusters.clone(),
            identity.pinned_keys(),
            audit.clone(),
        ));

        let (trigger, shutdown) = shutdown::channel();
        LeaseReaper::new(
            tokens.clone(),
            audit.clone(),
            ReaperConfig {
                interval: Duration::from_millis(50),
                grace_period: chrono::Duration::minutes(5),
            },
        )
        .spawn(shutdown);

        Self {
            tokens,
            clusters,
            coordinator,
            identity,
            audit,
            limiter: JoinRateLimiter::new(1_000, 1_000),
            _shutdown: trigger,
        }
    }

    pub fn management(&self) -> TestManagementClient {
        let service = ManagementService::new(
            self.tokens.clone(),
            self.clusters.clone(),
            self.coordinator.clone(),
            self.identity.clone(),
            self.audit.clone(),
        );
        ManagementClient::new(ManagementServer::new(service))
    }

    pub fn bootstrap(&self) -> TestBootstrapClient {
        let service = BootstrapService::new(self.coordinator.clone());
        BootstrapClient::new(BootstrapServer::with_interceptor(
            service,
            RateLimitInterceptor::new(self.limiter.clone()),
        ))
    }

    /// Create a token through the management API; returns `(id, secret)`.
    pub async fn create_token(&self, ttl: Duration, labels: &[(&str, &str)]) -> (String, String) {
        let resp = self
            .management()
            .create_bootstrap_token(CreateBootstrapTokenRequest {
                ttl_millis: ttl.as_millis() as i64,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<HashMap<_, _>>(),
            })
            .await
            .expect("Failed to create token")
            .into_inner();
        let token = resp.token.expect("response carries token");
        (token.id, resp.secret)
    }

    pub async fn get_token(&self, id: &str) -> Result<BootstrapToken, tonic::Status> {
        self.management()
            .get_bootstrap_token(GetBootstrapTokenRequest { id: id.to_string() })
            .await
            .map(tonic::Response::into_inner)
    }

    /// Usage count as stored, regardless of token state.
    pub async fn usage_count(&self, id: &str) -> u64 {
        let id = fleetgate_core::TokenId::parse(id).expect("valid token id");
        self.tokens
            .inspect_token(&id)
            .await
            .expect("token exists")
            .usage_count
    }

    /// State as stored, including terminal tokens still inside the grace period.
    pub async fn stored_state(&self, id: &str) -> fleetgate_core::TokenState {
        let id = fleetgate_core::TokenId::parse(id).expect("valid token id");
        self.tokens
            .inspect_token(&id)
            .await
            .expect("token exists")
            .state
    }

    pub async fn stored_keyring(&self, cluster_id: &str) -> Option<Keyring> {
        let id = fleetgate_core::ClusterId::new(cluster_id).expect("valid cluster id");
        self.clusters
            .get(&id)
            .await
            .expect("registry query")
            .map(|record| record.keyring)
    }
}

/// Agent side of a join, without the TLS layer.
pub struct TestAgent {
    pub cluster_id: String,
}

impl TestAgent {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }

    /// Join and derive the keyring the gateway should have stored.
    pub async fn join(
        &self,
        client: &mut TestBootstrapClient,
        token_id: &str,
        token_secret: &str,
    ) -> Result<Keyring, tonic::Status> {
        let exchange = EphemeralExchange::generate();
        let resp = client
            .join(JoinRequest {
                token_id: token_id.to_string(),
                token_secret: token_secret.to_string(),
                cluster_id: self.cluster_id.clone(),
                client_public_key: exchange.public_key().to_vec(),
            })
            .await?
            .into_inner();

        let shared_keys = exchange
            .complete(Side::Client, &resp.server_public_key)
            .map_err(|e| tonic::Status::internal(e.to_string()))?;
        let pins = resp
            .pinned_keys
            .iter()
            .map(|p| Pin::parse(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| tonic::Status::internal(e.to_string()))?;
        Ok(Keyring::new(shared_keys, pins))
    }
}
