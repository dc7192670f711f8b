//! Bootstrap gRPC service: the agent-facing `Join` endpoint.

use std::sync::Arc;

use fleetgate_proto::bootstrap::v1::bootstrap_server::Bootstrap;
use fleetgate_proto::bootstrap::v1::{JoinRequest, JoinResponse};
use tonic::{Request, Response, Status};

use crate::admission::{AdmissionCoordinator, AdmissionError, AdmissionRequest};
use crate::tls::TlsConnectInfo;

/// Implementation of the Bootstrap gRPC service.
#[derive(Clone)]
pub struct BootstrapService {
    coordinator: Arc<AdmissionCoordinator>,
}

impl BootstrapService {
    pub fn new(coordinator: Arc<AdmissionCoordinator>) -> Self {
        Self { coordinator }
    }
}

/// Map an admission failure to the status the agent sees.
///
/// Token failures share one message so callers cannot tell which check failed.
pub(crate) fn admission_status(e: AdmissionError) -> Status {
    match e {
        AdmissionError::InvalidArgument(detail) => Status::invalid_argument(detail),
        AdmissionError::TokenInvalid => Status::permission_denied("bootstrap token rejected"),
        AdmissionError::ClusterConflict(id) => {
            Status::already_exists(format!("cluster {id} is already registered"))
        }
        // Logged by the coordinator
        AdmissionError::Internal(_) => Status::internal("internal error"),
    }
}

#[tonic::async_trait]
impl Bootstrap for BootstrapService {
    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let peer = request
            .extensions()
            .get::<TlsConnectInfo>()
            .and_then(|info| info.remote_addr);
        let req = request.into_inner();
        tracing::debug!(?peer, cluster_id = %req.cluster_id, "Join request");

        let admission = self
            .coordinator
            .admit(AdmissionRequest {
                token_id: req.token_id,
                token_secret: req.token_secret,
                cluster_id: req.cluster_id,
                client_public_key: req.client_public_key,
            })
            .await
            .map_err(admission_status)?;

        Ok(Response::new(JoinResponse {
            server_public_key: admission.server_public_key.to_vec(),
            pinned_keys: admission
                .pinned_keys
                .iter()
                .map(ToString::to_string)
                .collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_core::ClusterId;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                AdmissionError::InvalidArgument("bad".into()),
                tonic::Code::InvalidArgument,
            ),
            (AdmissionError::TokenInvalid, tonic::Code::PermissionDenied),
            (
                AdmissionError::ClusterConflict(ClusterId::new("edge-1").unwrap()),
                tonic::Code::AlreadyExists,
            ),
            (
                AdmissionError::Internal("disk on fire".into()),
                tonic::Code::Internal,
            ),
        ];

        for (error, code) in cases {
            let status = admission_status(error);
            assert_eq!(status.code(), code);
            assert!(!status.message().contains("disk"));
        }
    }
}
