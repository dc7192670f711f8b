//! Type conversions between core types and protobuf types.
//!
//! Due to Rust's orphan rules, we can't implement From traits between
//! types from different crates. Instead, we provide conversion functions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use fleetgate_core::{BootstrapToken, ClusterSummary, Labels, TokenState};
use fleetgate_proto::management::v1::{
    BootstrapToken as ProtoToken, CertInfo, Cluster as ProtoCluster,
    TokenState as ProtoTokenState,
};

use crate::tls::ChainEntry;

/// Convert a token to its operator view as observed at `now`.
///
/// A lease that lapsed before the reaper recorded it already reads `Expired`,
/// ending at its deadline.
pub fn token_to_proto(token: &BootstrapToken, now: DateTime<Utc>) -> ProtoToken {
    let state = token.effective_state_at(now);
    let ended_at = match (token.ended_at, state) {
        (Some(at), _) => at.timestamp_millis(),
        (None, TokenState::Expired) => token.lease.expires_at.timestamp_millis(),
        (None, _) => 0,
    };

    ProtoToken {
        id: token.id.to_string(),
        labels: labels_to_proto(&token.labels),
        usage_count: token.usage_count,
        state: state_to_proto(state).into(),
        issued_at: token.lease.issued_at.timestamp_millis(),
        expires_at: token.lease.expires_at.timestamp_millis(),
        ended_at,
    }
}

pub fn state_to_proto(state: TokenState) -> ProtoTokenState {
    match state {
        TokenState::Active => ProtoTokenState::Active,
        TokenState::Revoked => ProtoTokenState::Revoked,
        TokenState::Expired => ProtoTokenState::Expired,
    }
}

pub fn labels_to_proto(labels: &Labels) -> HashMap<String, String> {
    labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn cluster_to_proto(cluster: &ClusterSummary) -> ProtoCluster {
    ProtoCluster {
        id: cluster.id.to_string(),
        labels: labels_to_proto(&cluster.labels),
        registered_at: cluster.registered_at.timestamp_millis(),
    }
}

pub fn chain_entry_to_proto(entry: &ChainEntry) -> CertInfo {
    CertInfo {
        subject: entry.summary.subject.clone(),
        issuer: entry.summary.issuer.clone(),
        not_after: entry.summary.not_after,
        is_ca: entry.summary.is_ca,
        pins: entry.pins.iter().map(ToString::to_string).collect(),
    }
}
