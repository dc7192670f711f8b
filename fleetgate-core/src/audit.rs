//! Audit events for token lifecycle and admission decisions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cluster::ClusterId;
use crate::token::TokenId;

/// Action being audited.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    // Token lifecycle
    /// Operator created a token.
    TokenCreated,
    /// Operator revoked a token.
    TokenRevoked,
    /// Reaper recorded a lapsed lease.
    TokenExpired,
    /// Reaper removed a terminal token after its grace period.
    TokenPurged,

    // Admission
    /// A cluster was admitted and received a keyring.
    ClusterAdmitted,
    /// A bootstrap attempt was refused.
    AdmissionRejected,
    /// A cluster's keyring was deleted, freeing its id.
    ClusterRemoved,
}

/// Target of an audit action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "id")]
pub enum AuditTarget {
    Token(TokenId),
    Cluster(ClusterId),
}

/// An audit event recording an action in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub ts: DateTime<Utc>,
    pub action: AuditAction,
    pub target: AuditTarget,

    /// Additional contextual information.
    /// Using BTreeMap for deterministic serialization order.
    pub metadata: BTreeMap<String, String>,
}

impl AuditEvent {
    /// Create a new audit event with the current timestamp.
    pub fn new(action: AuditAction, target: AuditTarget) -> Self {
        Self::with_timestamp(Utc::now(), action, target)
    }

    pub fn with_timestamp(ts: DateTime<Utc>, action: AuditAction, target: AuditTarget) -> Self {
        Self {
            ts,
            action,
            target,
            metadata: BTreeMap::new(),
        }
    }

    /// Add metadata to the event (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
