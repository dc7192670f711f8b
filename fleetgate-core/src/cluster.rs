//! Cluster identity and registration records.

use std::fmt;

use chrono::{DateTime, Utc};
use fleetgate_auth::Keyring;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::labels::Labels;

pub const MAX_CLUSTER_ID_LEN: usize = 128;

/// Caller-chosen cluster identifier.
///
/// 1..=128 chars of `[A-Za-z0-9._-]`, starting with a letter or digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterId(String);

impl ClusterId {
    pub fn new(id: impl Into<String>) -> Result<Self, ValidationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ValidationError::InvalidClusterId("must not be empty"));
        }
        if id.len() > MAX_CLUSTER_ID_LEN {
            return Err(ValidationError::InvalidClusterId(
                "longer than 128 characters",
            ));
        }
        if !id.starts_with(|c: char| c.is_ascii_alphanumeric()) {
            return Err(ValidationError::InvalidClusterId(
                "must start with a letter or digit",
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            return Err(ValidationError::InvalidClusterId(
                "contains characters outside [A-Za-z0-9._-]",
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ClusterId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ClusterId> for String {
    fn from(id: ClusterId) -> Self {
        id.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cluster admitted through bootstrap.
///
/// Exactly one record exists per successful admission. The keyring stays on
/// the gateway; listings go through [`ClusterSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    /// Copied from the admitting token at registration time.
    pub labels: Labels,
    pub keyring: Keyring,
    pub registered_at: DateTime<Utc>,
}

impl ClusterRecord {
    #[must_use]
    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            id: self.id.clone(),
            labels: self.labels.clone(),
            registered_at: self.registered_at,
        }
    }
}

/// Keyring-free view of a registered cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub labels: Labels,
    pub registered_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_valid_ids() {
        for id in ["a", "prod-eu-1", "cluster_01.example", &"x".repeat(128)] {
            assert!(ClusterId::new(id).is_ok(), "{id:?} should be accepted");
        }
    }

    #[test]
    fn rejects_invalid_ids() {
        for id in ["", ".hidden", "-dash", "has space", "a/b", &"x".repeat(129)] {
            assert!(
                matches!(ClusterId::new(id), Err(ValidationError::InvalidClusterId(_))),
                "{id:?} should be rejected"
            );
        }
    }

    #[test]
    fn deserialization_validates() {
        let ok: ClusterId = serde_json::from_str(r#""edge-7""#).unwrap();
        assert_eq!(ok.as_str(), "edge-7");
        assert!(serde_json::from_str::<ClusterId>(r#""bad id""#).is_err());
    }
}
