//! Bootstrap tokens.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::labels::Labels;
use crate::lease::Lease;

/// Public identifier of a bootstrap token (12 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    pub fn parse(id: &str) -> Result<Self, ValidationError> {
        if fleetgate_auth::credential::is_valid_token_id(id) {
            Ok(Self(id.to_string()))
        } else {
            Err(ValidationError::InvalidTokenId)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a token.
///
/// `Active` is the only usable state. `Revoked` and `Expired` are terminal
/// and never transition back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    Active,
    Revoked,
    Expired,
}

impl TokenState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl FromStr for TokenState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "revoked" => Ok(Self::Revoked),
            "expired" => Ok(Self::Expired),
            other => Err(format!("unknown token state: {other}")),
        }
    }
}

impl fmt::Display for TokenState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bootstrap token as seen by operators. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapToken {
    pub id: TokenId,
    pub labels: Labels,
    pub usage_count: u64,
    pub lease: Lease,
    pub state: TokenState,
    /// When the token left `Active` (revocation or materialized expiry).
    pub ended_at: Option<DateTime<Utc>>,
}

impl BootstrapToken {
    /// State as observed at `now`, accounting for a lapsed lease.
    ///
    /// A token still marked `Active` past its deadline is already unusable;
    /// the reaper only records the fact.
    pub fn effective_state_at(&self, now: DateTime<Utc>) -> TokenState {
        match self.state {
            TokenState::Active if self.lease.is_expired_at(now) => TokenState::Expired,
            state => state,
        }
    }
}
