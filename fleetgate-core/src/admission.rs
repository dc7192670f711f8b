//! Admission state machine.
//!
//! The gateway walks it per request; the agent walks it per attempt and
//! reports its failure exits as [`Rejection`]s.
//!
//! ```text
//! Init -> TrustEstablished -> TokenValidated -> ClusterReserved -> KeyringIssued
//! ```
//!
//! Any stage before `KeyringIssued` may exit with a [`Rejection`]. Stages only
//! move forward, one step at a time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    TrustEstablished,
    TokenValidated,
    ClusterReserved,
    KeyringIssued,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::TrustEstablished => "trust_established",
            Self::TokenValidated => "token_validated",
            Self::ClusterReserved => "cluster_reserved",
            Self::KeyringIssued => "keyring_issued",
        }
    }

    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::TrustEstablished),
            Self::TrustEstablished => Some(Self::TokenValidated),
            Self::TokenValidated => Some(Self::ClusterReserved),
            Self::ClusterReserved => Some(Self::KeyringIssued),
            Self::KeyringIssued => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::KeyringIssued)
    }
}

/// Failure exits of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// The gateway chain matched no pin. Never retried.
    TrustFailed,
    /// The request was malformed before any state was touched.
    InvalidArgument,
    /// Unknown, expired, revoked or wrong-secret token.
    TokenInvalid,
    ClusterConflict,
    Internal,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrustFailed => "trust_failed",
            Self::InvalidArgument => "invalid_argument",
            Self::TokenInvalid => "token_invalid",
            Self::ClusterConflict => "cluster_conflict",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move admission from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: Stage,
    pub to: Stage,
}

/// Tracks one attempt through the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    stage: Stage,
    rejected: Option<Rejection>,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stage: Stage::Init,
            rejected: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn rejection(&self) -> Option<Rejection> {
        self.rejected
    }

    /// Move to `to`, which must be the immediate successor of the current stage.
    pub fn advance(&mut self, to: Stage) -> Result<(), InvalidTransition> {
        if self.rejected.is_some() || self.stage.next() != Some(to) {
            return Err(InvalidTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = to;
        Ok(())
    }

    /// Record a failure exit at the current stage.
    ///
    /// A completed attempt cannot be rejected afterwards; the first rejection sticks.
    pub fn reject(&mut self, rejection: Rejection) -> Rejection {
        if self.stage.is_terminal() {
            return rejection;
        }
        *self.rejected.get_or_insert(rejection)
    }

    pub fn is_complete(&self) -> bool {
        self.stage.is_terminal() && self.rejected.is_none()
    }
}
