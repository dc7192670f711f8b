//! Expiry deadlines for bootstrap tokens.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A time-bounded grant: valid from `issued_at` until (not including) `expires_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    /// Start a lease at `now` lasting `ttl`.
    ///
    /// Fails for zero or negative TTLs.
    pub fn starting_at(now: DateTime<Utc>, ttl: Duration) -> Result<Self, ValidationError> {
        if ttl <= Duration::zero() {
            return Err(ValidationError::NonPositiveTtl);
        }
        Ok(Self {
            issued_at: now,
            expires_at: now + ttl,
        })
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.expires_at - self.issued_at
    }
}
