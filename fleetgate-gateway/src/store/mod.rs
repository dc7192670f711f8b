//! Persistent gateway state in SQLite.
//!
//! - [`TokenStore`]: bootstrap tokens with leases, usage counts and revocation
//! - [`ClusterRegistry`]: admitted clusters and their keyrings
//!
//! Both are plain wrappers over a shared pool. Statements that need to commit
//! together take a caller-owned connection (`*_in` methods) so the admission
//! coordinator can run them inside one transaction.

mod clusters;
mod tokens;

pub use clusters::{ClusterRegistry, RegistryError};
pub use tokens::{IssuedToken, TokenStore, TokenStoreConfig, TokenStoreError};

use chrono::{DateTime, SubsecRound, Utc};

/// Current time at the precision rows are stored with, so a value returned
/// from a write equals the one read back later.
pub fn stored_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Stored timestamps are Unix milliseconds.
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

/// SQLite reports constraint failures through the generic database error.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}
