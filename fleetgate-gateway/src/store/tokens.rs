//! Bootstrap token storage.
//!
//! Expiry is enforced inside every statement (`expires_at > now`), so a
//! token stops working the moment its lease lapses even if the reaper has
//! not yet recorded it. The reaper only makes the `Expired` state durable
//! and purges terminal rows after the grace period.

use chrono::{DateTime, Duration, Utc};
use fleetgate_auth::credential::{secret_matches, BootstrapCredential};
use fleetgate_core::{BootstrapToken, Labels, Lease, TokenId, TokenState, ValidationError};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{from_millis, is_unique_violation, stored_now, to_millis};

const SELECT_TOKEN: &str = "SELECT id, labels, usage_count, state, issued_at, expires_at, ended_at \
                            FROM bootstrap_tokens";
const RETURNING_TOKEN: &str = "RETURNING id, labels, usage_count, state, issued_at, expires_at, ended_at";

/// Fresh ids collide with probability 2^-48 per pair; a few retries are plenty.
const ID_ATTEMPTS: usize = 3;

/// Compared against when the token does not exist, so a miss costs the same as a mismatch.
const DUMMY_DIGEST: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone)]
pub struct TokenStoreConfig {
    /// Longest TTL accepted by [`TokenStore::create_token`].
    pub max_ttl: Duration,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            max_ttl: Duration::days(30),
        }
    }
}

/// A newly created token together with its only copy of the secret.
#[derive(Debug)]
pub struct IssuedToken {
    pub token: BootstrapToken,
    pub credential: BootstrapCredential,
}

/// Durable, TTL-aware storage of bootstrap tokens.
pub struct TokenStore {
    pool: SqlitePool,
    config: TokenStoreConfig,
}

impl TokenStore {
    /// Create a token store over `pool`, creating tables if needed.
    pub async fn new(pool: SqlitePool, config: TokenStoreConfig) -> Result<Self, TokenStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bootstrap_tokens (
                id TEXT PRIMARY KEY,
                secret_digest TEXT NOT NULL,
                labels TEXT NOT NULL,
                usage_count INTEGER NOT NULL DEFAULT 0,
                state TEXT NOT NULL,
                issued_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                ended_at INTEGER
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_bootstrap_tokens_state_expiry \
             ON bootstrap_tokens (state, expires_at)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create an `Active` token valid for `ttl`.
    ///
    /// The secret is returned once, inside the [`IssuedToken`]; only its
    /// digest is stored.
    pub async fn create_token(
        &self,
        ttl: Duration,
        labels: Labels,
    ) -> Result<IssuedToken, TokenStoreError> {
        if ttl > self.config.max_ttl {
            return Err(ValidationError::TtlTooLong {
                max_secs: self.config.max_ttl.num_seconds(),
            }
            .into());
        }
        let lease = Lease::starting_at(stored_now(), ttl)?;
        let labels_json = serde_json::to_string(&labels)?;

        for _ in 0..ID_ATTEMPTS {
            let credential = BootstrapCredential::generate();
            let id = TokenId::parse(credential.id())?;

            let result = sqlx::query(
                r#"
                INSERT INTO bootstrap_tokens
                    (id, secret_digest, labels, usage_count, state, issued_at, expires_at)
                VALUES (?, ?, ?, 0, 'active', ?, ?)
                "#,
            )
            .bind(id.as_str())
            .bind(credential.secret_digest())
            .bind(&labels_json)
            .bind(to_millis(lease.issued_at))
            .bind(to_millis(lease.expires_at))
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => {
                    tracing::debug!(token_id = %id, expires_at = %lease.expires_at, "Token stored");
                    return Ok(IssuedToken {
                        token: BootstrapToken {
                            id,
                            labels,
                            usage_count: 0,
                            lease,
                            state: TokenState::Active,
                            ended_at: None,
                        },
                        credential,
                    });
                }
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(token_id = %id, "Token id collision, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(TokenStoreError::IdExhausted)
    }

    /// Revoke a token.
    ///
    /// Returns `true` if this call moved the token out of `Active`. A token
    /// that is already revoked or expired is left as it is (`false`); one
    /// whose lease lapsed unrecorded is marked `Expired` instead, since expiry
    /// came first. Unknown or purged ids are `NotFound`.
    pub async fn delete_token(&self, id: &TokenId) -> Result<bool, TokenStoreError> {
        let now = to_millis(Utc::now());

        let transitioned: Option<String> = sqlx::query_scalar(
            r#"
            UPDATE bootstrap_tokens
            SET state = CASE WHEN expires_at > ?1 THEN 'revoked' ELSE 'expired' END,
                ended_at = CASE WHEN expires_at > ?1 THEN ?1 ELSE expires_at END
            WHERE id = ?2 AND state = 'active'
            RETURNING state
            "#,
        )
        .bind(now)
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        match transitioned.as_deref() {
            Some("revoked") => Ok(true),
            Some(_) => Ok(false),
            None => {
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT 1 FROM bootstrap_tokens WHERE id = ?")
                        .bind(id.as_str())
                        .fetch_optional(&self.pool)
                        .await?;
                match exists {
                    Some(_) => Ok(false),
                    None => Err(TokenStoreError::NotFound),
                }
            }
        }
    }

    /// Fetch a usable token. Expired and revoked tokens are `NotFound`.
    pub async fn get_token(&self, id: &TokenId) -> Result<BootstrapToken, TokenStoreError> {
        let sql = format!("{SELECT_TOKEN} WHERE id = ? AND state = 'active' AND expires_at > ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(to_millis(Utc::now()))
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TokenStoreError::NotFound)?;
        token_from_row(&row)
    }

    /// All usable tokens, oldest first.
    pub async fn list_tokens(&self) -> Result<Vec<BootstrapToken>, TokenStoreError> {
        let sql = format!(
            "{SELECT_TOKEN} WHERE state = 'active' AND expires_at > ? ORDER BY issued_at, id"
        );
        let rows = sqlx::query(&sql)
            .bind(to_millis(Utc::now()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(token_from_row).collect()
    }

    /// Fetch a token in any state, as long as it has not been purged.
    pub async fn inspect_token(&self, id: &TokenId) -> Result<BootstrapToken, TokenStoreError> {
        let sql = format!("{SELECT_TOKEN} WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TokenStoreError::NotFound)?;
        token_from_row(&row)
    }

    /// Fetch a usable token and check the presented secret against its digest.
    pub async fn authenticate(
        &self,
        id: &TokenId,
        secret: &str,
    ) -> Result<BootstrapToken, TokenStoreError> {
        let row = sqlx::query(
            "SELECT id, labels, usage_count, state, issued_at, expires_at, ended_at, secret_digest \
             FROM bootstrap_tokens WHERE id = ? AND state = 'active' AND expires_at > ?",
        )
        .bind(id.as_str())
        .bind(to_millis(Utc::now()))
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            let _ = secret_matches(secret, DUMMY_DIGEST);
            return Err(TokenStoreError::NotFound);
        };
        let digest: String = row.try_get("secret_digest")?;
        if !secret_matches(secret, &digest) {
            return Err(TokenStoreError::InvalidSecret);
        }
        token_from_row(&row)
    }

    /// Atomically count one use of a usable token.
    pub async fn increment_usage(&self, id: &TokenId) -> Result<BootstrapToken, TokenStoreError> {
        let mut conn = self.pool.acquire().await?;
        self.increment_usage_in(&mut *conn, id).await
    }

    /// [`increment_usage`](Self::increment_usage) on a caller-owned connection,
    /// typically an open transaction.
    ///
    /// A single conditional `UPDATE` does the check and the increment, so
    /// concurrent callers never lose an update and a failed call changes nothing.
    pub async fn increment_usage_in(
        &self,
        conn: &mut SqliteConnection,
        id: &TokenId,
    ) -> Result<BootstrapToken, TokenStoreError> {
        let now = to_millis(Utc::now());
        let sql = format!(
            "UPDATE bootstrap_tokens SET usage_count = usage_count + 1 \
             WHERE id = ? AND state = 'active' AND expires_at > ? {RETURNING_TOKEN}"
        );
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .bind(now)
            .fetch_optional(&mut *conn)
            .await?;

        if let Some(row) = row {
            return token_from_row(&row);
        }

        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM bootstrap_tokens WHERE id = ?")
                .bind(id.as_str())
                .fetch_optional(&mut *conn)
                .await?;
        Err(match state.as_deref() {
            None => TokenStoreError::NotFound,
            Some("revoked") => TokenStoreError::Revoked,
            Some(_) => TokenStoreError::Expired,
        })
    }

    /// Record `Expired` for every active token whose lease ended by `now`.
    ///
    /// `ended_at` is set to the lease deadline, not to `now`.
    pub async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<TokenId>, TokenStoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE bootstrap_tokens
            SET state = 'expired', ended_at = expires_at
            WHERE state = 'active' AND expires_at <= ?
            RETURNING id
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;
        ids.iter().map(|id| parse_id(id)).collect()
    }

    /// Delete terminal tokens that ended at or before `ended_before`.
    pub async fn purge_terminal(
        &self,
        ended_before: DateTime<Utc>,
    ) -> Result<Vec<TokenId>, TokenStoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM bootstrap_tokens
            WHERE state != 'active' AND ended_at IS NOT NULL AND ended_at <= ?
            RETURNING id
            "#,
        )
        .bind(to_millis(ended_before))
        .fetch_all(&self.pool)
        .await?;
        ids.iter().map(|id| parse_id(id)).collect()
    }
}

fn parse_id(id: &str) -> Result<TokenId, TokenStoreError> {
    TokenId::parse(id).map_err(|_| TokenStoreError::Corrupt(format!("bad token id {id:?}")))
}

fn timestamp(ms: i64, column: &str) -> Result<DateTime<Utc>, TokenStoreError> {
    from_millis(ms).ok_or_else(|| TokenStoreError::Corrupt(format!("{column} out of range")))
}

fn token_from_row(row: &SqliteRow) -> Result<BootstrapToken, TokenStoreError> {
    let id: String = row.try_get("id")?;
    let labels: String = row.try_get("labels")?;
    let usage_count: i64 = row.try_get("usage_count")?;
    let state: String = row.try_get("state")?;
    let issued_at: i64 = row.try_get("issued_at")?;
    let expires_at: i64 = row.try_get("expires_at")?;
    let ended_at: Option<i64> = row.try_get("ended_at")?;

    Ok(BootstrapToken {
        id: parse_id(&id)?,
        labels: serde_json::from_str(&labels)?,
        usage_count: u64::try_from(usage_count)
            .map_err(|_| TokenStoreError::Corrupt("negative usage_count".to_string()))?,
        state: state.parse().map_err(TokenStoreError::Corrupt)?,
        lease: Lease {
            issued_at: timestamp(issued_at, "issued_at")?,
            expires_at: timestamp(expires_at, "expires_at")?,
        },
        ended_at: ended_at.map(|ms| timestamp(ms, "ended_at")).transpose()?,
    })
}

/// Errors that can occur during token store operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TokenStoreError {
    #[error(transparent)]
    InvalidArgument(#[from] ValidationError),
    #[error("token not found")]
    NotFound,
    #[error("token expired")]
    Expired,
    #[error("token revoked")]
    Revoked,
    #[error("token secret does not match")]
    InvalidSecret,
    #[error("could not allocate a unique token id")]
    IdExhausted,
    #[error("corrupt token record: {0}")]
    Corrupt(String),
    #[error("label encoding: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    async fn test_store() -> TokenStore {
        let pool = crate::db::open_in_memory().await.unwrap();
        TokenStore::new(pool, TokenStoreConfig::default()).await.unwrap()
    }

    fn labels() -> Labels {
        Labels::new([("env", "test"), ("team", "edge")]).unwrap()
    }

    #[tokio::test]
    async fn test_create_token_starts_active_and_unused() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), labels())
            .await
            .unwrap();

        assert_eq!(issued.token.usage_count, 0);
        assert_eq!(issued.token.state, TokenState::Active);
        assert_eq!(issued.token.lease.ttl(), Duration::seconds(60));
        assert_eq!(issued.credential.id(), issued.token.id.as_str());

        let fetched = store.get_token(&issued.token.id).await.unwrap();
        assert_eq!(fetched, issued.token);
    }

    #[tokio::test]
    async fn test_create_token_rejects_bad_ttl() {
        let store = test_store().await;

        for ttl in [Duration::zero(), Duration::seconds(-5)] {
            let err = store.create_token(ttl, Labels::default()).await.unwrap_err();
            assert!(matches!(
                err,
                TokenStoreError::InvalidArgument(ValidationError::NonPositiveTtl)
            ));
        }

        let err = store
            .create_token(Duration::days(31), Labels::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TokenStoreError::InvalidArgument(ValidationError::TtlTooLong { .. })
        ));
        assert!(store.list_tokens().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_secret_is_not_stored() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();

        let (digest,): (String,) =
            sqlx::query_as("SELECT secret_digest FROM bootstrap_tokens WHERE id = ?")
                .bind(issued.token.id.as_str())
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_ne!(digest, issued.credential.secret());
        assert_eq!(digest, issued.credential.secret_digest());
    }

    #[tokio::test]
    async fn test_revoke_hides_token() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), labels())
            .await
            .unwrap();
        let id = issued.token.id;

        assert!(store.delete_token(&id).await.unwrap());
        assert!(matches!(
            store.get_token(&id).await,
            Err(TokenStoreError::NotFound)
        ));
        assert!(store.list_tokens().await.unwrap().is_empty());

        let inspected = store.inspect_token(&id).await.unwrap();
        assert_eq!(inspected.state, TokenState::Revoked);
        assert!(inspected.ended_at.is_some());

        // Idempotent
        assert!(!store.delete_token(&id).await.unwrap());
        assert_eq!(
            store.inspect_token(&id).await.unwrap().ended_at,
            inspected.ended_at
        );
    }

    #[tokio::test]
    async fn test_revoke_unknown_is_not_found() {
        let store = test_store().await;
        let id = TokenId::parse("deadbeef0000").unwrap();
        assert!(matches!(
            store.delete_token(&id).await,
            Err(TokenStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_list_only_active_in_creation_order() {
        let store = test_store().await;
        let first = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();
        let revoked = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let last = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();
        store.delete_token(&revoked.token.id).await.unwrap();

        let listed: Vec<TokenId> = store
            .list_tokens()
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1], last.token.id);
        assert!(listed.contains(&first.token.id));
    }

    #[tokio::test]
    async fn test_increment_usage_counts_exactly() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), labels())
            .await
            .unwrap();

        for expected in 1..=3 {
            let token = store.increment_usage(&issued.token.id).await.unwrap();
            assert_eq!(token.usage_count, expected);
            assert_eq!(token.labels, labels());
        }
    }

    #[tokio::test]
    async fn test_concurrent_increments_do_not_lose_updates() {
        let store = Arc::new(test_store().await);
        let issued = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let store = store.clone();
            let id = issued.token.id.clone();
            handles.push(tokio::spawn(
                async move { store.increment_usage(&id).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let token = store.get_token(&issued.token.id).await.unwrap();
        assert_eq!(token.usage_count, 25);
    }

    #[tokio::test]
    async fn test_increment_revoked_fails_without_mutation() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();
        store.increment_usage(&issued.token.id).await.unwrap();
        store.delete_token(&issued.token.id).await.unwrap();

        assert!(matches!(
            store.increment_usage(&issued.token.id).await,
            Err(TokenStoreError::Revoked)
        ));
        let inspected = store.inspect_token(&issued.token.id).await.unwrap();
        assert_eq!(inspected.usage_count, 1);
    }

    #[tokio::test]
    async fn test_increment_unknown_is_not_found() {
        let store = test_store().await;
        let id = TokenId::parse("0123456789ab").unwrap();
        assert!(matches!(
            store.increment_usage(&id).await,
            Err(TokenStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_lapsed_lease_is_unusable_before_reaping() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::milliseconds(30), Labels::default())
            .await
            .unwrap();
        let id = issued.token.id;
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;

        assert!(matches!(
            store.get_token(&id).await,
            Err(TokenStoreError::NotFound)
        ));
        assert!(matches!(
            store.increment_usage(&id).await,
            Err(TokenStoreError::Expired)
        ));
        assert!(matches!(
            store.authenticate(&id, issued.credential.secret()).await,
            Err(TokenStoreError::NotFound)
        ));

        assert!(store.list_tokens().await.unwrap().is_empty());

        let inspected = store.inspect_token(&id).await.unwrap();
        assert_eq!(inspected.state, TokenState::Active);
        assert_eq!(inspected.effective_state_at(Utc::now()), TokenState::Expired);
        assert_eq!(inspected.usage_count, 0);
    }

    #[tokio::test]
    async fn test_revoke_after_lapse_records_expiry() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::milliseconds(20), Labels::default())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;

        assert!(!store.delete_token(&issued.token.id).await.unwrap());
        let inspected = store.inspect_token(&issued.token.id).await.unwrap();
        assert_eq!(inspected.state, TokenState::Expired);
        assert_eq!(inspected.ended_at, Some(inspected.lease.expires_at));
    }

    #[tokio::test]
    async fn test_authenticate() {
        let store = test_store().await;
        let issued = store
            .create_token(Duration::seconds(60), labels())
            .await
            .unwrap();
        let id = &issued.token.id;

        let token = store
            .authenticate(id, issued.credential.secret())
            .await
            .unwrap();
        assert_eq!(token.id, *id);

        let wrong = BootstrapCredential::generate();
        assert!(matches!(
            store.authenticate(id, wrong.secret()).await,
            Err(TokenStoreError::InvalidSecret)
        ));
        assert!(matches!(
            store
                .authenticate(&TokenId::parse(wrong.id()).unwrap(), wrong.secret())
                .await,
            Err(TokenStoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_expire_and_purge() {
        let store = test_store().await;
        let short = store
            .create_token(Duration::milliseconds(10), Labels::default())
            .await
            .unwrap();
        let long = store
            .create_token(Duration::seconds(60), Labels::default())
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        let expired = store.expire_due(Utc::now()).await.unwrap();
        assert_eq!(expired, vec![short.token.id.clone()]);
        assert!(store.expire_due(Utc::now()).await.unwrap().is_empty());

        let inspected = store.inspect_token(&short.token.id).await.unwrap();
        assert_eq!(inspected.state, TokenState::Expired);
        assert_eq!(inspected.ended_at, Some(inspected.lease.expires_at));

        // Still inside the grace period
        let purged = store
            .purge_terminal(Utc::now() - Duration::minutes(5))
            .await
            .unwrap();
        assert!(purged.is_empty());

        let purged = store.purge_terminal(Utc::now()).await.unwrap();
        assert_eq!(purged, vec![short.token.id.clone()]);
        assert!(matches!(
            store.inspect_token(&short.token.id).await,
            Err(TokenStoreError::NotFound)
        ));
        assert!(matches!(
            store.delete_token(&short.token.id).await,
            Err(TokenStoreError::NotFound)
        ));

        // Active tokens are never purged
        assert!(store.get_token(&long.token.id).await.is_ok());
    }
}
