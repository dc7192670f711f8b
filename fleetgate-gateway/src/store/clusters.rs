//! Registry of admitted clusters.
//!
//! The primary key on `clusters.id` is what makes cluster ids unique: two
//! admissions racing for the same id both reach the `INSERT`, and the second
//! one fails with a constraint violation inside its transaction.

use chrono::{DateTime, Utc};
use fleetgate_auth::Keyring;
use fleetgate_core::{ClusterId, ClusterRecord, ClusterSummary, Labels, TokenId};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use super::{from_millis, is_unique_violation, to_millis};

/// Persistent registry of clusters and their keyrings.
pub struct ClusterRegistry {
    pool: SqlitePool,
}

impl ClusterRegistry {
    /// Create a registry over `pool`, creating tables if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, RegistryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS clusters (
                id TEXT PRIMARY KEY,
                labels TEXT NOT NULL,
                keyring TEXT NOT NULL,
                token_id TEXT NOT NULL,
                registered_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    pub async fn exists(&self, id: &ClusterId) -> Result<bool, RegistryError> {
        let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM clusters WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn get(&self, id: &ClusterId) -> Result<Option<ClusterRecord>, RegistryError> {
        let row = sqlx::query(
            "SELECT id, labels, keyring, registered_at FROM clusters WHERE id = ?",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Keyring-free listing, oldest registration first.
    pub async fn list(&self) -> Result<Vec<ClusterSummary>, RegistryError> {
        let rows = sqlx::query(
            "SELECT id, labels, registered_at FROM clusters ORDER BY registered_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(ClusterSummary {
                    id: cluster_id(row)?,
                    labels: labels(row)?,
                    registered_at: registered_at(row)?,
                })
            })
            .collect()
    }

    /// Delete a cluster's keyring, making its id available again.
    pub async fn delete(&self, id: &ClusterId) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM clusters WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound);
        }
        tracing::info!(cluster_id = %id, "Cluster keyring deleted");
        Ok(())
    }

    /// Insert `record` on a caller-owned connection.
    ///
    /// An existing row with the same id yields [`RegistryError::Conflict`].
    pub async fn register_in(
        &self,
        conn: &mut SqliteConnection,
        record: &ClusterRecord,
        admitted_by: &TokenId,
    ) -> Result<(), RegistryError> {
        let labels = serde_json::to_string(&record.labels)?;
        let keyring = serde_json::to_string(&record.keyring)?;

        let result = sqlx::query(
            r#"
            INSERT INTO clusters (id, labels, keyring, token_id, registered_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.as_str())
        .bind(labels)
        .bind(keyring)
        .bind(admitted_by.as_str())
        .bind(to_millis(record.registered_at))
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RegistryError::Conflict(record.id.clone())),
            Err(e) => Err(e.into()),
        }
    }
}

fn cluster_id(row: &SqliteRow) -> Result<ClusterId, RegistryError> {
    let id: String = row.try_get("id")?;
    ClusterId::new(id).map_err(|e| RegistryError::Corrupt(e.to_string()))
}

fn labels(row: &SqliteRow) -> Result<Labels, RegistryError> {
    let labels: String = row.try_get("labels")?;
    Ok(serde_json::from_str(&labels)?)
}

fn registered_at(row: &SqliteRow) -> Result<DateTime<Utc>, RegistryError> {
    let ms: i64 = row.try_get("registered_at")?;
    from_millis(ms).ok_or_else(|| RegistryError::Corrupt("registered_at out of range".to_string()))
}

fn record_from_row(row: &SqliteRow) -> Result<ClusterRecord, RegistryError> {
    let keyring: String = row.try_get("keyring")?;
    let keyring: Keyring = serde_json::from_str(&keyring)?;
    Ok(ClusterRecord {
        id: cluster_id(row)?,
        labels: labels(row)?,
        keyring,
        registered_at: registered_at(row)?,
    })
}

/// Errors that can occur during cluster registry operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("cluster {0} is already registered")]
    Conflict(ClusterId),
    #[error("cluster not found")]
    NotFound,
    #[error("corrupt cluster record: {0}")]
    Corrupt(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgate_auth::{EphemeralExchange, HashAlgorithm, Pin, Side};

    async fn test_registry() -> ClusterRegistry {
        let pool = crate::db::open_in_memory().await.unwrap();
        ClusterRegistry::new(pool).await.unwrap()
    }

    fn record(id: &str) -> ClusterRecord {
        let agent = EphemeralExchange::generate();
        let gateway = EphemeralExchange::generate();
        let keys = gateway
            .complete(Side::Server, &agent.public_key())
            .unwrap();
        ClusterRecord {
            id: ClusterId::new(id).unwrap(),
            labels: Labels::new([("env", "test")]).unwrap(),
            keyring: Keyring::new(keys, vec![Pin::for_spki(HashAlgorithm::Sha256, b"spki")]),
            registered_at: crate::store::stored_now(),
        }
    }

    fn token_id() -> TokenId {
        TokenId::parse("00aa11bb22cc").unwrap()
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = test_registry().await;
        let record = record("edge-1");

        let mut conn = registry.pool.acquire().await.unwrap();
        registry
            .register_in(&mut conn, &record, &token_id())
            .await
            .unwrap();
        drop(conn);

        assert!(registry.exists(&record.id).await.unwrap());
        let stored = registry.get(&record.id).await.unwrap().unwrap();
        assert_eq!(stored, record);

        let listed = registry.list().await.unwrap();
        assert_eq!(listed, vec![record.summary()]);
    }

    #[tokio::test]
    async fn test_duplicate_id_conflicts() {
        let registry = test_registry().await;
        let mut conn = registry.pool.acquire().await.unwrap();

        registry
            .register_in(&mut conn, &record("edge-1"), &token_id())
            .await
            .unwrap();
        let err = registry
            .register_in(&mut conn, &record("edge-1"), &token_id())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Conflict(id) if id.as_str() == "edge-1"));
    }

    #[tokio::test]
    async fn test_delete_frees_id() {
        let registry = test_registry().await;
        let record = record("edge-1");

        let mut conn = registry.pool.acquire().await.unwrap();
        registry
            .register_in(&mut conn, &record, &token_id())
            .await
            .unwrap();
        drop(conn);

        registry.delete(&record.id).await.unwrap();
        assert!(!registry.exists(&record.id).await.unwrap());
        assert!(matches!(
            registry.delete(&record.id).await,
            Err(RegistryError::NotFound)
        ));

        let mut conn = registry.pool.acquire().await.unwrap();
        registry
            .register_in(&mut conn, &record, &token_id())
            .await
            .unwrap();
    }
}
