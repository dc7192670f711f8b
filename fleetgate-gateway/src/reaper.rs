//! Background lease reaper.
//!
//! Expiry is already enforced by every store query; the reaper makes it
//! durable (`Active -> Expired`) and removes terminal tokens once their grace
//! period has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fleetgate_core::{AuditAction, AuditEvent, AuditTarget};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audit::AuditSink;
use crate::shutdown::Shutdown;
use crate::store::{TokenStore, TokenStoreError};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Upper bound on how long an expired token stays recorded as `Active`.
    pub interval: Duration,
    /// How long revoked and expired tokens remain queryable.
    pub grace_period: chrono::Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            grace_period: chrono::Duration::minutes(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    pub expired: usize,
    pub purged: usize,
}

pub struct LeaseReaper {
    tokens: Arc<TokenStore>,
    audit: Arc<dyn AuditSink>,
    config: ReaperConfig,
}

impl LeaseReaper {
    pub fn new(tokens: Arc<TokenStore>, audit: Arc<dyn AuditSink>, config: ReaperConfig) -> Self {
        Self {
            tokens,
            audit,
            config,
        }
    }

    /// Run one pass as of `now`.
    pub async fn reap_once(&self, now: DateTime<Utc>) -> Result<ReapStats, TokenStoreError> {
        let expired = self.tokens.expire_due(now).await?;
        for id in &expired {
            tracing::info!(token_id = %id, "Bootstrap token expired");
            self.audit.record(AuditEvent::with_timestamp(
                now,
                AuditAction::TokenExpired,
                AuditTarget::Token(id.clone()),
            ));
        }

        let purged = self
            .tokens
            .purge_terminal(now - self.config.grace_period)
            .await?;
        for id in &purged {
            tracing::debug!(token_id = %id, "Bootstrap token purged");
            self.audit.record(AuditEvent::with_timestamp(
                now,
                AuditAction::TokenPurged,
                AuditTarget::Token(id.clone()),
            ));
        }

        Ok(ReapStats {
            expired: expired.len(),
            purged: purged.len(),
        })
    }

    /// Tick every `interval` until `shutdown` fires.
    pub fn spawn(self, mut shutdown: Shutdown) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                interval_ms = self.config.interval.as_millis() as u64,
                grace_secs = self.config.grace_period.num_seconds(),
                "Lease reaper started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.reap_once(Utc::now()).await {
                            tracing::warn!(error = %e, "Lease reaping failed");
                        }
                    }
                    _ = shutdown.wait() => {
                        tracing::info!("Shutdown signal received, stopping lease reaper");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::store::TokenStoreConfig;
    use fleetgate_core::{Labels, TokenState};

    async fn setup(config: ReaperConfig) -> (Arc<TokenStore>, Arc<MemoryAuditSink>, LeaseReaper) {
        let pool = crate::db::open_in_memory().await.unwrap();
        let tokens = Arc::new(
            TokenStore::new(pool, TokenStoreConfig::default())
                .await
                .unwrap(),
        );
        let audit = Arc::new(MemoryAuditSink::new());
        let reaper = LeaseReaper::new(tokens.clone(), audit.clone(), config);
        (tokens, audit, reaper)
    }

    #[tokio::test]
    async fn test_reap_once_expires_then_purges() {
        let (tokens, audit, reaper) = setup(ReaperConfig::default()).await;
        let issued = tokens
            .create_token(chrono::Duration::milliseconds(10), Labels::default())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let now = Utc::now();
        let stats = reaper.reap_once(now).await.unwrap();
        assert_eq!(stats, ReapStats { expired: 1, purged: 0 });
        assert_eq!(
            tokens.inspect_token(&issued.token.id).await.unwrap().state,
            TokenState::Expired
        );

        let later = now + chrono::Duration::minutes(6);
        let stats = reaper.reap_once(later).await.unwrap();
        assert_eq!(stats, ReapStats { expired: 0, purged: 1 });
        assert!(tokens.inspect_token(&issued.token.id).await.is_err());

        let actions: Vec<_> = audit.events().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![AuditAction::TokenExpired, AuditAction::TokenPurged]);
    }

    #[tokio::test]
    async fn test_spawned_reaper_materializes_expiry() {
        let config = ReaperConfig {
            interval: Duration::from_millis(20),
            ..Default::default()
        };
        let (tokens, _audit, reaper) = setup(config).await;
        let (trigger, shutdown) = crate::shutdown::channel();
        let handle = reaper.spawn(shutdown);

        let issued = tokens
            .create_token(chrono::Duration::milliseconds(50), Labels::default())
            .await
            .unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let state = tokens.inspect_token(&issued.token.id).await.unwrap().state;
            if state == TokenState::Expired {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "reaper never ran");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
