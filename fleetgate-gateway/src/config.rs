//! Gateway configuration: command-line flags with `FLEETGATE_*` env fallbacks.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::reaper::ReaperConfig;
use crate::services::JoinRateLimiter;
use crate::store::TokenStoreConfig;
use crate::tls::CertParams;

/// Settings for `fleetgate-gateway serve`.
#[derive(Debug, Clone, clap::Args)]
pub struct GatewayConfig {
    /// Directory for the database and TLS keys [default: <local data dir>/fleetgate]
    #[arg(long, env = "FLEETGATE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Operator management listener (keep on loopback)
    #[arg(long, env = "FLEETGATE_MANAGEMENT_ADDR", default_value = "127.0.0.1:9090")]
    pub management_addr: SocketAddr,

    /// Agent bootstrap listener
    #[arg(long, env = "FLEETGATE_BOOTSTRAP_ADDR", default_value = "0.0.0.0:9091")]
    pub bootstrap_addr: SocketAddr,

    /// How often lapsed leases are recorded as expired (e.g. "250ms", "1s")
    #[arg(long, env = "FLEETGATE_REAP_INTERVAL", default_value = "250ms", value_parser = humantime::parse_duration)]
    pub reap_interval: Duration,

    /// How long revoked or expired tokens stay queryable before purge
    #[arg(long, env = "FLEETGATE_GRACE_PERIOD", default_value = "5m", value_parser = humantime::parse_duration)]
    pub grace_period: Duration,

    /// Longest TTL an operator may request
    #[arg(long, env = "FLEETGATE_MAX_TOKEN_TTL", default_value = "720h", value_parser = humantime::parse_duration)]
    pub max_token_ttl: Duration,

    /// SQLite pool size
    #[arg(long, env = "FLEETGATE_DB_MAX_CONNECTIONS", default_value_t = 1)]
    pub db_max_connections: u32,

    /// Sustained Join requests per second
    #[arg(long, env = "FLEETGATE_JOIN_RATE", default_value_t = 5)]
    pub join_rate_per_second: u32,

    /// Join burst allowance
    #[arg(long, env = "FLEETGATE_JOIN_BURST", default_value_t = 20)]
    pub join_burst: u32,

    /// Validity of the generated gateway certificates
    #[arg(long, env = "FLEETGATE_CERT_VALIDITY_DAYS", default_value_t = 90)]
    pub cert_validity_days: u32,
}

impl GatewayConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    pub fn token_store(&self) -> Result<TokenStoreConfig, ConfigError> {
        Ok(TokenStoreConfig {
            max_ttl: to_chrono("max-token-ttl", self.max_token_ttl)?,
        })
    }

    pub fn reaper(&self) -> Result<ReaperConfig, ConfigError> {
        if self.reap_interval.is_zero() {
            return Err(ConfigError::Invalid {
                name: "reap-interval",
                reason: "must be positive".to_string(),
            });
        }
        Ok(ReaperConfig {
            interval: self.reap_interval,
            grace_period: to_chrono("grace-period", self.grace_period)?,
        })
    }

    pub fn join_rate_limiter(&self) -> JoinRateLimiter {
        JoinRateLimiter::new(self.join_rate_per_second, self.join_burst)
    }

    pub fn cert_params(&self) -> Result<CertParams, ConfigError> {
        if self.cert_validity_days == 0 {
            return Err(ConfigError::Invalid {
                name: "cert-validity-days",
                reason: "must be positive".to_string(),
            });
        }
        Ok(CertParams {
            validity_days: self.cert_validity_days,
            ..CertParams::default()
        })
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fleetgate")
}

fn to_chrono(name: &'static str, d: Duration) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::from_std(d).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid --{name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}
