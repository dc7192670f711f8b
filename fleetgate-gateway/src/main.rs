//! Fleetgate Gateway - admits agents into the fleet
//!
//! Serves the operator management API on loopback and the agent bootstrap
//! endpoint over TLS, backed by a SQLite token store.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use fleetgate_core::Labels;
use fleetgate_gateway::admission::AdmissionCoordinator;
use fleetgate_gateway::audit::{AuditSink, TracingAuditSink};
use fleetgate_gateway::config::{default_data_dir, GatewayConfig};
use fleetgate_gateway::reaper::LeaseReaper;
use fleetgate_gateway::services::{BootstrapService, ManagementService};
use fleetgate_gateway::store::{ClusterRegistry, TokenStore, TokenStoreConfig};
use fleetgate_gateway::tls::{CertParams, GatewayIdentity};
use fleetgate_gateway::{db, server, shutdown};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Fleetgate Gateway - bootstrap admission service
#[derive(Parser)]
#[command(name = "fleetgate-gateway", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the management and bootstrap listeners
    Serve(GatewayConfig),

    /// Offline token management against the local database
    Token {
        /// Directory holding gateway.db
        #[arg(long, env = "FLEETGATE_DATA_DIR", global = true)]
        data_dir: Option<std::path::PathBuf>,

        #[command(subcommand)]
        action: TokenAction,
    },

    /// Print the gateway certificate pins agents should trust
    Pins {
        /// Directory holding the gateway keys
        #[arg(long, env = "FLEETGATE_DATA_DIR")]
        data_dir: Option<std::path::PathBuf>,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Create a bootstrap token
    Create {
        /// Token lifetime (e.g., "30m", "24h")
        #[arg(long, default_value = "24h", value_parser = humantime::parse_duration)]
        ttl: std::time::Duration,

        /// Label copied to every cluster admitted with this token (repeatable)
        #[arg(long = "label", value_parser = parse_label)]
        labels: Vec<(String, String)>,
    },

    /// Revoke a bootstrap token
    Revoke {
        /// Token id
        id: String,
    },
}

fn parse_label(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

const DB_FILE: &str = "gateway.db";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(config) => cmd_serve(config).await,
        Commands::Token { data_dir, action } => {
            cmd_token(data_dir.unwrap_or_else(default_data_dir), action).await
        }
        Commands::Pins { data_dir } => cmd_pins(data_dir.unwrap_or_else(default_data_dir)),
    }
}

/// Handle token subcommands.
async fn cmd_token(
    data_dir: std::path::PathBuf,
    action: TokenAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let pool = db::open(data_dir.join(DB_FILE), 1).await?;
    let tokens = TokenStore::new(pool, TokenStoreConfig::default()).await?;

    match action {
        TokenAction::Create { ttl, labels } => {
            let labels = Labels::new(labels)?;
            let issued = tokens
                .create_token(chrono::Duration::from_std(ttl)?, labels)
                .await?;

            println!("Bootstrap Token Created");
            println!("=======================");
            println!();
            println!("Token:   {}", issued.credential.expose().as_str());
            println!();
            println!(
                "Expires: {}",
                issued.token.lease.expires_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            for (key, value) in issued.token.labels.iter() {
                println!("Label:   {}={}", key, value);
            }
            println!();
            println!("Share this token with the agent out-of-band.");
        }
        TokenAction::Revoke { id } => {
            let id = fleetgate_core::TokenId::parse(&id)?;
            if tokens.delete_token(&id).await? {
                println!("Token {} revoked", id);
            } else {
                println!("Token {} had already ended", id);
            }
        }
    }

    Ok(())
}

/// Print every pin of the gateway chain.
fn cmd_pins(data_dir: std::path::PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let identity = GatewayIdentity::load_or_create(&data_dir, &CertParams::default())?;
    for entry in identity.entries() {
        println!("{} (issuer: {}, ca: {})", entry.summary.subject, entry.summary.issuer, entry.summary.is_ca);
        for pin in &entry.pins {
            println!("  {}", pin);
        }
    }
    Ok(())
}

/// Start the gateway.
async fn cmd_serve(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let db_path = data_dir.join(DB_FILE);
    tracing::info!(path = %db_path.display(), "Opening database");
    let pool = db::open(&db_path, config.db_max_connections).await?;

    let tokens = Arc::new(TokenStore::new(pool.clone(), config.token_store()?).await?);
    let clusters = Arc::new(ClusterRegistry::new(pool).await?);

    let identity = Arc::new(GatewayIdentity::load_or_create(
        &data_dir,
        &config.cert_params()?,
    )?);
    for pin in identity.pinned_keys() {
        tracing::info!(%pin, "Gateway pin");
    }

    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);
    let coordinator = Arc::new(AdmissionCoordinator::new(
        tokens.clone(),
        clusters.clone(),
        identity.pinned_keys(),
        audit.clone(),
    ));

    let management = ManagementService::new(
        tokens.clone(),
        clusters,
        coordinator.clone(),
        identity.clone(),
        audit.clone(),
    );
    let bootstrap = BootstrapService::new(coordinator);

    let management_listener = TcpListener::bind(config.management_addr).await?;
    let bootstrap_listener = TcpListener::bind(config.bootstrap_addr).await?;

    let (trigger, shutdown) = shutdown::channel();

    let reaper = LeaseReaper::new(tokens, audit, config.reaper()?).spawn(trigger.subscribe());

    let management_handle = tokio::spawn(server::serve_management(
        management_listener,
        management,
        trigger.subscribe(),
    ));
    let limiter = config.join_rate_limiter();
    let bootstrap_handle = tokio::spawn(async move {
        server::serve_bootstrap(bootstrap_listener, &identity, bootstrap, limiter, shutdown).await
    });

    tracing::info!(
        management = %config.management_addr,
        bootstrap = %config.bootstrap_addr,
        "Fleetgate gateway started"
    );

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
    trigger.trigger();

    let (management_result, bootstrap_result, reaper_result) =
        tokio::join!(management_handle, bootstrap_handle, reaper);

    let mut failed = false;
    for (name, result) in [("management", management_result), ("bootstrap", bootstrap_result)] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(listener = name, error = %e, "Listener failed");
                failed = true;
            }
            Err(e) => {
                tracing::error!(listener = name, error = %e, "Listener task panicked");
                failed = true;
            }
        }
    }
    if let Err(e) = reaper_result {
        tracing::error!(error = %e, "Reaper task panicked");
    }

    if failed {
        return Err("gateway shut down with errors".into());
    }
    tracing::info!("Gateway shutdown complete");
    Ok(())
}
