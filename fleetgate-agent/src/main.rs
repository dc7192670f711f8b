//! Fleetgate Agent - joins a cluster to the fleet

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetgate_agent::keyring_store::default_data_dir;
use fleetgate_agent::{BootstrapError, BootstrapRequest, Bootstrapper, KeyringStore};
use fleetgate_auth::{BootstrapCredential, TrustAnchors};
use fleetgate_core::ClusterId;
use tracing_subscriber::EnvFilter;

/// Fleetgate Agent - cluster bootstrap
#[derive(Parser)]
#[command(name = "fleetgate-agent", version, about)]
struct Cli {
    /// Directory for stored keyrings [default: platform data dir]
    #[arg(long, env = "FLEETGATE_AGENT_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Admit this cluster through a gateway
    Bootstrap {
        /// Gateway bootstrap address (host:port or https://host:port)
        #[arg(long, env = "FLEETGATE_GATEWAY")]
        gateway: String,

        /// Bootstrap credential "<id>.<secret>"
        #[arg(long, env = "FLEETGATE_TOKEN", hide_env_values = true)]
        token: String,

        /// Trusted gateway pin, e.g. "sha256:..." (repeatable)
        #[arg(long = "pin", env = "FLEETGATE_PINS", value_delimiter = ',', required = true)]
        pins: Vec<String>,

        /// Cluster id to register
        #[arg(long, env = "FLEETGATE_CLUSTER_ID")]
        cluster_id: String,
    },

    /// Show the stored keyring for a cluster
    Show {
        /// Cluster id
        cluster_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let data_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_data_dir().context("Could not determine data directory")?,
    };
    let store = KeyringStore::new(data_dir);

    match cli.command {
        Commands::Bootstrap {
            gateway,
            token,
            pins,
            cluster_id,
        } => cmd_bootstrap(&store, gateway, &token, &pins, cluster_id).await,
        Commands::Show { cluster_id } => cmd_show(&store, cluster_id),
    }
}

async fn cmd_bootstrap(
    store: &KeyringStore,
    gateway: String,
    token: &str,
    pins: &[String],
    cluster_id: String,
) -> Result<()> {
    let credential = BootstrapCredential::parse(token).context("Invalid bootstrap token format")?;
    let cluster_id = ClusterId::new(cluster_id).context("Invalid cluster id")?;
    let anchors = TrustAnchors::parse(pins).context("Invalid gateway pin")?;

    let bootstrapper = Bootstrapper::new(gateway, anchors)?;
    let request = BootstrapRequest {
        credential,
        cluster_id,
    };

    let keyring = match bootstrapper.join(&request).await {
        Ok(keyring) => keyring,
        Err(e @ BootstrapError::TrustFailed(_)) => {
            eprintln!("Refusing to send the token: the gateway did not present a pinned certificate.");
            eprintln!("Check the pins with the gateway operator before retrying.");
            return Err(e.into());
        }
        Err(e) => return Err(e).context("Bootstrap failed"),
    };

    let path = store
        .save(&request.cluster_id, &keyring)
        .context("Failed to store keyring")?;

    println!("Cluster {} admitted", request.cluster_id);
    println!("Key id:  {}", keyring.key_id());
    println!("Keyring: {}", path.display());
    Ok(())
}

fn cmd_show(store: &KeyringStore, cluster_id: String) -> Result<()> {
    let cluster_id = ClusterId::new(cluster_id).context("Invalid cluster id")?;
    let keyring = store
        .load(&cluster_id)
        .context("Failed to read keyring")?
        .with_context(|| format!("No keyring stored for cluster {}", cluster_id))?;

    println!("Cluster: {}", cluster_id);
    println!("Key id:  {}", keyring.key_id());
    println!("Pins:");
    for pin in &keyring.pinned_keys {
        println!("  {}", pin);
    }
    Ok(())
}
