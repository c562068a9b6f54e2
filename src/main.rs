//! distkv server binary
//!
//! Main entry point for a leader or follower store

use clap::Parser;
use distkv::{KvServer, Result, Role, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(author, version, about = "distkv leader/follower key-value server", long_about = None)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long, env = "DISTKV_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, env = "DISTKV_LISTEN")]
    listen: Option<String>,

    /// Snapshot file used when persistence is enabled
    #[arg(long, env = "DISTKV_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Keep the table in memory only
    #[arg(long)]
    no_persist: bool,

    #[arg(long, value_enum, env = "DISTKV_ROLE")]
    role: Option<Role>,

    /// Follower address to replicate to (repeat or comma-separate)
    #[arg(long = "replica", value_delimiter = ',', env = "DISTKV_REPLICAS")]
    replicas: Vec<String>,
}

impl Args {
    fn into_config(self) -> Result<StoreConfig> {
        let mut config = match &self.config {
            Some(path) => StoreConfig::from_file(path)?,
            None => StoreConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen_addr = listen;
        }
        if let Some(snapshot) = self.snapshot {
            config.snapshot_path = snapshot;
        }
        if self.no_persist {
            config.persist = false;
        }
        if let Some(role) = self.role {
            config.role = role;
        }
        if !self.replicas.is_empty() {
            config.replica_addrs = self.replicas;
        }
        Ok(config)
    }
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Args::parse().into_config()?;

    // Create the store; snapshot errors are fatal here
    let server = Arc::new(KvServer::new(config).await?);

    // Setup graceful shutdown on SIGINT (Ctrl+C)
    let server_clone = Arc::clone(&server);
    tokio::spawn(async move {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            return;
        }

        info!("Received Ctrl+C, initiating graceful shutdown");
        if let Err(e) = server_clone.shutdown() {
            error!(error = %e, "Failed to initiate shutdown");
        }
    });

    // Run the server; a bind failure is fatal
    server.run().await?;

    let workers = server.close().await;
    info!(workers, "Replication drained, exiting");

    Ok(())
}
