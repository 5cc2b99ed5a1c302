//! strongbox-server - backup and secure upload listeners over one storage root

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use strongbox::config::ServerConfig;
use strongbox::server::{BackupServer, ClientDirectory, SecureUploadServer};
use strongbox::storage::BackupRegistry;

#[derive(Parser, Debug)]
#[command(name = "strongbox-server", version, about)]
struct Args {
    /// TOML config file; every key is optional
    #[arg(short, long, env = "STRONGBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Backup root directory
    #[arg(long, env = "STRONGBOX_ROOT")]
    root: Option<PathBuf>,

    /// Listen address for the backup protocol
    #[arg(long)]
    backup_addr: Option<String>,

    /// Listen address for registration and secure uploads
    #[arg(long)]
    secure_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(root) = args.root {
        config.root = root;
    }
    if let Some(addr) = args.backup_addr {
        config.backup_addr = addr;
    }
    if let Some(addr) = args.secure_addr {
        config.secure_addr = addr;
    }

    let registry = Arc::new(
        BackupRegistry::new(config.root_dir())
            .await
            .context("Failed to open backup root")?,
    );

    let backup_listener = TcpListener::bind(&config.backup_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.backup_addr))?;
    let secure_listener = TcpListener::bind(&config.secure_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.secure_addr))?;

    let clients = Arc::new(
        ClientDirectory::open(&config.root_dir())
            .await
            .context("Failed to load client directory")?,
    );
    info!("{} registered clients", clients.len().await);

    let backup = BackupServer::new(Arc::clone(&registry), config.backup_version);
    let secure = SecureUploadServer::new(registry, clients, config.handshake_version);

    tokio::select! {
        _ = backup.serve(backup_listener) => {}
        _ = secure.serve(secure_listener) => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
        }
    }

    Ok(())
}
