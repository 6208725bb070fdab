//! A whiteboard peer daemon.
//!
//! Reads its configuration from a JSON file (first argument, default
//! `easel.json`), writing the defaults there on first run. With no
//! directory configured the peer runs standalone: boards can be created
//! and edited locally but are not advertised to anyone.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use easel_net::{NetConfig, PeerNode};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = easel_core::logging::init_logging(Path::new("logs"))?;

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("easel.json"));
    let config = NetConfig::load_or_default(&config_path);
    if !config_path.exists() {
        if let Err(e) = config.save_to_file(&config_path) {
            tracing::warn!("Could not write default config: {e}");
        }
    }

    let node = PeerNode::new(config);
    node.start().await.context("Failed to start peer")?;
    match node.local_addr() {
        Some(addr) => info!("Peer running as {addr}"),
        None => anyhow::bail!("Peer did not bind"),
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Interrupt received, shutting down");
    node.stop().await;
    Ok(())
}
