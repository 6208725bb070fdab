//! The board directory daemon.
//!
//! Peers register here to advertise boards and to learn what everyone else
//! is sharing. Takes one optional argument, the listen address
//! (default `0.0.0.0:3170`).

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use easel_net::DirectoryServer;

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = easel_core::logging::init_logging(Path::new("logs"))?;

    let addr: SocketAddr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "0.0.0.0:3170".to_string())
        .parse()
        .context("Invalid listen address")?;

    let directory = DirectoryServer::bind(addr)
        .await
        .context("Failed to bind directory")?;
    info!("Directory ready on {}", directory.local_addr());

    let shutdown = directory.shutdown_handle();
    let run = tokio::spawn(directory.run());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Interrupt received, stopping directory");
    let _ = shutdown.send(());
    let _ = run.await;
    Ok(())
}
