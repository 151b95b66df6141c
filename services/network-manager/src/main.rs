//! trellis Network Manager
//!
//! Runs one reconciler per configured network address against the cluster
//! store. Each reconciler converges the cluster toward the topology document
//! stored at its address and maintains the network's readiness key.
//!
//! ## Architecture
//!
//! - **Supervisor**: Spawns and stops reconciler actors
//! - **Reconciler**: Reacts to topology create/update/delete events
//! - **Cluster**: In-memory local cluster (dev mode)

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use trellis_id::ManagerId;
use trellis_manager::{ClusterStore, Config, LocalCluster, ManagerSupervisor};
use trellis_topology::NetworkDescriptor;

#[tokio::main]
async fn main() -> Result<()> {
    // Configuration errors are fatal before anything else starts.
    let config = Config::from_env().context("failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.as_str().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let manager_id = ManagerId::new();
    info!(manager_id = %manager_id, "Starting trellis network manager");
    info!(
        networks = config.networks.len(),
        cluster = %config.cluster,
        stage_timeout_secs = config.stage_timeout.as_secs(),
        "Configuration loaded"
    );

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let cluster = Arc::new(LocalCluster::new());

    let mut supervisor = ManagerSupervisor::new(&config, Arc::clone(&cluster), shutdown_rx);
    supervisor.start(&config.networks)?;
    supervisor.wait_started().await?;

    if let Some(path) = &config.topology_file {
        seed_topology(cluster.as_ref(), path).await?;
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Received shutdown signal");

    let _ = shutdown_tx.send(true);
    supervisor.shutdown().await;

    info!(manager_id = %manager_id, "Network manager shutdown complete");
    Ok(())
}

/// Write a topology document under its network address.
async fn seed_topology(cluster: &LocalCluster, path: &std::path::Path) -> Result<()> {
    let document = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read topology file {}", path.display()))?;
    let network = NetworkDescriptor::from_json(&document)
        .with_context(|| format!("invalid topology file {}", path.display()))?;

    if cluster.exists(&network.address).await? {
        warn!(network = %network.address, "Topology already stored, not seeding");
        return Ok(());
    }

    info!(network = %network.address, path = %path.display(), "Seeding topology");
    cluster.set(&network.address, document).await?;
    Ok(())
}
