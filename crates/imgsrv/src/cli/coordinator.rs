//! The `imgsrv coordinator` command: run the designated reservation
//! authority for a multi-process deployment.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Args;
use imgsrv_core::{Config, Coordinator, CoordinatorServer};

use super::serve::shutdown_signal;

/// Default listen address when neither `--listen` nor
/// `coordinator.address` is set.
const DEFAULT_LISTEN: SocketAddr = SocketAddr::new(
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
    61236,
);

/// Arguments for the `coordinator` command.
#[derive(Args, Debug)]
pub struct CoordinatorArgs {
    /// Listen address (defaults to `coordinator.address`)
    #[arg(short, long)]
    pub listen: Option<SocketAddr>,
}

/// Execute the coordinator command.
pub async fn execute(args: CoordinatorArgs, config: Config) -> anyhow::Result<()> {
    let listen = args
        .listen
        .or(config.coordinator.address)
        .unwrap_or(DEFAULT_LISTEN);

    let authority = Coordinator::spawn_local(&config.coordinator);
    let server = CoordinatorServer::bind(listen, authority, &config.coordinator)
        .await
        .with_context(|| format!("Failed to bind coordinator on {listen}"))?;

    match config.lease_timeout() {
        Some(lease) => tracing::info!("Reservation lease: {}s", lease.as_secs_f64()),
        None => tracing::warn!("Reservation leases disabled; a crashed owner blocks its waiters"),
    }

    tokio::select! {
        result = server.run() => result.context("Coordinator stopped")?,
        _ = shutdown_signal() => {}
    }
    Ok(())
}
