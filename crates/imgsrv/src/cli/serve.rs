//! The `imgsrv serve` command: run the HTTP server.

use std::net::SocketAddr;

use anyhow::Context;
use clap::Args;
use imgsrv_core::{Config, CoordinatorMode, ImgSrv};

use crate::http::{build_router, AppState};

/// Arguments for the `serve` command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides `server.bind`)
    #[arg(short, long, env = "IMGSRV_BIND")]
    pub bind: Option<SocketAddr>,

    /// Use the designated coordinator at this address instead of an
    /// in-process one
    #[arg(long, env = "IMGSRV_COORDINATOR")]
    pub coordinator: Option<SocketAddr>,
}

/// Execute the serve command.
pub async fn execute(args: ServeArgs, mut config: Config) -> anyhow::Result<()> {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(addr) = args.coordinator {
        config.coordinator.mode = CoordinatorMode::Remote;
        config.coordinator.address = Some(addr);
    }

    let bind = config.server.bind;
    let imgsrv = ImgSrv::new(config)
        .await
        .context("Failed to initialise imgsrv")?;
    let app = build_router(AppState { imgsrv });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    tracing::info!("imgsrv listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("imgsrv stopped");
    Ok(())
}

pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
