//! Service Controller
//!
//! Publishes externally exposed Services through the firewall.
//!
//! For every Service with ports and external IPs, this controller requests a
//! public address from the annotated pool (`IP`), then maps it onto the
//! Service's external IP (`NAT`) and opens it in a `Security` policy. The
//! resources are released when the last Service using the address goes away.

mod allocation;
mod cleanup;
mod config;
mod controller;
mod error;
mod events;
mod guard;
mod policy;
mod reconciler;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::Cli;
use crate::error::ControllerError;
use clap::Parser;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    info!("Starting Service Controller {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration:");
    info!("  Namespace: {}", cli.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Ignored namespaces: {:?}", cli.ignore_namespaces);
    info!("  Default pool: {}", cli.default_pool);
    info!("  Workers: {}", cli.workers);
    info!("  Resync period: {}s", cli.resync_period);

    let controller = Controller::new(&cli).await?;
    controller.run().await?;

    Ok(())
}
