//! # Strata Server
//!
//! Headless world server. Hosts every configured world with its own
//! fixed-rate tick thread and saves everything on ctrl-c.
//!
//! Usage: `strata [config.toml]`

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

mod config;
mod server;
mod sink;
mod timing;
mod wanderer;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use strata_world::BlockRegistry;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ServerConfig;
use crate::server::WorldGroup;

/// Main entry point.
fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("strata=info".parse()?))
        .init();

    info!("Strata server starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let path = std::env::args()
        .nth(1)
        .map_or_else(ServerConfig::config_path, PathBuf::from);
    if !path.exists() {
        if let Err(e) = ServerConfig::default().save_to(&path) {
            warn!("Could not write default config to {}: {e}", path.display());
        }
    }
    let config = ServerConfig::load_from(&path);
    info!(
        "Hosting {} world(s) from {}",
        config.worlds.len(),
        config.data_dir.display()
    );

    let registry = BlockRegistry::with_defaults();
    let group = WorldGroup::start(&config, &registry)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build signal runtime")?;
    runtime.block_on(wait_for_shutdown(&group))?;

    for name in group.names() {
        if let Some(status) = group.status(name) {
            info!(
                "World '{name}' at tick {}: {} resident, {} dirty, {} queued, {:.2} mspt",
                status.tick,
                status.resident,
                status.dirty,
                status.queued,
                status.mspt
            );
            let sent = status.sent;
            let observers = group.observers(name).map_or(0, |o| o.len());
            info!(
                "World '{name}' notifications to {observers} observer(s): {} chunks sent, {} withdrawn, {} entities shown, {} hidden",
                sent.chunks_sent, sent.chunks_withdrawn, sent.entities_shown, sent.entities_hidden
            );
        }
    }

    info!("Saving worlds...");
    let exits = group.stop();
    server::summarize(&exits)?;

    info!("Strata server shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or once every world has stopped on its own.
async fn wait_for_shutdown(group: &WorldGroup) -> Result<()> {
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                signal.context("Failed to listen for ctrl-c")?;
                info!("Shutdown requested");
                return Ok(());
            }
            _ = poll.tick() => {
                if group.all_stopped() {
                    warn!("Every world has stopped");
                    return Ok(());
                }
            }
        }
    }
}
