use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::{info, warn};

use sighting_projector::config::ServerConfig;
use sighting_projector::server;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let provider = config.directions.build().context("failed to build directions client")?;
    let registry = config.registry.build().context("failed to build registry client")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        }) {
            warn!("Failed to install shutdown handler: {err}");
        }
    }

    let summary = server::run(&config, provider, registry, &shutdown).context("server failed")?;
    info!(
        connections = summary.connections,
        cache_entries = summary.cache_entries,
        "shut down cleanly"
    );
    Ok(())
}
