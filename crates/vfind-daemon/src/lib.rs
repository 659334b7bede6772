//! # vfind-daemon
//!
//! HTTP connector serving the configured volumes to a web file manager.
//!
//! ## Architecture
//!
//! One `vfindd` process owns:
//! - the volume registry built from `[[volumes]]`
//! - the chunk reassembler for resumable uploads
//! - the archive exporter and its one-shot artifact registry
//! - a sweeper task that expires unclaimed archives
//!
//! Every connector command arrives on a single route (GET or POST) and is
//! dispatched by [`CommandHandler`] on the blocking pool.

pub mod commands;
pub mod server;
pub mod sweeper;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::info;
use vfind_config::{log_server_info, log_volume_info, Config};
use vfind_core::{ArchiveExporter, ArtifactRegistry, LocalVolume, VolumeRegistry};

pub use commands::{CommandHandler, Reply};
pub use server::router;

/// Build the command handler from configuration.
///
/// Mounts every effective volume and creates the archive staging directory.
pub fn build_handler(config: &Config) -> Result<CommandHandler> {
    let mut registry = VolumeRegistry::new();
    for volume in config.effective_volumes()? {
        let local = LocalVolume::new(&volume.name, &volume.path)
            .with_context(|| format!("Failed to mount volume {}", volume.path.display()))?;
        let id = registry.register(Arc::new(local));
        log_volume_info!(
            "Volume mounted",
            name = volume.name.as_str(),
            id = id.as_str(),
            path = tracing::field::display(volume.path.display())
        );
    }

    let tmp_dir = config.archive.tmp_dir();
    std::fs::create_dir_all(&tmp_dir)
        .with_context(|| format!("Failed to create {}", tmp_dir.display()))?;
    let exporter = ArchiveExporter::new(
        tmp_dir,
        config.archive.max_size,
        Arc::new(ArtifactRegistry::new()),
    );

    Ok(CommandHandler::new(
        registry,
        exporter,
        config.server.upload_max_size.clone(),
    ))
}

/// Run the connector until ctrl-c
pub async fn run_server(config: Config) -> Result<()> {
    let handler = Arc::new(build_handler(&config)?);

    let sweeper = sweeper::spawn_sweeper(
        handler.exporter().artifacts().clone(),
        Duration::from_secs(config.artifacts.ttl_secs),
        Duration::from_secs(config.artifacts.sweep_interval_secs),
    );

    let app = router(
        handler.clone(),
        &config.server.route,
        config.server.max_body_bytes,
    );
    let listener = TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.listen))?;
    log_server_info!(
        "Listening",
        addr = tracing::field::display(listener.local_addr()?),
        route = config.server.route.as_str(),
        volumes = handler.registry().len()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(handle) = sweeper {
        handle.abort();
    }
    info!("vfindd stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
