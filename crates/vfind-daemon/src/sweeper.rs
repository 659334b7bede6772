//! Background expiry of unclaimed archives.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use vfind_config::{log_archive_debug, log_archive_info};
use vfind_core::ArtifactRegistry;

/// Spawn the sweeper. Returns `None` when `ttl` or `every` is zero.
pub fn spawn_sweeper(
    artifacts: Arc<ArtifactRegistry>,
    ttl: Duration,
    every: Duration,
) -> Option<JoinHandle<()>> {
    if ttl.is_zero() || every.is_zero() {
        log_archive_info!("Archive sweeper disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let registry = artifacts.clone();
            let removed = tokio::task::spawn_blocking(move || registry.sweep(ttl))
                .await
                .unwrap_or(0);
            if removed > 0 {
                log_archive_info!("Expired unclaimed archives", count = removed);
            } else {
                log_archive_debug!("Sweep found nothing", pending = artifacts.len());
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_durations_disable() {
        let artifacts = Arc::new(ArtifactRegistry::new());
        assert!(spawn_sweeper(artifacts.clone(), Duration::ZERO, Duration::from_secs(1)).is_none());
        assert!(spawn_sweeper(artifacts, Duration::from_secs(1), Duration::ZERO).is_none());
    }

    #[tokio::test]
    async fn test_sweeper_expires_old_archives() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("old.zip");
        std::fs::write(&path, b"zip").unwrap();

        let artifacts = Arc::new(ArtifactRegistry::new());
        artifacts.put("old", &path);

        let handle = spawn_sweeper(
            artifacts.clone(),
            Duration::from_millis(1),
            Duration::from_millis(20),
        )
        .unwrap();

        let mut waited = 0;
        while artifacts.contains("old") && waited < 100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += 1;
        }
        handle.abort();

        assert!(!artifacts.contains("old"));
        assert!(!path.exists());
    }
}
