//! Configuration file watcher for hot reload of the routing table.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::loader::load_config;
use crate::config::schema::ServiceConfig;
use crate::distributor::Distributor;

/// A watcher that monitors the configuration file for changes.
///
/// The parent directory is watched so that editors replacing the file by
/// rename are still noticed.
pub struct ConfigWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<ServiceConfig>,
}

impl ConfigWatcher {
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<ServiceConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. Dropping the returned handle stops the watch.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx;
        let path = self.path.clone();
        let file_name = path.file_name().map(|n| n.to_os_string());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let relevant = event.kind.is_modify() || event.kind.is_create();
                    let ours = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if !(relevant && ours) {
                        return;
                    }
                    tracing::info!(path = ?path, "Config file change detected, reloading");
                    match load_config(&path) {
                        Ok(new_config) => {
                            let _ = tx.send(new_config);
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to reload config, keeping current targets");
                        }
                    }
                }
                Err(e) => tracing::error!(error = %e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(watcher)
    }
}

/// Install the targets of every reloaded configuration.
///
/// Returns when the watcher is dropped or the distributor is closed.
pub async fn apply_target_updates(
    mut updates: mpsc::UnboundedReceiver<ServiceConfig>,
    distributor: Arc<Distributor>,
) {
    while let Some(config) = updates.recv().await {
        let count = config.targets.len();
        match distributor.set_targets(config.targets).await {
            Ok(()) => tracing::info!(targets = count, "Routing table reloaded"),
            Err(crate::routing::ConfigError::Closed) => break,
            Err(e) => tracing::error!(error = %e, "Rejected reloaded targets"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_rewritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("directip.toml");
        std::fs::write(&path, "").unwrap();

        let (watcher, mut updates) = ConfigWatcher::new(&path);
        let _handle = watcher.run().unwrap();

        std::fs::write(
            &path,
            "[[targets]]\nimei_pattern = \"^300\"\nbackend = \"http://localhost/\"\n",
        )
        .unwrap();

        let config = loop {
            let config = tokio::time::timeout(Duration::from_secs(5), updates.recv())
                .await
                .expect("no reload within 5s")
                .unwrap();
            if !config.targets.is_empty() {
                break config;
            }
        };
        assert_eq!(config.targets[0].imei_pattern, "^300");
    }
}
