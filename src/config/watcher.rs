//! Configuration file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::{load_config, ConfigError};
use crate::config::schema::GuardConfig;
use crate::config::snapshot::SnapshotHandle;

/// Anything that can produce a fresh configuration on demand.
pub trait ConfigSource: Send + Sync + 'static {
    fn load(&self) -> Result<GuardConfig, ConfigError>;
}

/// Configuration read from a TOML file.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn load(&self) -> Result<GuardConfig, ConfigError> {
        load_config(&self.path)
    }
}

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    source: FileSource,
    update_tx: mpsc::UnboundedSender<GuardConfig>,
}

impl ConfigWatcher {
    /// Create a new ConfigWatcher.
    ///
    /// Returns the watcher and a receiver for validated configurations.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<GuardConfig>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                source: FileSource::new(path),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching. The returned watcher must be kept alive.
    ///
    /// The parent directory is watched so editors that replace the file
    /// by rename are still picked up.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let Self { source, update_tx } = self;
        let path = source.path().to_path_buf();
        let file_name = path.file_name().map(|n| n.to_os_string());
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };

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

                    tracing::info!("Config file change detected, reloading...");
                    match source.load() {
                        Ok(config) => {
                            let _ = update_tx.send(config);
                        }
                        Err(e) => {
                            tracing::error!(
                                "Failed to reload config: {}. Keeping current configuration.",
                                e
                            );
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?path, "Config watcher started");
        Ok(watcher)
    }
}

/// Apply every configuration received on `rx` to `handle`.
///
/// Ends when the sending side is dropped.
pub fn spawn_reloader(
    mut rx: mpsc::UnboundedReceiver<GuardConfig>,
    handle: SnapshotHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(config) = rx.recv().await {
            if let Err(errors) = handle.replace(config) {
                for error in &errors {
                    tracing::error!(%error, "Rejected configuration update");
                }
            }
        }
        tracing::debug!("Config reloader stopped");
    })
}

/// Load from `source` and publish to `handle` once.
pub fn reload_from(source: &dyn ConfigSource, handle: &SnapshotHandle) -> Result<u64, ConfigError> {
    let config = source.load()?;
    handle.replace(config).map_err(ConfigError::Validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    struct Fixed(GuardConfig);

    impl ConfigSource for Fixed {
        fn load(&self) -> Result<GuardConfig, ConfigError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn reloader_applies_updates_in_order() {
        let handle = SnapshotHandle::new(GuardConfig::default()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_reloader(rx, handle.clone());

        let mut first = GuardConfig::default();
        first.rate_limit.default.capacity = 3;
        let mut second = GuardConfig::default();
        second.rate_limit.default.capacity = 9;
        tx.send(first).unwrap();
        tx.send(second).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(handle.version(), 3);
        assert_eq!(handle.load().config().rate_limit.default.capacity, 9);
    }

    #[test]
    fn reload_from_source() {
        let handle = SnapshotHandle::new(GuardConfig::default()).unwrap();
        let mut config = GuardConfig::default();
        config.default_deadline_ms = Some(100);

        assert_eq!(reload_from(&Fixed(config), &handle).unwrap(), 2);
        assert_eq!(handle.load().config().default_deadline_ms, Some(100));
    }

    #[test]
    fn file_source_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_deadline_ms = 750").unwrap();

        let config = FileSource::new(file.path()).load().unwrap();
        assert_eq!(config.default_deadline_ms, Some(750));
    }
}
