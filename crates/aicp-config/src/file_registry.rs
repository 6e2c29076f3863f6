//! File-backed `ConfigRegistry` implementation.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use aicp_core::config_registry::{ConfigChange, ConfigChangeStream, ConfigRegistry, ProxyTarget};
use aicp_core::error::{Error, Result};
use async_trait::async_trait;
use futures::stream;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
struct ProxyTargetFile {
    target_host: String,
    target_port: u16,
}

/// Reads the active proxy target from a YAML or TOML file on disk and
/// watches it for changes with `notify`.
#[derive(Debug)]
pub struct FileConfigRegistry {
    config_path: PathBuf,
    version: Arc<AtomicU32>,
}

impl FileConfigRegistry {
    pub async fn new(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config_path = config_path.into();

        let config_path = if config_path.starts_with("~") {
            dirs::home_dir()
                .ok_or_else(|| Error::Config("could not determine home directory".to_string()))?
                .join(config_path.strip_prefix("~").unwrap())
        } else {
            config_path
        };

        if !config_path.exists() {
            return Err(Error::ConfigNotFound);
        }

        info!(path = ?config_path, "initialized file config registry");

        Ok(Self {
            config_path,
            version: Arc::new(AtomicU32::new(1)),
        })
    }

    fn is_toml(&self) -> bool {
        self.config_path.extension().and_then(|s| s.to_str()) == Some("toml")
    }

    fn read_target(&self) -> Result<ProxyTarget> {
        let contents = std::fs::read_to_string(&self.config_path).map_err(|e| {
            error!(error = %e, "failed to read config file");
            Error::FilesystemWriteError(e)
        })?;

        let parsed: ProxyTargetFile = if self.is_toml() {
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid TOML config: {e}")))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("invalid YAML config: {e}")))?
        };

        debug!("read proxy target from config file");
        Ok(ProxyTarget {
            target_host: parsed.target_host,
            target_port: parsed.target_port,
        })
    }
}

#[async_trait]
impl ConfigRegistry for FileConfigRegistry {
    async fn current(&self) -> Result<ProxyTarget> {
        self.read_target()
    }

    async fn watch(&self) -> Result<ConfigChangeStream<'_>> {
        let (tx, rx) = mpsc::channel(100);

        let config_path = self.config_path.clone();
        let version = Arc::clone(&self.version);

        tokio::task::spawn_blocking(move || {
            let (notify_tx, notify_rx) = std::sync::mpsc::channel();

            let mut watcher = match RecommendedWatcher::new(
                move |res: std::result::Result<Event, notify::Error>| {
                    if let Err(e) = notify_tx.send(res) {
                        error!(error = %e, "failed to send file watch event");
                    }
                },
                notify::Config::default(),
            ) {
                Ok(w) => w,
                Err(e) => {
                    error!(error = %e, "failed to create file watcher");
                    return;
                }
            };

            if let Err(e) = watcher.watch(&config_path, RecursiveMode::NonRecursive) {
                error!(error = %e, "failed to watch config file");
                return;
            }

            info!(path = ?config_path, "watching config file for changes");

            while let Ok(event_result) = notify_rx.recv() {
                match event_result {
                    Ok(event) => {
                        if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                            let change = ConfigChange {
                                timestamp: chrono::Utc::now(),
                                version: version.fetch_add(1, Ordering::SeqCst) + 1,
                            };
                            if tx.blocking_send(Ok(change)).is_err() {
                                debug!("config change stream closed, stopping watcher");
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "file watch error");
                        if tx
                            .blocking_send(Err(Error::Internal(format!("file watch error: {e}"))))
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
        });

        let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) });

        Ok(Box::pin(stream))
    }
}
