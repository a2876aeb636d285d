//! Configuration file watcher for hot reload.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::loader::ConfigError;

/// Quiet period that must elapse after the last file event before a change
/// is reported.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// A watcher that monitors the configuration file for changes.
pub struct ConfigWatcher {
    path: PathBuf,
    debounce: Duration,
}

/// Keeps the watch alive; dropping it stops change notifications.
pub struct WatchGuard {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl ConfigWatcher {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            debounce: DEFAULT_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Start watching and invoke `on_change` once per burst of writes.
    ///
    /// The parent directory is watched rather than the file itself so that
    /// editors replacing the file through a rename are still observed. Must be
    /// called from within a tokio runtime.
    pub fn run<F>(self, on_change: F) -> Result<WatchGuard, ConfigError>
    where
        F: Fn() + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let file_name: Option<OsString> = self.path.file_name().map(|n| n.to_os_string());
        let watch_dir = self
            .path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create()) {
                        return;
                    }
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|p| p.file_name() == file_name.as_deref());
                    if touches_file {
                        let _ = tx.send(());
                    }
                }
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default(),
        )
        .map_err(|source| ConfigError::Watch {
            path: self.path.clone(),
            source,
        })?;

        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|source| ConfigError::Watch {
                path: self.path.clone(),
                source,
            })?;

        let debounce = self.debounce;
        let path = self.path.clone();
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                loop {
                    match tokio::time::timeout(debounce, rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                tracing::info!(path = ?path, "Config file change detected, reloading...");
                on_change();
            }
        });

        tracing::info!(path = ?self.path, "Config watcher started");
        Ok(WatchGuard {
            _watcher: watcher,
            task,
        })
    }
}
