//! Live middleware pipeline sources.
//!
//! The agent manager reads its pipeline through `PipelineSource` on every
//! client resolution. These sources let that list be fixed, replaced
//! programmatically, or reloaded from the config file while running.

use crate::{ConfigError, ParleyConfig};
use parley_core::PipelineSource;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A pipeline that never changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticPipeline(pub Vec<String>);

impl PipelineSource for StaticPipeline {
    fn current(&self) -> Vec<String> {
        self.0.clone()
    }
}

/// A pipeline that can be replaced at runtime.
///
/// Clones share the same underlying list.
#[derive(Debug, Clone)]
pub struct WatchedPipeline {
    tx: Arc<watch::Sender<Vec<String>>>,
}

impl WatchedPipeline {
    pub fn new(initial: Vec<String>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the list. Takes effect on the next client resolution.
    pub fn set(&self, middleware: Vec<String>) {
        self.tx.send_if_modified(|current| {
            if *current == middleware {
                return false;
            }
            info!(pipeline = ?middleware, "Middleware pipeline updated");
            *current = middleware;
            true
        });
    }

    /// Receive a notification on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<String>> {
        self.tx.subscribe()
    }
}

impl Default for WatchedPipeline {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PipelineSource for WatchedPipeline {
    fn current(&self) -> Vec<String> {
        self.tx.borrow().clone()
    }
}

/// Republishes `[pipeline].middleware` whenever the config file changes.
///
/// Change detection is by modification time. A file that fails to load is
/// logged and the previous pipeline stays in effect.
pub struct PipelineFileWatcher {
    path: PathBuf,
    pipeline: WatchedPipeline,
    last_modified: Option<SystemTime>,
}

impl PipelineFileWatcher {
    pub fn new(path: impl Into<PathBuf>, pipeline: WatchedPipeline) -> Self {
        Self {
            path: path.into(),
            pipeline,
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reload if the file changed since the last check.
    ///
    /// Returns whether a reload happened.
    pub fn check(&mut self) -> Result<bool, ConfigError> {
        let modified = std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .map_err(|e| ConfigError::ReadError {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;

        if self.last_modified == Some(modified) {
            return Ok(false);
        }

        let config = ParleyConfig::load_from(&self.path)?;
        self.last_modified = Some(modified);
        debug!(path = %self.path.display(), "Config file changed, reloading pipeline");
        self.pipeline.set(config.pipeline.middleware);
        Ok(true)
    }

    /// Poll every `interval` until `cancel` fires.
    pub fn spawn(mut self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!(path = %self.path.display(), "Pipeline watcher stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.check() {
                            warn!(path = %self.path.display(), error = %e, "Pipeline reload failed, keeping previous pipeline");
                        }
                    }
                }
            }
        })
    }
}
