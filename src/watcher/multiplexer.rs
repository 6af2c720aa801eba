//! Fan-in of many tailed sources.
//!
//! Each source gets its own [`FileTailer`]; lines are tagged with the
//! source label and forwarded to a single callback.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::WatcherError;
use super::tailer::{ErrorCallback, FileTailer, LineCallback, ReadMode};
use crate::config::WatchConfig;

/// Callback receiving `(label, line)` pairs from every source.
pub type MuxCallback = Arc<dyn Fn(&str, String) + Send + Sync>;

/// A file to tail and the label its lines are tagged with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: PathBuf,
    pub label: String,
    pub mode: ReadMode,
}

impl Source {
    /// Line-mode source.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
            mode: ReadMode::Lines,
        }
    }

    /// Set the read mode.
    #[must_use]
    pub fn with_mode(mut self, mode: ReadMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Owns one tailer per source path.
pub struct SourceMultiplexer {
    config: WatchConfig,
    on_line: MuxCallback,
    tailers: Mutex<HashMap<PathBuf, FileTailer>>,
}

impl SourceMultiplexer {
    /// Create an empty multiplexer.
    #[must_use]
    pub fn new(config: WatchConfig, on_line: MuxCallback) -> Self {
        Self {
            config,
            on_line,
            tailers: Mutex::new(HashMap::new()),
        }
    }

    /// Create a multiplexer and attach every source in `sources`.
    ///
    /// # Errors
    ///
    /// Returns the first error from attaching a source. Sources attached
    /// before the failure are stopped.
    pub async fn start(
        sources: Vec<Source>,
        config: WatchConfig,
        on_line: MuxCallback,
    ) -> Result<Self, WatcherError> {
        let mux = Self::new(config, on_line);
        for source in sources {
            if let Err(e) = mux.add_source(source).await {
                mux.stop().await;
                return Err(e);
            }
        }
        Ok(mux)
    }

    /// Start tailing `source`.
    ///
    /// Returns `Ok(false)` without side effects if the path is already
    /// tracked.
    ///
    /// # Errors
    ///
    /// Returns an error if the source file cannot be opened.
    pub async fn add_source(&self, source: Source) -> Result<bool, WatcherError> {
        let mut tailers = self.tailers.lock().await;
        if tailers.contains_key(&source.path) {
            tracing::trace!(path = %source.path.display(), "Source already tracked");
            return Ok(false);
        }

        let label = source.label.clone();
        let forward = Arc::clone(&self.on_line);
        let on_line: LineCallback = Arc::new(move |line| forward(&label, line));

        let error_label = source.label.clone();
        let on_error: ErrorCallback = Arc::new(move |err| {
            tracing::warn!(label = %error_label, error = %err, "Source read error");
        });

        let tailer =
            FileTailer::start(source.path.clone(), source.mode, &self.config, on_line, on_error)
                .await?;
        tracing::info!(
            label = %source.label,
            path = %source.path.display(),
            "Attached source"
        );
        tailers.insert(source.path, tailer);
        Ok(true)
    }

    /// Whether `path` is already being tailed.
    pub async fn has_source(&self, path: &Path) -> bool {
        self.tailers.lock().await.contains_key(path)
    }

    /// Number of attached sources.
    pub async fn source_count(&self) -> usize {
        self.tailers.lock().await.len()
    }

    /// Stop every tailer. Safe to call more than once.
    ///
    /// A tailer that fails to stop is logged and does not keep the others
    /// running.
    pub async fn stop(&self) {
        let drained: Vec<(PathBuf, FileTailer)> = self.tailers.lock().await.drain().collect();
        let stops = drained.into_iter().map(|(path, mut tailer)| async move {
            if let Err(e) = tailer.stop().await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to stop tailer");
            }
        });
        futures_util::future::join_all(stops).await;
    }
}
