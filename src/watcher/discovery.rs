//! Dynamic discovery of subagent transcripts.
//!
//! Watches a subagents directory for `agent-<id>.jsonl` files that appear
//! after tailing has started. Three paths lead to a registration: debounced
//! directory notifications, a delayed rescan requested by an early trigger,
//! and ids reported inline by decoded content. All of them go through
//! [`DiscoveryRegistry::register_if_new`], so each id is attached at most
//! once.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use notify_debouncer_full::{new_debouncer, notify::RecursiveMode, DebounceEventResult};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::WatcherError;
use super::locator::{agent_file_name, extract_agent_id};
use super::subagent::{DiscoveryRegistry, Registration};
use crate::config::DiscoveryConfig;

/// Receiver of discovery results.
#[async_trait]
pub trait DiscoveryHandler: Send + Sync {
    /// A new id was registered. Called once per id, before its file
    /// necessarily exists.
    fn session_discovered(&self, id: &str, path: &Path);

    /// Start tailing the file at `path`, which exists at call time.
    async fn attach(&self, id: &str, path: &Path) -> Result<(), WatcherError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Timers {
    watch: Option<JoinHandle<()>>,
    rescan: Option<JoinHandle<()>>,
    attaches: Vec<JoinHandle<()>>,
}

impl Timers {
    fn drain(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.attaches.drain(..).collect();
        handles.extend(self.watch.take());
        handles.extend(self.rescan.take());
        handles
    }
}

struct Inner {
    dir: PathBuf,
    config: DiscoveryConfig,
    registry: Mutex<DiscoveryRegistry>,
    handler: Arc<dyn DiscoveryHandler>,
    cancel: CancellationToken,
    timers: Mutex<Timers>,
}

/// Watches one directory for new subagent transcripts.
pub struct DynamicDiscovery {
    inner: Arc<Inner>,
}

impl DynamicDiscovery {
    /// Create a discovery for `dir`.
    ///
    /// `known_ids` are ids already attached by the caller; they are never
    /// registered again.
    pub fn new<I, S>(
        dir: PathBuf,
        known_ids: I,
        config: DiscoveryConfig,
        handler: Arc<dyn DiscoveryHandler>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = DiscoveryRegistry::with_known(known_ids, config.max_sources);
        Self {
            inner: Arc::new(Inner {
                dir,
                config,
                registry: Mutex::new(registry),
                handler,
                cancel: CancellationToken::new(),
                timers: Mutex::new(Timers::default()),
            }),
        }
    }

    /// Directory being watched.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Whether `stop` has not been called yet.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.inner.cancel.is_cancelled()
    }

    /// Known ids in sorted order.
    #[must_use]
    pub fn known_ids(&self) -> Vec<String> {
        lock(&self.inner.registry).ids()
    }

    /// Start watching the directory.
    ///
    /// If the directory does not exist yet its parent is watched instead,
    /// and the watch moves to the directory once it appears. Calling this
    /// again while a watch is running does nothing.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::DirectoryUnavailable` if neither the directory
    /// nor its parent exists, or `WatcherError::Notify` if the watch cannot
    /// be set up.
    pub fn start_watch(&self) -> Result<(), WatcherError> {
        if !self.is_active() {
            return Ok(());
        }
        let mut timers = lock(&self.inner.timers);
        if timers.watch.is_some() {
            return Ok(());
        }

        let dir = &self.inner.dir;
        let direct = dir.is_dir();
        let target = if direct {
            dir.as_path()
        } else {
            dir.parent()
                .filter(|p| p.is_dir())
                .ok_or_else(|| WatcherError::DirectoryUnavailable(dir.clone()))?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let mut debouncer = new_debouncer(
            self.inner.config.rescan_debounce(),
            None,
            move |result: DebounceEventResult| {
                let _ = tx.send(result);
            },
        )?;
        debouncer.watch(target, RecursiveMode::NonRecursive)?;
        if !direct {
            tracing::debug!(
                dir = %dir.display(),
                "Subagent directory missing, watching parent"
            );
        }

        let inner = Arc::clone(&self.inner);
        timers.watch = Some(tokio::spawn(async move {
            let mut debouncer = debouncer;
            let mut direct = direct;
            let mut rx = rx;

            if direct {
                inner.rescan().await;
            }
            loop {
                tokio::select! {
                    biased;
                    () = inner.cancel.cancelled() => break,
                    result = rx.recv() => match result {
                        None => break,
                        Some(Ok(_events)) => {
                            if !direct && inner.dir.is_dir() {
                                if let Some(parent) = inner.dir.parent() {
                                    let _ = debouncer.unwatch(parent);
                                }
                                match debouncer.watch(&inner.dir, RecursiveMode::NonRecursive) {
                                    Ok(()) => {
                                        direct = true;
                                        tracing::debug!(
                                            dir = %inner.dir.display(),
                                            "Subagent directory appeared, watching it"
                                        );
                                    }
                                    Err(e) => tracing::warn!(
                                        dir = %inner.dir.display(),
                                        error = %e,
                                        "Cannot watch subagent directory"
                                    ),
                                }
                            }
                            if inner.dir.is_dir() {
                                inner.rescan().await;
                            }
                        }
                        Some(Err(errors)) => {
                            for error in errors {
                                tracing::warn!(error = %error, "Directory watch error");
                            }
                        }
                    },
                }
            }
            drop(debouncer);
        }));

        tracing::info!(dir = %self.inner.dir.display(), "Watching for subagents");
        Ok(())
    }

    /// A decoded event signalled that a child is likely starting.
    ///
    /// Schedules a rescan after the configured delay, replacing any rescan
    /// still pending.
    pub fn handle_early_trigger(&self) {
        if !self.is_active() {
            return;
        }
        Inner::schedule_rescan(&self.inner, self.inner.config.early_rescan_delay());
    }

    /// A decoded event reported child `id` inline.
    pub fn handle_inline_trigger(&self, id: &str) -> Registration {
        if !self.is_active() {
            return Registration::Known;
        }
        Inner::register(&self.inner, id)
    }

    /// Stop watching and cancel every pending rescan and attach. Safe to
    /// call more than once.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handles = lock(&self.inner.timers).drain();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for DynamicDiscovery {
    fn drop(&mut self) {
        self.inner.cancel.cancel();
        for handle in lock(&self.inner.timers).drain() {
            handle.abort();
        }
    }
}

impl Inner {
    fn register(this: &Arc<Self>, id: &str) -> Registration {
        let outcome = lock(&this.registry).register_if_new(id);
        if outcome != Registration::New {
            return outcome;
        }

        let path = this.dir.join(agent_file_name(id));
        this.handler.session_discovered(id, &path);

        let inner = Arc::clone(this);
        let id = id.to_string();
        let handle = tokio::spawn(async move { inner.attach_with_retry(id, path).await });

        let mut timers = lock(&this.timers);
        timers.attaches.retain(|h| !h.is_finished());
        timers.attaches.push(handle);
        outcome
    }

    fn schedule_rescan(this: &Arc<Self>, delay: Duration) {
        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            if inner.pause(delay).await {
                inner.rescan().await;
            }
        });
        if let Some(previous) = lock(&this.timers).rescan.replace(handle) {
            previous.abort();
        }
    }

    async fn rescan(self: &Arc<Self>) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(dir = %self.dir.display(), error = %e, "Rescan skipped");
                return;
            }
        };

        let mut ids = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(id) = entry.file_name().to_str().and_then(extract_agent_id) {
                ids.push(id);
            }
        }

        for id in ids {
            if self.cancel.is_cancelled() {
                return;
            }
            Self::register(self, &id);
        }
    }

    /// Sleep unless cancelled. Returns `true` if the caller should proceed.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => !self.cancel.is_cancelled(),
        }
    }

    async fn attach_with_retry(&self, id: String, path: PathBuf) {
        if !self.pause(self.config.attach_initial_delay()).await {
            return;
        }

        let attempts = self.config.attach_max_retries.max(1);
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                return;
            }
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                match self.handler.attach(&id, &path).await {
                    Ok(()) => {
                        tracing::debug!(id = %id, attempt, "Attached subagent transcript");
                        return;
                    }
                    Err(e) => tracing::debug!(id = %id, error = %e, "Attach attempt failed"),
                }
            }
            if attempt < attempts && !self.pause(self.config.attach_retry_delay()).await {
                return;
            }
        }

        tracing::debug!(
            id = %id,
            path = %path.display(),
            attempts,
            "Subagent transcript never appeared, giving up"
        );
    }
}
