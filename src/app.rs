//! Wiring of tailer, decoders, sessions and discovery for one transcript.
//!
//! Lines from every source are funneled through a channel into a single
//! router task, which owns one decoder per source label. Decoded events
//! become session output; their discovery triggers drive
//! [`DynamicDiscovery`], which attaches new subagent transcripts back onto
//! the multiplexer.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::TailConfig;
use crate::decoder::{decode_all, DiscoveryTrigger, RecordDecoder, SourceFormat};
use crate::display::format_event;
use crate::session::{OutputSink, SessionRegistry, SwitchScheduler};
use crate::watcher::{
    discover_subagent_files, subagents_dir_for, DiscoveryHandler, DynamicDiscovery, MuxCallback,
    Source, SourceMultiplexer, WatcherError,
};

/// Label of the primary transcript in the session list.
pub const PRIMARY_LABEL: &str = "main";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Session id of a transcript: its file stem.
#[must_use]
pub fn session_id_for(path: &Path) -> String {
    path.file_stem()
        .map_or_else(|| path.display().to_string(), |s| s.to_string_lossy().into_owned())
}

/// Label shown for subagent `id`.
#[must_use]
pub fn subagent_label(id: &str) -> String {
    format!("agent-{id}")
}

/// Registers discovered subagents as sessions and tails their files.
struct AttachHandler {
    mux: Arc<SourceMultiplexer>,
    registry: Arc<Mutex<SessionRegistry>>,
    scheduler: Option<Arc<SwitchScheduler>>,
}

#[async_trait]
impl DiscoveryHandler for AttachHandler {
    fn session_discovered(&self, id: &str, path: &Path) {
        lock(&self.registry).add_session(id, &subagent_label(id), path);
        if let Some(scheduler) = &self.scheduler {
            scheduler.schedule(id);
        }
    }

    async fn attach(&self, id: &str, path: &Path) -> Result<(), WatcherError> {
        self.mux.add_source(Source::new(path, id)).await.map(|_| ())
    }
}

/// Turns raw lines into session output.
struct Router {
    primary: String,
    primary_format: SourceFormat,
    raw_mode: bool,
    decoders: HashMap<String, Box<dyn RecordDecoder>>,
    registry: Arc<Mutex<SessionRegistry>>,
    discovery: Option<Arc<DynamicDiscovery>>,
}

impl Router {
    fn route(&mut self, label: &str, line: &str) {
        let format = if label == self.primary {
            self.primary_format
        } else {
            SourceFormat::Jsonl
        };
        let decoder = self
            .decoders
            .entry(label.to_string())
            .or_insert_with(|| format.decoder());

        for event in decode_all(decoder.as_mut(), line) {
            let text = format_event(&event, self.raw_mode);
            lock(&self.registry).handle_output(label, &text);

            match &event.discovery {
                DiscoveryTrigger::None => {}
                DiscoveryTrigger::Early => {
                    if let Some(discovery) = &self.discovery {
                        if let Err(e) = discovery.start_watch() {
                            tracing::debug!(error = %e, "Subagent directory not watchable yet");
                        }
                        discovery.handle_early_trigger();
                    }
                }
                DiscoveryTrigger::Inline(id) => {
                    if let Some(discovery) = &self.discovery {
                        discovery.handle_inline_trigger(id);
                    }
                    lock(&self.registry).mark_done(id);
                }
            }
        }
    }
}

/// A running tail of one transcript and its subagents.
pub struct TailApp {
    registry: Arc<Mutex<SessionRegistry>>,
    mux: Arc<SourceMultiplexer>,
    discovery: Option<Arc<DynamicDiscovery>>,
    scheduler: Arc<SwitchScheduler>,
    router: Mutex<Option<JoinHandle<()>>>,
}

impl TailApp {
    /// Start tailing `session_path`.
    ///
    /// JSONL transcripts also get their existing subagents attached and
    /// their subagent directory watched.
    ///
    /// # Errors
    ///
    /// Returns an error if the transcript cannot be opened.
    pub async fn start(
        session_path: PathBuf,
        config: TailConfig,
        sink: Arc<dyn OutputSink>,
    ) -> Result<Self, WatcherError> {
        let primary = session_id_for(&session_path);
        let format = SourceFormat::from_path(&session_path);

        let mut registry =
            SessionRegistry::new(config.sessions.buffer_limit, sink).with_primary(&primary);
        registry.add_session(&primary, PRIMARY_LABEL, &session_path);
        let registry = Arc::new(Mutex::new(registry));

        let scheduler = Arc::new(SwitchScheduler::new(
            Arc::clone(&registry),
            config.sessions.switch_delay(),
        ));

        let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
        let on_line: MuxCallback = Arc::new(move |label: &str, line| {
            let _ = tx.send((label.to_string(), line));
        });
        let mux = Arc::new(SourceMultiplexer::new(config.watch.clone(), on_line));
        mux.add_source(Source::new(&session_path, &primary).with_mode(format.read_mode()))
            .await?;

        let discovery = match (format, subagents_dir_for(&session_path)) {
            (SourceFormat::Jsonl, Some(dir)) => {
                let known = attach_existing(&dir, &mux, &registry).await;
                let handler = Arc::new(AttachHandler {
                    mux: Arc::clone(&mux),
                    registry: Arc::clone(&registry),
                    scheduler: config.sessions.follow_new.then(|| Arc::clone(&scheduler)),
                });
                let discovery =
                    DynamicDiscovery::new(dir, known, config.discovery.clone(), handler);
                if let Err(e) = discovery.start_watch() {
                    tracing::debug!(
                        dir = %discovery.dir().display(),
                        error = %e,
                        "Subagent directory not watchable yet"
                    );
                }
                Some(Arc::new(discovery))
            }
            _ => None,
        };

        let mut router = Router {
            primary,
            primary_format: format,
            raw_mode: config.raw_mode,
            decoders: HashMap::new(),
            registry: Arc::clone(&registry),
            discovery: discovery.clone(),
        };
        let handle = tokio::spawn(async move {
            while let Some((label, line)) = rx.recv().await {
                router.route(&label, &line);
            }
        });

        Ok(Self {
            registry,
            mux,
            discovery,
            scheduler,
            router: Mutex::new(Some(handle)),
        })
    }

    /// Shared session registry.
    #[must_use]
    pub fn registry(&self) -> Arc<Mutex<SessionRegistry>> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn multiplexer(&self) -> &SourceMultiplexer {
        &self.mux
    }

    #[must_use]
    pub fn discovery(&self) -> Option<&DynamicDiscovery> {
        self.discovery.as_deref()
    }

    /// Stop every task. Safe to call more than once.
    pub async fn stop(&self) {
        if let Some(discovery) = &self.discovery {
            discovery.stop().await;
        }
        self.scheduler.stop().await;
        self.mux.stop().await;
        let router = lock(&self.router).take();
        if let Some(router) = router {
            router.abort();
            let _ = router.await;
        }
    }
}

/// Attach subagent transcripts that already exist. Returns their ids.
async fn attach_existing(
    dir: &Path,
    mux: &SourceMultiplexer,
    registry: &Mutex<SessionRegistry>,
) -> Vec<String> {
    let scan_dir = dir.to_path_buf();
    let scanned = tokio::task::spawn_blocking(move || discover_subagent_files(&scan_dir)).await;
    let mut agents = match scanned {
        Ok(Ok(agents)) => agents,
        Ok(Err(e)) => {
            tracing::debug!(dir = %dir.display(), error = %e, "No existing subagents");
            return Vec::new();
        }
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Subagent scan failed");
            return Vec::new();
        }
    };
    agents.sort();

    let mut known = Vec::with_capacity(agents.len());
    for (id, path) in agents {
        lock(registry).add_session(&id, &subagent_label(&id), &path);
        if let Err(e) = mux.add_source(Source::new(&path, &id)).await {
            tracing::warn!(id = %id, error = %e, "Failed to attach subagent transcript");
        }
        known.push(id);
    }
    known
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;
    use tempfile::TempDir;

    struct NullSink;

    impl OutputSink for NullSink {
        fn output(&self, _id: &str, _content: &str) {}
        fn switched(&self, _event: &crate::session::SwitchEvent) {}
    }

    fn quiet_parts() -> (SourceMultiplexer, Mutex<SessionRegistry>) {
        let on_line: MuxCallback = Arc::new(|_: &str, _| {});
        let mux = SourceMultiplexer::new(WatchConfig::default(), on_line);
        let registry = SessionRegistry::new(10, Arc::new(NullSink)).with_primary("main");
        (mux, Mutex::new(registry))
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_attach_existing_registers_valid_agents() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("subagents");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("agent-bbbbbbb.jsonl"), "").unwrap();
        std::fs::write(dir.join("agent-aaaaaaa.jsonl"), "").unwrap();
        std::fs::write(dir.join("agent-nothex.jsonl"), "").unwrap();

        let (mux, registry) = quiet_parts();
        let known = attach_existing(&dir, &mux, &registry).await;

        assert_eq!(known, vec!["aaaaaaa", "bbbbbbb"]);
        assert_eq!(mux.source_count().await, 2);
        assert_eq!(lock(&registry).len(), 2);
        mux.stop().await;
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_attach_existing_missing_dir_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let (mux, registry) = quiet_parts();
        let known = attach_existing(&temp_dir.path().join("absent"), &mux, &registry).await;
        assert!(known.is_empty());
        assert_eq!(mux.source_count().await, 0);
    }

    #[test]
    fn test_session_id_for() {
        assert_eq!(session_id_for(Path::new("/p/abc-123.jsonl")), "abc-123");
        assert_eq!(session_id_for(Path::new("/p/session-1.json")), "session-1");
    }

    #[test]
    fn test_subagent_label() {
        assert_eq!(subagent_label("a0627b6"), "agent-a0627b6");
    }
}
