//! Discovery attaching new transcripts to a multiplexer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_tail::config::{DiscoveryConfig, WatchConfig};
use agent_tail::watcher::{
    DiscoveryHandler, DynamicDiscovery, MuxCallback, Registration, Source, SourceMultiplexer,
    WatcherError,
};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc;

struct MuxHandler {
    mux: Arc<SourceMultiplexer>,
    discovered: Mutex<Vec<(String, PathBuf)>>,
}

#[async_trait]
impl DiscoveryHandler for MuxHandler {
    fn session_discovered(&self, id: &str, path: &Path) {
        self.discovered
            .lock()
            .unwrap()
            .push((id.to_string(), path.to_path_buf()));
    }

    async fn attach(&self, id: &str, path: &Path) -> Result<(), WatcherError> {
        self.mux.add_source(Source::new(path, id)).await.map(|_| ())
    }
}

fn fast_discovery() -> DiscoveryConfig {
    DiscoveryConfig {
        rescan_debounce_ms: 20,
        early_rescan_delay_ms: 20,
        attach_initial_delay_ms: 10,
        attach_retry_delay_ms: 20,
        attach_max_retries: 50,
        ..DiscoveryConfig::default()
    }
}

fn setup() -> (
    TempDir,
    PathBuf,
    Arc<MuxHandler>,
    mpsc::UnboundedReceiver<(String, String)>,
) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("session").join("subagents");
    std::fs::create_dir_all(&dir).unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let on_line: MuxCallback = Arc::new(move |label: &str, line| {
        let _ = tx.send((label.to_string(), line));
    });
    let mux = Arc::new(SourceMultiplexer::new(
        WatchConfig {
            poll_interval_ms: 20,
        },
        on_line,
    ));
    let handler = Arc::new(MuxHandler {
        mux,
        discovered: Mutex::new(Vec::new()),
    });
    (temp_dir, dir, handler, rx)
}

async fn next_line(rx: &mut mpsc::UnboundedReceiver<(String, String)>) -> Option<(String, String)> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .ok()
        .flatten()
}

/// An inline report attaches the transcript even though it is written
/// after the report arrives.
#[tokio::test]
async fn test_inline_trigger_attaches_late_file() {
    let (_tmp, dir, handler, mut rx) = setup();
    let discovery = DynamicDiscovery::new(
        dir.clone(),
        Vec::<String>::new(),
        fast_discovery(),
        Arc::clone(&handler) as Arc<dyn DiscoveryHandler>,
    );

    assert_eq!(discovery.handle_inline_trigger("a0627b6"), Registration::New);
    tokio::time::sleep(Duration::from_millis(60)).await;
    std::fs::write(dir.join("agent-a0627b6.jsonl"), "{\"hello\":1}\n").unwrap();

    assert_eq!(
        next_line(&mut rx).await,
        Some(("a0627b6".to_string(), "{\"hello\":1}".to_string()))
    );
    assert_eq!(
        *handler.discovered.lock().unwrap(),
        vec![("a0627b6".to_string(), dir.join("agent-a0627b6.jsonl"))]
    );

    // Reported again: nothing new happens.
    assert_eq!(discovery.handle_inline_trigger("a0627b6"), Registration::Known);
    assert_eq!(handler.mux.source_count().await, 1);

    discovery.stop().await;
    handler.mux.stop().await;
}

/// Files created while watching are attached once each, however many
/// triggers observe them.
#[tokio::test]
async fn test_watch_and_triggers_converge_on_one_registration() {
    let (_tmp, dir, handler, mut rx) = setup();
    let discovery = DynamicDiscovery::new(
        dir.clone(),
        Vec::<String>::new(),
        fast_discovery(),
        Arc::clone(&handler) as Arc<dyn DiscoveryHandler>,
    );
    match discovery.start_watch() {
        Ok(()) => {}
        Err(WatcherError::Notify(e)) => {
            eprintln!("Skipping test due to system limit: {e}");
            return;
        }
        Err(e) => panic!("Unexpected error: {e}"),
    }

    std::fs::write(dir.join("agent-beefcafe.jsonl"), "first\n").unwrap();
    discovery.handle_early_trigger();
    discovery.handle_inline_trigger("beefcafe");

    assert_eq!(
        next_line(&mut rx).await,
        Some(("beefcafe".to_string(), "first".to_string()))
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(handler.discovered.lock().unwrap().len(), 1);
    assert_eq!(discovery.known_ids(), vec!["beefcafe"]);

    discovery.stop().await;
    handler.mux.stop().await;
}
