//! Watcher module tests.

mod discovery_test;
mod tailer_test;

/// Verify the public watcher types are exported from the library.
#[test]
fn test_all_watcher_types_exported() {
    use agent_tail::watcher::{
        is_valid_agent_id, DiscoveryRegistry, ReadGate, ReadMode, Registration, SessionIndex,
        Source, SourceCursor, WatcherError, DEFAULT_MAX_SUBAGENTS, INDEX_VERSION,
    };

    let _ = SourceCursor::new();
    let _ = ReadGate::new();
    let _ = SessionIndex::new();
    let _ = Source::new("/tmp/a.jsonl", "a").with_mode(ReadMode::WholeDocument);
    let _: fn(std::path::PathBuf) -> WatcherError = WatcherError::FileNotFound;

    let mut registry = DiscoveryRegistry::new(DEFAULT_MAX_SUBAGENTS);
    assert_eq!(registry.register_if_new("a0627b6"), Registration::New);
    assert!(is_valid_agent_id(&"0".repeat(40)));
    assert_eq!(INDEX_VERSION, 1);
}
