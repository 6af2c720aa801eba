//! Session registry fed by decoded transcript lines.

use std::path::Path;
use std::sync::{Arc, Mutex};

use agent_tail::decoder::{decode_all, JsonlDecoder};
use agent_tail::display::format_event;
use agent_tail::session::{OutputSink, SessionRegistry, SessionStatus, SwitchEvent};

#[derive(Default)]
struct Capture {
    printed: Mutex<Vec<String>>,
    switches: Mutex<Vec<SwitchEvent>>,
}

impl OutputSink for Capture {
    fn output(&self, _id: &str, content: &str) {
        self.printed.lock().unwrap().push(content.to_string());
    }

    fn switched(&self, event: &SwitchEvent) {
        self.switches.lock().unwrap().push(event.clone());
    }
}

const CHILD_LINES: &[&str] = &[
    r#"{"type":"user","message":{"role":"user","content":"Explore the repo"}}"#,
    r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Looking"},{"type":"tool_use","id":"t","name":"Glob","input":{"pattern":"**/*.rs"}}]}}"#,
];

#[test]
fn test_buffered_child_output_replayed_on_switch() {
    let sink = Arc::new(Capture::default());
    let mut registry =
        SessionRegistry::new(100, Arc::clone(&sink) as Arc<dyn OutputSink>).with_primary("main");
    registry.add_session("main", "main", Path::new("/t/main.jsonl"));
    registry.add_session("a0627b6", "agent-a0627b6", Path::new("/t/agent-a0627b6.jsonl"));

    let mut decoder = JsonlDecoder::new();
    for line in CHILD_LINES {
        for event in decode_all(&mut decoder, line) {
            registry.handle_output("a0627b6", &format_event(&event, false));
        }
    }
    assert!(sink.printed.lock().unwrap().is_empty());

    let event = registry.switch_to("a0627b6").unwrap();
    assert_eq!(
        event.history,
        vec![
            "[USER] Explore the repo",
            "[ASSISTANT] Looking",
            "[TOOL] Glob **/*.rs",
        ]
    );

    registry.mark_done("a0627b6");
    registry.handle_output("a0627b6", "[SYSTEM] late line");
    assert_eq!(*sink.printed.lock().unwrap(), vec!["[SYSTEM] late line"]);
    assert_eq!(registry.active().unwrap().status, SessionStatus::Done);
    assert_eq!(sink.switches.lock().unwrap().len(), 1);
}

#[test]
fn test_display_order_newest_after_primary() {
    let sink = Arc::new(Capture::default());
    let mut registry = SessionRegistry::new(10, sink).with_primary("main");
    for id in ["main", "s1", "s2", "s3"] {
        registry.add_session(id, id, Path::new("/t/x.jsonl"));
    }
    let snapshot = registry.snapshot();
    let ids: Vec<&str> = snapshot.sessions.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["main", "s3", "s2", "s1"]);
    assert_eq!(snapshot.active_index, Some(0));
}
