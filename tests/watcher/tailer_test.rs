//! Tailing under concurrent writers.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_tail::config::WatchConfig;
use agent_tail::watcher::{
    ErrorCallback, FileTailer, LineCallback, MuxCallback, ReadMode, Source, SourceMultiplexer,
};
use tempfile::TempDir;
use tokio::sync::mpsc;

fn fast_config() -> WatchConfig {
    WatchConfig {
        poll_interval_ms: 20,
    }
}

fn line_channel() -> (LineCallback, ErrorCallback, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let on_line: LineCallback = Arc::new(move |line| {
        let _ = tx.send(line);
    });
    let on_error: ErrorCallback = Arc::new(|err| panic!("unexpected tail error: {err}"));
    (on_line, on_error, rx)
}

async fn collect(rx: &mut mpsc::UnboundedReceiver<String>, n: usize) -> Vec<String> {
    let mut out = Vec::new();
    while out.len() < n {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(line)) => out.push(line),
            _ => break,
        }
    }
    out
}

fn open_append(path: &Path) -> std::fs::File {
    std::fs::OpenOptions::new().append(true).open(path).unwrap()
}

/// Records written in bursts, some split across two writes, arrive exactly
/// once and in file order.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_appends_no_duplication_no_loss() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("session.jsonl");
    std::fs::write(&path, "").unwrap();

    let (on_line, on_error, mut rx) = line_channel();
    let mut tailer =
        FileTailer::start(path.clone(), ReadMode::Lines, &fast_config(), on_line, on_error)
            .await
            .unwrap();

    let writer_path = path.clone();
    let writer = tokio::task::spawn_blocking(move || {
        let mut file = open_append(&writer_path);
        for i in 0..200 {
            let record = format!("{{\"n\":{i}}}\n");
            if i % 7 == 0 {
                let (head, tail) = record.split_at(4);
                file.write_all(head.as_bytes()).unwrap();
                file.flush().unwrap();
                std::thread::sleep(Duration::from_millis(3));
                file.write_all(tail.as_bytes()).unwrap();
            } else {
                file.write_all(record.as_bytes()).unwrap();
            }
            file.flush().unwrap();
            if i % 25 == 0 {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    });
    writer.await.unwrap();

    let got = collect(&mut rx, 200).await;
    let expected: Vec<String> = (0..200).map(|i| format!("{{\"n\":{i}}}")).collect();
    assert_eq!(got, expected);

    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "duplicate line emitted: {extra:?}");
    tailer.stop().await.unwrap();
}

/// After truncation only the new content is emitted.
#[tokio::test]
async fn test_truncate_then_rewrite_emits_new_content_once() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("session.jsonl");
    std::fs::write(&path, "one\ntwo\nthree\n").unwrap();

    let (on_line, on_error, mut rx) = line_channel();
    let mut tailer =
        FileTailer::start(path.clone(), ReadMode::Lines, &fast_config(), on_line, on_error)
            .await
            .unwrap();
    assert_eq!(collect(&mut rx, 3).await, vec!["one", "two", "three"]);

    std::fs::write(&path, "fresh\n").unwrap();
    assert_eq!(collect(&mut rx, 1).await, vec!["fresh"]);

    writeln!(open_append(&path), "after").unwrap();
    assert_eq!(collect(&mut rx, 1).await, vec!["after"]);

    tailer.stop().await.unwrap();
}

/// Lines from several sources keep per-source order through the
/// multiplexer.
#[tokio::test]
async fn test_multiplexer_preserves_per_source_order() {
    let temp_dir = TempDir::new().unwrap();
    let a = temp_dir.path().join("a.jsonl");
    let b = temp_dir.path().join("b.jsonl");
    std::fs::write(&a, "").unwrap();
    std::fs::write(&b, "").unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let on_line: MuxCallback = Arc::new(move |label: &str, line| {
        let _ = tx.send((label.to_string(), line));
    });
    let mux = SourceMultiplexer::start(
        vec![Source::new(&a, "a"), Source::new(&b, "b")],
        fast_config(),
        on_line,
    )
    .await
    .unwrap();

    {
        let mut fa = open_append(&a);
        let mut fb = open_append(&b);
        for i in 0..20 {
            writeln!(fa, "a{i}").unwrap();
            writeln!(fb, "b{i}").unwrap();
        }
    }

    let mut per_a = Vec::new();
    let mut per_b = Vec::new();
    while per_a.len() + per_b.len() < 40 {
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some((label, line))) if label == "a" => per_a.push(line),
            Ok(Some((_, line))) => per_b.push(line),
            _ => break,
        }
    }
    assert_eq!(per_a, (0..20).map(|i| format!("a{i}")).collect::<Vec<_>>());
    assert_eq!(per_b, (0..20).map(|i| format!("b{i}")).collect::<Vec<_>>());

    mux.stop().await;
}
