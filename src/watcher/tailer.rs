//! Incremental file tailer.
//!
//! A [`FileTailer`] owns one path and emits every newly appended,
//! newline-terminated record exactly once, or in whole-document mode the full
//! file each time its content changes. Two triggers drive re-reads: `notify`
//! change events and a fixed-interval stat poll. Both funnel through a
//! [`ReadGate`], so at most one read is in flight per source and requests
//! that arrive mid-read collapse into a single follow-up read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::event::ModifyKind;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::error::WatcherError;
use crate::config::WatchConfig;

/// Callback receiving each emitted record.
pub type LineCallback = Arc<dyn Fn(String) + Send + Sync>;

/// Callback receiving unexpected I/O failures.
pub type ErrorCallback = Arc<dyn Fn(WatcherError) + Send + Sync>;

/// How a source file is split into records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Each newline-terminated line is one record.
    #[default]
    Lines,
    /// The whole file is one record, emitted when its content changes.
    WholeDocument,
}

/// SHA-256 of file content.
pub type Fingerprint = [u8; 32];

fn fingerprint(bytes: &[u8]) -> Fingerprint {
    Sha256::digest(bytes).into()
}

/// Chunk size used when hashing the consumed prefix from disk.
const PREFIX_CHUNK: usize = 64 * 1024;

/// Length of the newline-terminated part of `content`.
fn complete_len(content: &[u8]) -> usize {
    content
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1)
}

fn split_records(complete: &[u8]) -> impl Iterator<Item = String> + '_ {
    complete
        .split(|&b| b == b'\n')
        .take(complete.iter().filter(|&&b| b == b'\n').count())
        .map(|raw| {
            String::from_utf8_lossy(raw)
                .trim_end_matches('\r')
                .to_string()
        })
}

/// Read position of a tailed source.
///
/// Tracks how many complete records have been emitted and a fingerprint of
/// the bytes they came from. The record count only moves backwards through
/// [`SourceCursor::reset`], which happens when the file shrinks below the
/// cursor or the consumed prefix no longer matches its fingerprint.
#[derive(Debug, Clone, Default)]
pub struct SourceCursor {
    records: usize,
    consumed: usize,
    fingerprint: Option<Fingerprint>,
}

impl SourceCursor {
    /// Create a cursor positioned before the first record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of complete records consumed so far.
    #[must_use]
    pub fn records(&self) -> usize {
        self.records
    }

    /// Number of bytes covered by the consumed records.
    #[must_use]
    pub fn consumed_bytes(&self) -> usize {
        self.consumed
    }

    /// Forget everything; the next read replays the file from the start.
    pub fn reset(&mut self) {
        self.records = 0;
        self.consumed = 0;
        self.fingerprint = None;
    }

    /// Advance over the current file content in line mode.
    ///
    /// Returns the non-blank records at index >= cursor. A trailing line
    /// without a newline is left for a later read.
    pub fn advance_lines(&mut self, content: &[u8]) -> Vec<String> {
        let complete_len = complete_len(content);
        let complete = &content[..complete_len];
        let total = complete.iter().filter(|&&b| b == b'\n').count();

        if total < self.records {
            tracing::warn!(
                old_records = self.records,
                new_records = total,
                "Source truncated, resetting cursor"
            );
            self.reset();
        } else if self.consumed > 0
            && (self.consumed > complete_len
                || self.fingerprint != Some(fingerprint(&complete[..self.consumed])))
        {
            tracing::debug!(
                records = self.records,
                "Source rewritten in place, resetting cursor"
            );
            self.reset();
        }

        let lines = split_records(complete)
            .skip(self.records)
            .filter(|line| !line.trim().is_empty())
            .collect();

        self.records = total;
        self.consumed = complete_len;
        self.fingerprint = Some(fingerprint(complete));
        lines
    }

    /// Advance over bytes read past the consumed prefix.
    ///
    /// `prefix` must already be fed with the file's first
    /// [`consumed_bytes`](Self::consumed_bytes) bytes as they are now on
    /// disk. Returns `None` without moving when that prefix no longer
    /// matches; the caller then falls back to [`advance_lines`](Self::advance_lines)
    /// over the whole file.
    pub fn advance_appended(&mut self, prefix: Sha256, appended: &[u8]) -> Option<Vec<String>> {
        if self.consumed > 0 && self.fingerprint != Some(prefix.clone().finalize().into()) {
            return None;
        }

        let complete = &appended[..complete_len(appended)];
        let mut records = 0;
        let lines = split_records(complete)
            .inspect(|_| records += 1)
            .filter(|line| !line.trim().is_empty())
            .collect();

        let mut hasher = prefix;
        hasher.update(complete);
        self.records += records;
        self.consumed += complete.len();
        self.fingerprint = Some(hasher.finalize().into());
        Some(lines)
    }

    /// Advance over the current file content in whole-document mode.
    ///
    /// Returns the document when its fingerprint differs from the last one
    /// seen and it is not blank.
    pub fn advance_document(&mut self, content: &[u8]) -> Option<String> {
        let current = fingerprint(content);
        if self.fingerprint == Some(current) {
            return None;
        }
        self.fingerprint = Some(current);
        self.consumed = content.len();
        self.records = 1;

        let text = String::from_utf8_lossy(content).into_owned();
        if text.trim().is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

/// Re-entrancy guard for re-reads.
///
/// `request` returns `true` when the caller should start reading. While a
/// read is in flight, any number of further requests set one pending flag,
/// and `complete` then asks for exactly one more read.
#[derive(Debug, Clone, Default)]
pub struct ReadGate {
    in_flight: bool,
    pending: bool,
}

impl ReadGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a read. Returns `true` if the caller now owns the read.
    pub fn request(&mut self) -> bool {
        if self.in_flight {
            self.pending = true;
            false
        } else {
            self.in_flight = true;
            true
        }
    }

    /// Finish a read. Returns `true` if one more read must run.
    pub fn complete(&mut self) -> bool {
        if self.pending {
            self.pending = false;
            true
        } else {
            self.in_flight = false;
            false
        }
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

/// Cheap summary of file metadata compared by the poll trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
    identity: Option<u64>,
}

impl FileStamp {
    fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
            identity: file_identity(metadata),
        }
    }
}

#[cfg(unix)]
fn file_identity(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_identity(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Change notification forwarded from the notify thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsSignal {
    Changed,
    Replaced,
}

fn watch_file(path: &Path, tx: mpsc::UnboundedSender<FsSignal>) -> Option<RecommendedWatcher> {
    let handler = move |result: notify::Result<notify::Event>| match result {
        Ok(event) => {
            let signal = match event.kind {
                EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => FsSignal::Replaced,
                EventKind::Create(_) | EventKind::Modify(_) => FsSignal::Changed,
                _ => return,
            };
            let _ = tx.send(signal);
        }
        Err(e) => tracing::debug!(error = %e, "Notify error on tailed file"),
    };

    let mut watcher = match notify::recommended_watcher(handler) {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot create file watcher, polling only");
            return None;
        }
    };
    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
        tracing::warn!(
            path = %path.display(),
            error = %e,
            "Cannot watch file, polling only"
        );
        return None;
    }
    Some(watcher)
}

/// Tails one file on a background task.
///
/// Dropping the tailer cancels the task; [`FileTailer::stop`] also waits for
/// it so that no callback runs after `stop` returns.
#[derive(Debug)]
pub struct FileTailer {
    path: PathBuf,
    mode: ReadMode,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FileTailer {
    /// Start tailing `path`.
    ///
    /// All records already in the file are emitted first, then appended
    /// ones as they arrive.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::FileNotFound` or `WatcherError::PermissionDenied`
    /// if the file cannot be accessed when tailing starts.
    pub async fn start(
        path: PathBuf,
        mode: ReadMode,
        config: &WatchConfig,
        on_line: LineCallback,
        on_error: ErrorCallback,
    ) -> Result<Self, WatcherError> {
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| WatcherError::from_io(&path, e))?;
        if !metadata.is_file() {
            return Err(WatcherError::FileNotFound(path));
        }

        let cancel = CancellationToken::new();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let worker = TailWorker {
            path: path.clone(),
            mode,
            poll_interval: config.poll_interval(),
            cursor: SourceCursor::new(),
            gate: ReadGate::new(),
            stamp: None,
            failed: None,
            rewatch: false,
            watcher: None,
            signal_tx,
            on_line,
            on_error,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run(signal_rx));

        tracing::debug!(path = %path.display(), ?mode, "Started tailing");
        Ok(Self {
            path,
            mode,
            cancel,
            task: Some(task),
        })
    }

    /// Stop tailing. Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Returns `WatcherError::Task` if the background task panicked.
    pub async fn stop(&mut self) -> Result<(), WatcherError> {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.await?;
            tracing::debug!(path = %self.path.display(), "Stopped tailing");
        }
        Ok(())
    }

    /// Whether the background task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Get the path being tailed.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn mode(&self) -> ReadMode {
        self.mode
    }
}

impl Drop for FileTailer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct TailWorker {
    path: PathBuf,
    mode: ReadMode,
    poll_interval: Duration,
    cursor: SourceCursor,
    gate: ReadGate,
    stamp: Option<FileStamp>,
    failed: Option<FileStamp>,
    rewatch: bool,
    watcher: Option<RecommendedWatcher>,
    signal_tx: mpsc::UnboundedSender<FsSignal>,
    on_line: LineCallback,
    on_error: ErrorCallback,
    cancel: CancellationToken,
}

impl TailWorker {
    async fn run(mut self, mut signals: mpsc::UnboundedReceiver<FsSignal>) {
        self.watcher = watch_file(&self.path, self.signal_tx.clone());
        self.read_cycle(&mut signals).await;

        let mut poll = tokio::time::interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                Some(signal) = signals.recv() => {
                    if signal == FsSignal::Replaced {
                        self.rewatch = true;
                    }
                }
                _ = poll.tick() => {
                    if !self.stamp_changed().await {
                        continue;
                    }
                }
            }
            self.read_cycle(&mut signals).await;
        }

        self.watcher = None;
        tracing::trace!(path = %self.path.display(), "Tail worker exited");
    }

    /// Run one read, plus at most one follow-up per batch of requests that
    /// arrived while it was in flight.
    async fn read_cycle(&mut self, signals: &mut mpsc::UnboundedReceiver<FsSignal>) {
        if !self.gate.request() {
            return;
        }
        loop {
            if self.cancel.is_cancelled() {
                self.gate = ReadGate::new();
                return;
            }
            self.read_once().await;

            while let Ok(signal) = signals.try_recv() {
                if signal == FsSignal::Replaced {
                    self.rewatch = true;
                }
                let _ = self.gate.request();
            }
            if !self.gate.complete() {
                break;
            }
        }
    }

    async fn stamp_changed(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => self.stamp.as_ref() != Some(&FileStamp::from_metadata(&metadata)),
            Err(e) => e.kind() == ErrorKind::PermissionDenied,
        }
    }

    async fn read_once(&mut self) {
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            Err(e) => return self.read_failed(e, None),
        };

        let stamp = FileStamp::from_metadata(&metadata);
        if let Some(previous) = &self.stamp {
            if previous.identity.is_some() && previous.identity != stamp.identity {
                self.rewatch = true;
            }
        }
        if self.rewatch {
            self.reattach();
        }

        let records = match self.mode {
            ReadMode::Lines => self.read_lines(stamp.len).await,
            ReadMode::WholeDocument => tokio::fs::read(&self.path)
                .await
                .map(|content| self.cursor.advance_document(&content).into_iter().collect()),
        };
        let records = match records {
            Ok(records) => records,
            Err(e) => return self.read_failed(e, Some(stamp)),
        };
        self.stamp = Some(stamp);
        self.failed = None;

        for record in records {
            if self.cancel.is_cancelled() {
                return;
            }
            (self.on_line)(record);
        }
    }

    /// Read the records appended since the last read.
    ///
    /// Only bytes past the consumed prefix are buffered; the prefix itself is
    /// streamed through the hasher. A shrunken file or a changed prefix falls
    /// back to reading the whole file.
    async fn read_lines(&mut self, len: u64) -> std::io::Result<Vec<String>> {
        let consumed = self.cursor.consumed_bytes() as u64;
        if consumed > 0 && len >= consumed {
            let mut file = tokio::fs::File::open(&self.path).await?;
            let mut prefix = Sha256::new();
            let mut chunk = vec![0u8; PREFIX_CHUNK];
            let mut remaining = consumed;
            while remaining > 0 {
                let want = usize::try_from(remaining).map_or(PREFIX_CHUNK, |r| r.min(PREFIX_CHUNK));
                let n = file.read(&mut chunk[..want]).await?;
                if n == 0 {
                    break;
                }
                prefix.update(&chunk[..n]);
                remaining -= n as u64;
            }

            if remaining == 0 {
                let mut appended = Vec::new();
                file.read_to_end(&mut appended).await?;
                if let Some(lines) = self.cursor.advance_appended(prefix, &appended) {
                    return Ok(lines);
                }
            }
        }

        let content = tokio::fs::read(&self.path).await?;
        Ok(self.cursor.advance_lines(&content))
    }

    /// Missing and unreadable files are transient and retried on the next
    /// trigger. Anything else is reported once per file stamp.
    fn read_failed(&mut self, err: std::io::Error, stamp: Option<FileStamp>) {
        match err.kind() {
            ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "Source missing, waiting");
                self.stamp = None;
                self.rewatch = true;
            }
            ErrorKind::PermissionDenied => {
                tracing::debug!(path = %self.path.display(), "Source not readable, retrying");
                self.stamp = None;
            }
            _ => {
                if stamp.is_some() && self.failed == stamp {
                    tracing::debug!(path = %self.path.display(), error = %err, "Read still failing");
                    return;
                }
                self.failed = stamp;
                self.report(WatcherError::from_io(&self.path, err));
            }
        }
    }

    fn reattach(&mut self) {
        self.watcher = None;
        self.watcher = watch_file(&self.path, self.signal_tx.clone());
        self.cursor.reset();
        self.rewatch = false;
        tracing::debug!(path = %self.path.display(), "Source replaced, watch re-established");
    }

    fn report(&self, err: WatcherError) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::warn!(path = %self.path.display(), error = %err, "Read failed");
        (self.on_error)(err);
    }
}
