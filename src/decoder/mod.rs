//! Stateful decoding of raw records into display events.
//!
//! A decoder is called repeatedly with the same record until it returns
//! `None`. Each call yields the next logical event of that record, so one
//! physical line can expand into several events without the caller
//! buffering them.

mod document;
mod event;
mod jsonl;

use std::path::Path;

pub use document::{DocumentDecoder, DocumentMessage, DocumentToolCall, TranscriptDocument};
pub use event::{DiscoveryTrigger, Event, EventKind};
pub use jsonl::{
    AssistantMessage, AssistantRecord, ContentBlock, JsonlDecoder, Message, MessageContent,
    SummaryRecord, SystemRecord, TranscriptRecord, UserRecord,
};

use crate::watcher::ReadMode;

/// Decodes one record into a finite sequence of events.
pub trait RecordDecoder: Send {
    /// Return the next event of `record`, or `None` once it is exhausted.
    ///
    /// Passing a different record while one is in progress abandons the
    /// old one.
    fn decode(&mut self, record: &str) -> Option<Event>;

    /// Whether no record is partially decoded.
    fn is_idle(&self) -> bool;
}

/// Drain every event of `record`.
pub fn decode_all(decoder: &mut dyn RecordDecoder, record: &str) -> Vec<Event> {
    std::iter::from_fn(|| decoder.decode(record)).collect()
}

/// In-progress decomposition of one record.
#[derive(Debug)]
pub struct DecodeState {
    record: String,
    parts: Vec<Event>,
    cursor: usize,
}

impl DecodeState {
    fn new(record: &str, parts: Vec<Event>) -> Self {
        Self {
            record: record.to_string(),
            parts,
            cursor: 0,
        }
    }

    /// Record being decoded.
    #[must_use]
    pub fn record(&self) -> &str {
        &self.record
    }

    /// Events not yet returned.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.parts.len() - self.cursor
    }

    fn next_part(&mut self) -> Option<Event> {
        let event = self.parts.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(event)
    }
}

/// State machine shared by every decoder.
///
/// `expand` turns a fresh record into its events; the cursor handles
/// resumption, supersession and the repeat guard.
#[derive(Debug, Default)]
pub(crate) struct RecordCursor {
    state: Option<DecodeState>,
    last_exhausted: Option<String>,
}

impl RecordCursor {
    pub(crate) fn step<F>(&mut self, record: &str, expand: F) -> Option<Event>
    where
        F: FnOnce(&str) -> Vec<Event>,
    {
        match self.state.as_mut() {
            Some(state) if state.record == record => {
                if let Some(event) = state.next_part() {
                    return Some(event);
                }
                self.exhaust(record);
                return None;
            }
            Some(_) => {
                tracing::trace!("Record superseded before exhaustion");
                self.state = None;
            }
            None => {}
        }

        if self.last_exhausted.as_deref() == Some(record) {
            return None;
        }

        let mut state = DecodeState::new(record, expand(record));
        match state.next_part() {
            Some(event) => {
                self.state = Some(state);
                Some(event)
            }
            None => {
                self.exhaust(record);
                None
            }
        }
    }

    fn exhaust(&mut self, record: &str) {
        self.state = None;
        self.last_exhausted = Some(record.to_string());
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.state.is_none()
    }
}

/// On-disk transcript formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// One JSON record per line.
    Jsonl,
    /// A single JSON document with a `messages` array.
    Document,
}

impl SourceFormat {
    /// Guess the format from the file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::Document,
            _ => Self::Jsonl,
        }
    }

    /// How the tailer should read this format.
    #[must_use]
    pub fn read_mode(self) -> ReadMode {
        match self {
            Self::Jsonl => ReadMode::Lines,
            Self::Document => ReadMode::WholeDocument,
        }
    }

    /// Fresh decoder for this format.
    #[must_use]
    pub fn decoder(self) -> Box<dyn RecordDecoder> {
        match self {
            Self::Jsonl => Box::new(JsonlDecoder::new()),
            Self::Document => Box::new(DocumentDecoder::new()),
        }
    }
}
