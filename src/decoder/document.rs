//! Decoder for whole-document chat transcripts.
//!
//! The tailer hands over the full file each time it changes. Only messages
//! that are new, or whose content changed since the last snapshot, are turned
//! into events; a document that lost messages is treated as rewritten and
//! replayed from the start.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::event::{parse_timestamp, Event, EventKind};
use super::{RecordCursor, RecordDecoder};
use crate::watcher::Fingerprint;

fn message_fingerprint(message: &Value) -> Fingerprint {
    Sha256::digest(message.to_string().as_bytes()).into()
}

/// Top-level transcript document.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptDocument {
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub messages: Vec<Value>,
}

/// One entry of the `messages` array.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMessage {
    #[serde(alias = "type")]
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub thoughts: Vec<Value>,
    #[serde(default)]
    pub tool_calls: Vec<DocumentToolCall>,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DocumentToolCall {
    pub name: String,
    #[serde(default, alias = "args")]
    pub input: Value,
}

/// Text of a message `content`: a string, or parts carrying `text`.
fn content_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.as_str().or_else(|| p.get("text").and_then(Value::as_str)))
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn thought_text(thought: &Value) -> Option<&str> {
    thought
        .as_str()
        .or_else(|| thought.get("description").and_then(Value::as_str))
        .or_else(|| thought.get("text").and_then(Value::as_str))
}

fn expand_message(value: Value) -> Vec<Event> {
    let message = match DocumentMessage::deserialize(&value) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unrecognised document message");
            return Vec::new();
        }
    };
    let raw = Arc::new(value);
    let ts = parse_timestamp(message.timestamp.as_deref());

    let text_kind = match message.role.as_str() {
        "user" => EventKind::UserMessage,
        "system" | "info" | "error" => EventKind::System,
        _ => EventKind::AssistantText,
    };

    let mut events: Vec<Event> = message
        .thoughts
        .iter()
        .filter_map(thought_text)
        .filter(|t| !t.trim().is_empty())
        .map(|t| Event::new(EventKind::Thinking, t, Arc::clone(&raw)))
        .collect();

    let text = content_text(&message.content);
    if !text.trim().is_empty() {
        events.push(Event::new(text_kind, text, Arc::clone(&raw)));
    }

    events.extend(message.tool_calls.into_iter().map(|call| {
        let summary = match &call.input {
            Value::Null => String::new(),
            input => input.to_string(),
        };
        Event::new(EventKind::ToolCall, summary, Arc::clone(&raw)).with_tool(call.name)
    }));

    events.into_iter().map(|e| e.with_timestamp(ts)).collect()
}

/// [`RecordDecoder`] for whole-document snapshots.
#[derive(Debug, Default)]
pub struct DocumentDecoder {
    cursor: RecordCursor,
    seen: Vec<Fingerprint>,
}

impl DocumentDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages already turned into events.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.seen.len()
    }
}

impl RecordDecoder for DocumentDecoder {
    fn decode(&mut self, record: &str) -> Option<Event> {
        let seen = &mut self.seen;
        self.cursor.step(record, |snapshot| {
            let document: TranscriptDocument = match serde_json::from_str(snapshot) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::debug!(error = %e, "Skipping malformed transcript document");
                    return Vec::new();
                }
            };
            if document.messages.len() < seen.len() {
                tracing::debug!(
                    previous = seen.len(),
                    current = document.messages.len(),
                    "Transcript document shrank, replaying"
                );
                seen.clear();
            }

            let mut fresh = Vec::new();
            for (index, message) in document.messages.into_iter().enumerate() {
                let print = message_fingerprint(&message);
                match seen.get_mut(index) {
                    Some(known) if *known == print => {}
                    Some(known) => {
                        tracing::debug!(index, "Transcript message edited, re-emitting");
                        *known = print;
                        fresh.push(message);
                    }
                    None => {
                        seen.push(print);
                        fresh.push(message);
                    }
                }
            }
            fresh.into_iter().flat_map(expand_message).collect()
        })
    }

    fn is_idle(&self) -> bool {
        self.cursor.is_idle()
    }
}
