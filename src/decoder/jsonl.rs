//! Decoder for Claude-style JSONL transcripts.
//!
//! Each line of `~/.claude/projects/<hash>/<session>.jsonl` is one record.
//! Assistant records expand into one event per content block; user records
//! into their text and tool results.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use super::event::{parse_timestamp, DiscoveryTrigger, Event, EventKind};
use super::{RecordCursor, RecordDecoder};
use crate::watcher::is_valid_agent_id;

/// Tools whose invocation starts a subagent.
const SPAWNING_TOOLS: &[&str] = &["Task", "Agent"];

static AGENT_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"agentId:\s*([0-9a-fA-F]{7,40})\b").ok());

/// A single record in a JSONL transcript.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TranscriptRecord {
    User(UserRecord),
    Assistant(AssistantRecord),
    System(SystemRecord),
    Summary(SummaryRecord),
    /// Snapshots, queue operations, progress and anything newer.
    #[serde(other)]
    Ignored,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub message: Message,
    #[serde(default)]
    pub tool_use_result: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssistantRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    pub message: AssistantMessage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemRecord {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryRecord {
    pub summary: String,
}

/// A message with role and content.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub role: Option<String>,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssistantMessage {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub model: Option<String>,
}

/// Message content - can be plain text or structured blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A content block within a message.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        content: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

impl MessageContent {
    /// Text blocks joined with newlines.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Plain text of a tool result's `content`, which is either a string or a
/// list of text blocks.
fn tool_result_text(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Short description of a tool call's input.
fn summarize_input(input: &Value) -> String {
    const KEYS: &[&str] = &[
        "description",
        "command",
        "file_path",
        "pattern",
        "path",
        "url",
        "query",
        "prompt",
    ];
    KEYS.iter()
        .find_map(|key| input.get(*key).and_then(Value::as_str))
        .map_or_else(|| input.to_string(), str::to_string)
}

/// Subagent id reported inline in a tool result.
fn inline_agent_id(text: &str) -> Option<String> {
    AGENT_ID_PATTERN
        .as_ref()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn non_empty(text: &str) -> bool {
    !text.trim().is_empty()
}

/// Expand a parsed record into its events, narrative parts before actions.
fn expand(record: TranscriptRecord, raw: &Arc<Value>) -> Vec<Event> {
    match record {
        TranscriptRecord::Assistant(entry) => {
            let ts = parse_timestamp(entry.timestamp.as_deref());
            let mut narrative = Vec::new();
            let mut actions = Vec::new();
            for block in entry.message.content {
                match block {
                    ContentBlock::Text { text } if non_empty(&text) => {
                        narrative.push(Event::new(EventKind::AssistantText, text, Arc::clone(raw)));
                    }
                    ContentBlock::Thinking { thinking } if non_empty(&thinking) => {
                        narrative.push(Event::new(EventKind::Thinking, thinking, Arc::clone(raw)));
                    }
                    ContentBlock::ToolUse { name, input } => {
                        let trigger = if SPAWNING_TOOLS.contains(&name.as_str()) {
                            DiscoveryTrigger::Early
                        } else {
                            DiscoveryTrigger::None
                        };
                        actions.push(
                            Event::new(EventKind::ToolCall, summarize_input(&input), Arc::clone(raw))
                                .with_tool(name)
                                .with_trigger(trigger),
                        );
                    }
                    _ => {}
                }
            }
            narrative
                .into_iter()
                .chain(actions)
                .map(|e| e.with_timestamp(ts))
                .collect()
        }
        TranscriptRecord::User(entry) => {
            let ts = parse_timestamp(entry.timestamp.as_deref());
            let mut narrative = Vec::new();
            let mut results = Vec::new();
            match entry.message.content {
                MessageContent::Text(text) => {
                    if non_empty(&text) {
                        narrative.push(Event::new(EventKind::UserMessage, text, Arc::clone(raw)));
                    }
                }
                MessageContent::Blocks(blocks) => {
                    for block in blocks {
                        match block {
                            ContentBlock::Text { text } if non_empty(&text) => {
                                narrative.push(Event::new(
                                    EventKind::UserMessage,
                                    text,
                                    Arc::clone(raw),
                                ));
                            }
                            ContentBlock::ToolResult { content } => {
                                let text = tool_result_text(&content);
                                let trigger = inline_agent_id(&text)
                                    .map_or(DiscoveryTrigger::None, DiscoveryTrigger::Inline);
                                results.push(
                                    Event::new(EventKind::ToolResult, text, Arc::clone(raw))
                                        .with_trigger(trigger),
                                );
                            }
                            _ => {}
                        }
                    }
                }
            }

            let reported = entry
                .tool_use_result
                .as_ref()
                .and_then(|r| r.get("agentId"))
                .and_then(Value::as_str)
                .filter(|id| is_valid_agent_id(id));
            if let Some(id) = reported {
                let already = results
                    .iter()
                    .any(|e| matches!(&e.discovery, DiscoveryTrigger::Inline(found) if found == id));
                if !already {
                    let trigger = DiscoveryTrigger::Inline(id.to_string());
                    match results
                        .iter_mut()
                        .find(|e| e.discovery == DiscoveryTrigger::None)
                    {
                        Some(event) => event.discovery = trigger,
                        None => results.push(
                            Event::new(
                                EventKind::ToolResult,
                                format!("agentId: {id}"),
                                Arc::clone(raw),
                            )
                            .with_trigger(trigger),
                        ),
                    }
                }
            }

            narrative
                .into_iter()
                .chain(results)
                .map(|e| e.with_timestamp(ts))
                .collect()
        }
        TranscriptRecord::System(entry) => {
            let text = entry.content.or(entry.subtype).unwrap_or_default();
            if non_empty(&text) {
                vec![Event::new(EventKind::System, text, Arc::clone(raw))
                    .with_timestamp(parse_timestamp(entry.timestamp.as_deref()))]
            } else {
                Vec::new()
            }
        }
        TranscriptRecord::Summary(entry) => {
            vec![Event::new(EventKind::Summary, entry.summary, Arc::clone(raw))]
        }
        TranscriptRecord::Ignored => Vec::new(),
    }
}

/// Parse one JSONL line into events. Malformed lines produce none.
fn decode_line(line: &str) -> Vec<Event> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(error = %e, "Skipping malformed JSONL line");
            return Vec::new();
        }
    };
    match TranscriptRecord::deserialize(&value) {
        Ok(record) => expand(record, &Arc::new(value)),
        Err(e) => {
            tracing::debug!(error = %e, "Skipping unrecognised JSONL record");
            Vec::new()
        }
    }
}

/// [`RecordDecoder`] for JSONL transcript lines.
#[derive(Debug, Default)]
pub struct JsonlDecoder {
    cursor: RecordCursor,
}

impl JsonlDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordDecoder for JsonlDecoder {
    fn decode(&mut self, record: &str) -> Option<Event> {
        self.cursor.step(record, decode_line)
    }

    fn is_idle(&self) -> bool {
        self.cursor.is_idle()
    }
}
