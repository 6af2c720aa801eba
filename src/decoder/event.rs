use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// What a decoded event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    UserMessage,
    AssistantText,
    Thinking,
    ToolCall,
    ToolResult,
    System,
    Summary,
}

/// Signal to the discovery subsystem carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DiscoveryTrigger {
    #[default]
    None,
    /// A child session is probably about to start.
    Early,
    /// A child session with this id was reported by the content itself.
    Inline(String),
}

/// One displayable unit produced by a decoder.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: Option<DateTime<Utc>>,
    pub text: String,
    pub tool_name: Option<String>,
    pub discovery: DiscoveryTrigger,
    /// The JSON value this event was decoded from.
    pub raw: Arc<Value>,
}

impl Event {
    #[must_use]
    pub fn new(kind: EventKind, text: impl Into<String>, raw: Arc<Value>) -> Self {
        Self {
            kind,
            timestamp: None,
            text: text.into(),
            tool_name: None,
            discovery: DiscoveryTrigger::None,
            raw,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn with_tool(mut self, name: impl Into<String>) -> Self {
        self.tool_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_trigger(mut self, trigger: DiscoveryTrigger) -> Self {
        self.discovery = trigger;
        self
    }
}

/// Parse an RFC 3339 timestamp, ignoring anything malformed.
pub(crate) fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
