//! Logical output sessions and the active selection.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

/// Default number of lines kept per session.
pub const DEFAULT_BUFFER_LIMIT: usize = 1000;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Done,
}

/// One addressable output channel, usually one tailed transcript.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
    pub status: SessionStatus,
    buffer: VecDeque<String>,
    limit: usize,
}

impl Session {
    fn new(id: &str, label: &str, path: &Path, limit: usize) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            path: path.to_path_buf(),
            status: SessionStatus::Running,
            buffer: VecDeque::with_capacity(limit.min(64)),
            limit,
        }
    }

    fn record(&mut self, content: &str) {
        if self.limit == 0 {
            return;
        }
        while self.buffer.len() >= self.limit {
            self.buffer.pop_front();
        }
        self.buffer.push_back(content.to_string());
    }

    /// Buffered output, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &str> {
        self.buffer.iter().map(String::as_str)
    }

    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.status == SessionStatus::Done
    }

    fn summary(&self, active: bool) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            label: self.label.clone(),
            path: self.path.clone(),
            status: self.status,
            active,
            buffered: self.buffer.len(),
        }
    }
}

/// Serializable view of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
    pub status: SessionStatus,
    pub active: bool,
    pub buffered: usize,
}

/// All sessions in display order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionListSnapshot {
    pub sessions: Vec<SessionSummary>,
    pub active_index: Option<usize>,
}

/// Sent to the sink whenever the active session changes.
#[derive(Debug, Clone)]
pub struct SwitchEvent {
    pub session: SessionSummary,
    /// Buffered output of the newly active session, oldest first.
    pub history: Vec<String>,
}

/// Receives output of the active session.
pub trait OutputSink: Send + Sync {
    /// New content for the active session `id`.
    fn output(&self, id: &str, content: &str);

    /// The active session changed.
    fn switched(&self, event: &SwitchEvent);

    /// A session was registered.
    fn session_added(&self, _session: &SessionSummary) {}
}

/// Ordered set of sessions with exactly one active when non-empty.
///
/// The primary session, if configured, is always first. Every other session
/// is inserted right after it, so the newest sits nearest the primary.
pub struct SessionRegistry {
    sessions: Vec<Session>,
    active: Option<String>,
    primary: Option<String>,
    buffer_limit: usize,
    sink: Arc<dyn OutputSink>,
}

impl SessionRegistry {
    #[must_use]
    pub fn new(buffer_limit: usize, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            sessions: Vec::new(),
            active: None,
            primary: None,
            buffer_limit,
            sink,
        }
    }

    /// Designate the session that always sorts first.
    #[must_use]
    pub fn with_primary(mut self, id: impl Into<String>) -> Self {
        self.primary = Some(id.into());
        self
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.id == id)
    }

    fn active_index(&self) -> Option<usize> {
        self.active.as_deref().and_then(|id| self.index_of(id))
    }

    fn is_primary(&self, id: &str) -> bool {
        self.primary.as_deref() == Some(id)
    }

    /// Register a session. Returns the existing one if `id` is known.
    ///
    /// The first session registered becomes active.
    pub fn add_session(&mut self, id: &str, label: &str, path: &Path) -> &Session {
        let index = match self.index_of(id) {
            Some(index) => index,
            None => {
                let session = Session::new(id, label, path, self.buffer_limit);
                let index = if self.is_primary(id) {
                    0
                } else {
                    match self.sessions.first() {
                        Some(first) if self.is_primary(&first.id) => 1,
                        _ => 0,
                    }
                };
                self.sessions.insert(index, session);
                tracing::debug!(id = %id, label = %label, position = index, "Session added");
                let first = self.active.is_none();
                if first {
                    self.active = Some(id.to_string());
                }
                self.sink.session_added(&self.sessions[index].summary(first));
                index
            }
        };
        &self.sessions[index]
    }

    /// Route output for session `id`.
    ///
    /// Content is always buffered; it is also forwarded to the sink when
    /// `id` is active. Returns `false` for an unknown id.
    pub fn handle_output(&mut self, id: &str, content: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            tracing::debug!(id = %id, "Output for unknown session dropped");
            return false;
        };
        self.sessions[index].record(content);
        if self.active.as_deref() == Some(id) {
            self.sink.output(id, content);
        }
        true
    }

    fn switch_to_index(&mut self, index: usize) -> Option<SwitchEvent> {
        let session = self.sessions.get(index)?;
        let event = SwitchEvent {
            session: session.summary(true),
            history: session.history().map(str::to_string).collect(),
        };
        self.active = Some(session.id.clone());
        tracing::debug!(id = %event.session.id, "Switched session");
        self.sink.switched(&event);
        Some(event)
    }

    /// Activate the session after the active one, wrapping around.
    pub fn switch_next(&mut self) -> Option<SwitchEvent> {
        let len = self.sessions.len();
        if len == 0 {
            return None;
        }
        let next = self.active_index().map_or(0, |i| (i + 1) % len);
        self.switch_to_index(next)
    }

    /// Activate the session before the active one, wrapping around.
    pub fn switch_prev(&mut self) -> Option<SwitchEvent> {
        let len = self.sessions.len();
        if len == 0 {
            return None;
        }
        let prev = self.active_index().map_or(0, |i| (i + len - 1) % len);
        self.switch_to_index(prev)
    }

    /// Activate session `id`. Returns `None` if it is unknown.
    pub fn switch_to(&mut self, id: &str) -> Option<SwitchEvent> {
        let index = self.index_of(id)?;
        self.switch_to_index(index)
    }

    /// Mark session `id` finished. Returns `true` if the status changed.
    pub fn mark_done(&mut self, id: &str) -> bool {
        match self.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) if !session.is_done() => {
                session.status = SessionStatus::Done;
                tracing::debug!(id = %id, "Session done");
                true
            }
            _ => false,
        }
    }

    /// Resolve a user query to a session id: exact id, then label, then
    /// display position, then a unique id prefix.
    #[must_use]
    pub fn find(&self, query: &str) -> Option<&str> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        if let Some(session) = self
            .sessions
            .iter()
            .find(|s| s.id == query)
            .or_else(|| self.sessions.iter().find(|s| s.label == query))
        {
            return Some(&session.id);
        }
        if let Ok(position) = query.parse::<usize>() {
            if let Some(session) = self.sessions.get(position) {
                return Some(&session.id);
            }
        }
        let mut prefixed = self.sessions.iter().filter(|s| s.id.starts_with(query));
        match (prefixed.next(), prefixed.next()) {
            (Some(session), None) => Some(&session.id),
            _ => None,
        }
    }

    #[must_use]
    pub fn active(&self) -> Option<&Session> {
        self.active_index().map(|i| &self.sessions[i])
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.index_of(id).map(|i| &self.sessions[i])
    }

    /// Sessions in display order.
    #[must_use]
    pub fn all(&self) -> &[Session] {
        &self.sessions
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionListSnapshot {
        let active_index = self.active_index();
        SessionListSnapshot {
            sessions: self
                .sessions
                .iter()
                .enumerate()
                .map(|(i, s)| s.summary(Some(i) == active_index))
                .collect(),
            active_index,
        }
    }
}
