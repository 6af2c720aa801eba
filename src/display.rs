//! Console rendering of decoded events and session changes.
//!
//! Event lines are plain text so they can be buffered and replayed
//! unchanged; only the console banners are colored.

use std::io::{self, Write};

use owo_colors::OwoColorize;

use crate::decoder::{Event, EventKind};
use crate::session::{OutputSink, SessionListSnapshot, SessionStatus, SessionSummary, SwitchEvent};

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 200;
const TOOL_MAX_LEN: usize = 80;
const RESULT_MAX_LEN: usize = 150;

/// Truncate a string to at most `max_len` characters, adding ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// Collapse line breaks so one event stays on one console line.
fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn tag(kind: EventKind) -> &'static str {
    match kind {
        EventKind::UserMessage => "[USER]",
        EventKind::AssistantText => "[ASSISTANT]",
        EventKind::Thinking => "[THINKING]",
        EventKind::ToolCall => "[TOOL]",
        EventKind::ToolResult => "[RESULT]",
        EventKind::System => "[SYSTEM]",
        EventKind::Summary => "[SUMMARY]",
    }
}

/// Render `event` as one line of text.
#[must_use]
pub fn format_event(event: &Event, raw_mode: bool) -> String {
    let text = if raw_mode {
        event.text.clone()
    } else {
        single_line(&event.text)
    };
    let body = match event.kind {
        EventKind::ToolCall => {
            let name = event.tool_name.as_deref().unwrap_or("?");
            format!("{name} {}", truncate(&text, TOOL_MAX_LEN, raw_mode))
        }
        EventKind::ToolResult => truncate(&text, RESULT_MAX_LEN, raw_mode),
        _ => truncate(&text, DEFAULT_MAX_LEN, raw_mode),
    };
    match event.timestamp {
        Some(ts) => format!("{} {} {}", ts.format("%H:%M:%S"), tag(event.kind), body.trim_end()),
        None => format!("{} {}", tag(event.kind), body.trim_end()),
    }
}

/// Prints active session output to stdout.
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl OutputSink for ConsoleSink {
    fn output(&self, _id: &str, content: &str) {
        println!("{content}");
        let _ = io::stdout().flush();
    }

    fn switched(&self, event: &SwitchEvent) {
        print_switch(event);
    }

    fn session_added(&self, session: &SessionSummary) {
        println!(
            "{} {} {}",
            "[SESSION+]".magenta().bold(),
            session.label.cyan(),
            session.path.display().dimmed()
        );
        let _ = io::stdout().flush();
    }
}

/// Print the banner for a session switch followed by its history.
pub fn print_switch(event: &SwitchEvent) {
    let status = match event.session.status {
        SessionStatus::Running => "running".green().to_string(),
        SessionStatus::Done => "done".dimmed().to_string(),
    };
    println!(
        "{} {} ({}, {} buffered)",
        "[SESSION]".blue().bold(),
        event.session.label.cyan(),
        status,
        event.history.len()
    );
    for line in &event.history {
        println!("{line}");
    }
    let _ = io::stdout().flush();
}

/// Print every session, marking the active one.
pub fn print_session_list(snapshot: &SessionListSnapshot) {
    for (i, session) in snapshot.sessions.iter().enumerate() {
        let marker = if session.active { "*" } else { " " };
        let status = match session.status {
            SessionStatus::Running => "running".green().to_string(),
            SessionStatus::Done => "done".dimmed().to_string(),
        };
        println!(
            "{} {} {} {} {}",
            marker.yellow().bold(),
            format!("{i:>2}").dimmed(),
            session.label.cyan(),
            status,
            session.id.dimmed()
        );
    }
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
