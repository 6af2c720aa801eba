//! agent-tail - Live multi-session tailing of AI assistant transcripts.

pub mod app;
pub mod config;
pub mod decoder;
pub mod display;
pub mod session;
pub mod watcher;
