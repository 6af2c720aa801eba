//! Session tracking and switching.

mod registry;
mod scheduler;

pub use registry::{
    OutputSink, Session, SessionListSnapshot, SessionRegistry, SessionStatus, SessionSummary,
    SwitchEvent, DEFAULT_BUFFER_LIMIT,
};
pub use scheduler::SwitchScheduler;
