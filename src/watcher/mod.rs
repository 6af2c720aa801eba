//! Tailing, multiplexing and discovery of transcript files.

mod discovery;
mod error;
mod index;
mod locator;
mod multiplexer;
mod subagent;
mod tailer;

pub use discovery::{DiscoveryHandler, DynamicDiscovery};
pub use error::WatcherError;
pub use index::{IndexError, IndexedSource, SessionIndex, INDEX_VERSION};
pub use locator::{
    agent_file_name, default_projects_root, discover_subagent_files, extract_agent_id,
    find_latest_in_root, find_latest_session, find_project_sessions_dir, find_session_by_id,
    locate_by_cwd, project_path_hash, resolve_session, subagents_dir_for,
};
pub use multiplexer::{MuxCallback, Source, SourceMultiplexer};
pub use subagent::{is_valid_agent_id, DiscoveryRegistry, Registration, DEFAULT_MAX_SUBAGENTS};
pub use tailer::{
    ErrorCallback, FileTailer, Fingerprint, LineCallback, ReadGate, ReadMode, SourceCursor,
};
