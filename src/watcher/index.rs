//! Best-effort cache mapping working directories to session files.
//!
//! Scanning a transcript root means opening every file to find the working
//! directory it belongs to. The index remembers the answer per file and
//! modification time so later lookups only re-read files that changed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk schema version. Files with any other version are
/// discarded, not migrated.
pub const INDEX_VERSION: u32 = 1;

/// Errors from reading or writing the index file.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("Failed to access index file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode index: {0}")]
    Json(#[from] serde_json::Error),
}

/// One session file known to belong to a working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSource {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Working directory to session files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionIndex {
    pub version: u32,
    #[serde(default)]
    pub entries: HashMap<String, Vec<IndexedSource>>,
}

impl Default for SessionIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: HashMap::new(),
        }
    }
}

impl SessionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default index location: `<cache_dir>/agent-tail/index.json`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::cache_dir().map(|dir| dir.join("agent-tail").join("index.json"))
    }

    /// Load the index, falling back to an empty one when the file is
    /// missing, unreadable, malformed, or from another schema version.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::debug!(path = %path.display(), error = %e, "Index unreadable");
                }
                return Self::new();
            }
        };
        match serde_json::from_str::<Self>(&content) {
            Ok(index) if index.version == INDEX_VERSION => index,
            Ok(index) => {
                tracing::debug!(
                    found = index.version,
                    expected = INDEX_VERSION,
                    "Discarding index with stale schema version"
                );
                Self::new()
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Discarding malformed index");
                Self::new()
            }
        }
    }

    /// Write the index, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or its parent cannot be written.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| IndexError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| IndexError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Sessions recorded for `cwd`.
    #[must_use]
    pub fn lookup(&self, cwd: &str) -> &[IndexedSource] {
        self.entries.get(cwd).map_or(&[], Vec::as_slice)
    }

    /// Working directory recorded for `path`, if its modification time
    /// still matches.
    #[must_use]
    pub fn cwd_for(&self, path: &Path, modified: DateTime<Utc>) -> Option<&str> {
        self.entries.iter().find_map(|(cwd, sources)| {
            sources
                .iter()
                .any(|s| s.path == path && s.modified == modified)
                .then_some(cwd.as_str())
        })
    }

    /// Replace every entry.
    pub fn replace_all(&mut self, entries: HashMap<String, Vec<IndexedSource>>) {
        self.entries = entries;
    }
}
