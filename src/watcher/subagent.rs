//! Known subagent identifiers.
//!
//! Subagent ids come from file names and from decoded log content, so they
//! are attacker-controlled. Only short hexadecimal ids are accepted before
//! they are ever joined onto a path.

use std::collections::HashSet;

/// Default maximum number of subagents to track.
pub const DEFAULT_MAX_SUBAGENTS: usize = 256;

const MIN_ID_LEN: usize = 7;
const MAX_ID_LEN: usize = 40;

/// Check that `id` is 7 to 40 hexadecimal characters.
///
/// # Examples
///
/// ```
/// use agent_tail::watcher::is_valid_agent_id;
///
/// assert!(is_valid_agent_id("a0627b6"));
/// assert!(!is_valid_agent_id("../etc"));
/// ```
#[must_use]
pub fn is_valid_agent_id(id: &str) -> bool {
    (MIN_ID_LEN..=MAX_ID_LEN).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Outcome of [`DiscoveryRegistry::register_if_new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First sighting; the caller must attach the source.
    New,
    /// Already registered.
    Known,
    /// Rejected by id validation.
    Invalid,
    /// Registry is full.
    LimitReached,
}

/// Set of validated subagent ids seen during this run.
///
/// Grows monotonically; every mutation goes through
/// [`DiscoveryRegistry::register_if_new`].
#[derive(Debug)]
pub struct DiscoveryRegistry {
    known: HashSet<String>,
    max_agents: usize,
}

impl DiscoveryRegistry {
    /// Create an empty registry with specified maximum capacity.
    #[must_use]
    pub fn new(max_agents: usize) -> Self {
        Self {
            known: HashSet::new(),
            max_agents,
        }
    }

    /// Create a registry pre-populated with ids already attached elsewhere.
    #[must_use]
    pub fn with_known<I, S>(ids: I, max_agents: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut registry = Self::new(max_agents);
        for id in ids {
            let _ = registry.register_if_new(id.as_ref());
        }
        registry
    }

    /// Record `id` unless it is invalid, known, or over the limit.
    pub fn register_if_new(&mut self, id: &str) -> Registration {
        if !is_valid_agent_id(id) {
            tracing::debug!(id = %id, "Rejecting invalid subagent id");
            return Registration::Invalid;
        }
        if self.known.contains(id) {
            return Registration::Known;
        }
        if self.known.len() >= self.max_agents {
            tracing::warn!(
                id = %id,
                max = self.max_agents,
                "Subagent limit reached, ignoring registration"
            );
            return Registration::LimitReached;
        }
        tracing::debug!(id = %id, "Registered subagent");
        self.known.insert(id.to_string());
        Registration::New
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    /// Get the total number of known ids.
    #[must_use]
    pub fn count(&self) -> usize {
        self.known.len()
    }

    /// Known ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.known.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget every id.
    pub fn reset(&mut self) {
        self.known.clear();
    }
}

impl Default for DiscoveryRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBAGENTS)
    }
}
