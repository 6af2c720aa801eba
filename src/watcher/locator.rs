//! Session path discovery utilities.
//!
//! Locates transcript files on disk: the newest session for a project, a
//! session named by a partial id, the subagent directory that belongs to a
//! session, and sessions recorded for a working directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use super::error::WatcherError;
use super::index::{IndexedSource, SessionIndex};
use super::subagent::is_valid_agent_id;

/// Root under which Claude Code keeps per-project transcripts
/// (`~/.claude/projects`).
#[must_use]
pub fn default_projects_root() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".claude").join("projects"))
}

/// Convert a project path to the hash format used by Claude Code.
///
/// Claude Code stores sessions in `~/.claude/projects/<hash>/` where
/// the hash is the project path with `/` replaced by `-`.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use agent_tail::watcher::project_path_hash;
///
/// let hash = project_path_hash(Path::new("/home/user/project"));
/// assert_eq!(hash, "-home-user-project");
/// ```
#[must_use]
pub fn project_path_hash(project_path: &Path) -> String {
    let path_str = project_path.to_string_lossy();
    path_str.replace('/', "-")
}

/// Find the sessions directory for a project under `root`.
///
/// Returns `None` if the directory doesn't exist.
#[must_use]
pub fn find_project_sessions_dir(root: &Path, project_path: &Path) -> Option<PathBuf> {
    let sessions_dir = root.join(project_path_hash(project_path));
    sessions_dir.is_dir().then_some(sessions_dir)
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e == ext)
}

/// `.jsonl` files directly inside `dir` with their modification times.
fn jsonl_files(dir: &Path) -> Vec<(PathBuf, SystemTime)> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && has_extension(path, "jsonl"))
        .filter_map(|path| {
            let modified = modified_time(&path)?;
            Some((path, modified))
        })
        .collect()
}

/// Session files in `root` itself and in each project directory below it.
fn all_session_files(root: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut files = jsonl_files(root);
    if let Ok(entries) = std::fs::read_dir(root) {
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                files.extend(jsonl_files(&path));
            }
        }
    }
    files
}

/// Find the most recent session file in a directory.
///
/// Searches for `.jsonl` files and returns the one with the most
/// recent modification time.
#[must_use]
pub fn find_latest_session(dir: &Path) -> Option<PathBuf> {
    jsonl_files(dir)
        .into_iter()
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// Find the most recent session across all project directories in `root`.
///
/// With a `project_filter`, only project directories whose name contains
/// the filter are considered.
#[must_use]
pub fn find_latest_in_root(root: &Path, project_filter: Option<&str>) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .filter(|path| {
            project_filter.map_or(true, |filter| {
                path.file_name()
                    .is_some_and(|name| name.to_string_lossy().contains(filter))
            })
        })
        .flat_map(|dir| jsonl_files(&dir))
        .max_by_key(|(_, modified)| *modified)
        .map(|(path, _)| path)
}

/// Find a session file by its exact session ID.
#[must_use]
pub fn find_session_by_id(sessions_dir: &Path, session_id: &str) -> Option<PathBuf> {
    let session_file = sessions_dir.join(format!("{session_id}.jsonl"));
    session_file.is_file().then_some(session_file)
}

/// Resolve a full or partial session id to a file under `root`.
///
/// An exact stem match beats a prefix match, which beats a substring
/// match; within one tier the most recently modified file wins. A value
/// that is already an existing file path is returned as-is.
#[must_use]
pub fn resolve_session(root: &Path, partial: &str) -> Option<PathBuf> {
    let direct = PathBuf::from(partial);
    if direct.is_file() {
        return Some(direct);
    }
    if partial.is_empty() {
        return None;
    }

    all_session_files(root)
        .into_iter()
        .filter_map(|(path, modified)| {
            let stem = path.file_stem()?.to_string_lossy().into_owned();
            let tier = if stem == partial {
                0
            } else if stem.starts_with(partial) {
                1
            } else if stem.contains(partial) {
                2
            } else {
                return None;
            };
            Some((tier, modified, path))
        })
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(&a.1)))
        .map(|(_, _, path)| path)
}

/// Subagent directory belonging to a session file.
///
/// Claude Code stores subagent conversations of `<dir>/<id>.jsonl` in
/// `<dir>/<id>/subagents/`. The directory may not exist yet.
#[must_use]
pub fn subagents_dir_for(session_path: &Path) -> Option<PathBuf> {
    let parent = session_path.parent()?;
    let stem = session_path.file_stem()?;
    Some(parent.join(stem).join("subagents"))
}

/// Extract agent ID from a subagent filename.
///
/// Subagent files are named `agent-<id>.jsonl`. This function extracts
/// the `<id>` portion.
///
/// # Examples
///
/// ```
/// use agent_tail::watcher::extract_agent_id;
///
/// assert_eq!(extract_agent_id("agent-abc1234.jsonl"), Some("abc1234".to_string()));
/// assert_eq!(extract_agent_id("session.jsonl"), None);
/// ```
#[must_use]
pub fn extract_agent_id(filename: &str) -> Option<String> {
    let stem = filename.strip_suffix(".jsonl")?;
    let id = stem.strip_prefix("agent-")?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// File name of the transcript for subagent `id`.
#[must_use]
pub fn agent_file_name(id: &str) -> String {
    format!("agent-{id}.jsonl")
}

/// Discover all subagent files in a subagents directory.
///
/// Returns a list of (`agent_id`, path) tuples for each subagent file whose
/// id passes [`is_valid_agent_id`].
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn discover_subagent_files(
    subagents_dir: &Path,
) -> Result<Vec<(String, PathBuf)>, WatcherError> {
    let entries = std::fs::read_dir(subagents_dir)?;

    let mut agents = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if has_extension(&path, "jsonl") {
            if let Some(filename) = path.file_name().and_then(|n| n.to_str()) {
                match extract_agent_id(filename) {
                    Some(agent_id) if is_valid_agent_id(&agent_id) => agents.push((agent_id, path)),
                    _ => {}
                }
            }
        }
    }

    Ok(agents)
}

const MAX_SCAN_DEPTH: usize = 4;

/// Document transcripts (`.json`) below `root`, at most a few levels deep.
fn document_files(root: &Path) -> Vec<(PathBuf, DateTime<Utc>)> {
    let mut files = Vec::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];
    while let Some((dir, depth)) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                if depth < MAX_SCAN_DEPTH {
                    stack.push((path, depth + 1));
                }
            } else if has_extension(&path, "json") {
                if let Some(modified) = modified_time(&path) {
                    files.push((path, DateTime::<Utc>::from(modified)));
                }
            }
        }
    }
    files
}

/// Working directory recorded in a document transcript's top-level `cwd`.
fn read_document_cwd(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&content).ok()?;
    value.get("cwd")?.as_str().map(str::to_string)
}

/// Find the newest document transcript under `root` recorded for `cwd`.
///
/// Files whose modification time matches the index are not re-read; the
/// index is rebuilt from the scan so the caller can persist it.
pub fn locate_by_cwd(root: &Path, cwd: &str, index: &mut SessionIndex) -> Option<PathBuf> {
    let mut rebuilt: HashMap<String, Vec<IndexedSource>> = HashMap::new();

    for (path, modified) in document_files(root) {
        let owner = match index.cwd_for(&path, modified) {
            Some(known) => Some(known.to_string()),
            None => read_document_cwd(&path),
        };
        if let Some(owner) = owner {
            rebuilt
                .entry(owner)
                .or_default()
                .push(IndexedSource { path, modified });
        }
    }

    index.replace_all(rebuilt);
    index
        .lookup(cwd)
        .iter()
        .max_by_key(|source| source.modified)
        .map(|source| source.path.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn touch_later(path: &Path, content: &str) {
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_project_path_hash_simple() {
        let path = Path::new("/home/user/project");
        assert_eq!(project_path_hash(path), "-home-user-project");
    }

    #[test]
    fn test_project_path_hash_root() {
        assert_eq!(project_path_hash(Path::new("/")), "-");
    }

    #[test]
    fn test_find_project_sessions_dir() {
        let temp_dir = TempDir::new().unwrap();
        let project = Path::new("/home/user/project");
        assert!(find_project_sessions_dir(temp_dir.path(), project).is_none());

        let dir = temp_dir.path().join("-home-user-project");
        std::fs::create_dir(&dir).unwrap();
        assert_eq!(find_project_sessions_dir(temp_dir.path(), project), Some(dir));
    }

    #[test]
    fn test_find_latest_session_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_latest_session(temp_dir.path()).is_none());
    }

    #[test]
    fn test_find_latest_session_ignores_other_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("readme.txt"), "hello").unwrap();
        std::fs::write(temp_dir.path().join("config.json"), "{}").unwrap();
        assert!(find_latest_session(temp_dir.path()).is_none());
    }

    #[test]
    fn test_find_latest_session_multiple_files() {
        let temp_dir = TempDir::new().unwrap();
        let old_path = temp_dir.path().join("old-session.jsonl");
        std::fs::write(&old_path, "{}").unwrap();
        let new_path = temp_dir.path().join("new-session.jsonl");
        touch_later(&new_path, "{}\n");

        assert_eq!(find_latest_session(temp_dir.path()), Some(new_path));
    }

    #[test]
    fn test_find_latest_in_root_with_filter() {
        let temp_dir = TempDir::new().unwrap();
        let alpha = temp_dir.path().join("-home-user-alpha");
        let beta = temp_dir.path().join("-home-user-beta");
        std::fs::create_dir(&alpha).unwrap();
        std::fs::create_dir(&beta).unwrap();

        let alpha_session = alpha.join("a.jsonl");
        std::fs::write(&alpha_session, "{}").unwrap();
        let beta_session = beta.join("b.jsonl");
        touch_later(&beta_session, "{}");

        assert_eq!(
            find_latest_in_root(temp_dir.path(), None),
            Some(beta_session)
        );
        assert_eq!(
            find_latest_in_root(temp_dir.path(), Some("alpha")),
            Some(alpha_session)
        );
        assert!(find_latest_in_root(temp_dir.path(), Some("gamma")).is_none());
    }

    #[test]
    fn test_find_session_by_id() {
        let temp_dir = TempDir::new().unwrap();
        let session_path = temp_dir.path().join("abc-123-def.jsonl");
        std::fs::write(&session_path, "{}").unwrap();

        assert_eq!(
            find_session_by_id(temp_dir.path(), "abc-123-def"),
            Some(session_path)
        );
        assert!(find_session_by_id(temp_dir.path(), "nonexistent").is_none());
    }

    #[test]
    fn test_resolve_session_priority() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("-proj");
        std::fs::create_dir(&project).unwrap();

        let exact = project.join("abc.jsonl");
        std::fs::write(&exact, "{}").unwrap();
        let prefixed = project.join("abcdef.jsonl");
        touch_later(&prefixed, "{}");
        let contains = project.join("zz-abc-zz.jsonl");
        touch_later(&contains, "{}");

        // Exact wins even though it is the oldest.
        assert_eq!(resolve_session(temp_dir.path(), "abc"), Some(exact));
        assert_eq!(resolve_session(temp_dir.path(), "abcd"), Some(prefixed));
        assert_eq!(resolve_session(temp_dir.path(), "-abc-"), Some(contains));
        assert!(resolve_session(temp_dir.path(), "nomatch").is_none());
    }

    #[test]
    fn test_resolve_session_ties_prefer_newest() {
        let temp_dir = TempDir::new().unwrap();
        let project = temp_dir.path().join("-proj");
        std::fs::create_dir(&project).unwrap();

        std::fs::write(project.join("run-1.jsonl"), "{}").unwrap();
        let newer = project.join("run-2.jsonl");
        touch_later(&newer, "{}");

        assert_eq!(resolve_session(temp_dir.path(), "run"), Some(newer));
    }

    #[test]
    fn test_resolve_session_accepts_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("somewhere.jsonl");
        std::fs::write(&path, "{}").unwrap();
        let resolved = resolve_session(Path::new("/nonexistent"), path.to_str().unwrap());
        assert_eq!(resolved, Some(path));
    }

    #[test]
    fn test_subagents_dir_for() {
        let dir = subagents_dir_for(Path::new("/p/-proj/1234-abcd.jsonl")).unwrap();
        assert_eq!(dir, PathBuf::from("/p/-proj/1234-abcd/subagents"));
    }

    #[test]
    fn test_extract_agent_id_valid() {
        assert_eq!(
            extract_agent_id("agent-abc1234.jsonl"),
            Some("abc1234".to_string())
        );
        assert_eq!(extract_agent_id("agent-a.jsonl"), Some("a".to_string()));
    }

    #[test]
    fn test_extract_agent_id_invalid() {
        assert_eq!(extract_agent_id("session.jsonl"), None);
        assert_eq!(extract_agent_id("agent-.jsonl"), None);
        assert_eq!(extract_agent_id("agent-abc.txt"), None);
        assert_eq!(extract_agent_id(""), None);
    }

    #[test]
    fn test_agent_file_name_round_trips() {
        assert_eq!(
            extract_agent_id(&agent_file_name("a0627b6")),
            Some("a0627b6".to_string())
        );
    }

    #[test]
    fn test_discover_subagent_files_with_agents() {
        let temp_dir = TempDir::new().unwrap();
        let subagents_dir = temp_dir.path().join("subagents");
        std::fs::create_dir(&subagents_dir).unwrap();

        std::fs::write(subagents_dir.join("agent-abc1234.jsonl"), "{}").unwrap();
        std::fs::write(subagents_dir.join("agent-def4567.jsonl"), "{}").unwrap();
        std::fs::write(subagents_dir.join("session.jsonl"), "{}").unwrap();
        std::fs::write(subagents_dir.join("agent-xyz.txt"), "{}").unwrap();
        std::fs::write(subagents_dir.join("agent-..%2fetc.jsonl"), "{}").unwrap();

        let result = discover_subagent_files(&subagents_dir).unwrap();
        let mut ids: Vec<_> = result.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["abc1234", "def4567"]);
    }

    #[test]
    fn test_discover_subagent_files_nonexistent_dir() {
        assert!(discover_subagent_files(Path::new("/nonexistent/path")).is_err());
    }

    #[test]
    fn test_locate_by_cwd_uses_and_rebuilds_index() {
        let temp_dir = TempDir::new().unwrap();
        let day = temp_dir.path().join("2026").join("10");
        std::fs::create_dir_all(&day).unwrap();

        let mine = day.join("chat-1.json");
        std::fs::write(&mine, r#"{"cwd":"/work/app","messages":[]}"#).unwrap();
        let other = day.join("chat-2.json");
        std::fs::write(&other, r#"{"cwd":"/work/other","messages":[]}"#).unwrap();
        let newer_mine = day.join("chat-3.json");
        touch_later(&newer_mine, r#"{"cwd":"/work/app","messages":[]}"#);

        let mut index = SessionIndex::new();
        assert_eq!(
            locate_by_cwd(temp_dir.path(), "/work/app", &mut index),
            Some(newer_mine.clone())
        );
        assert_eq!(index.lookup("/work/app").len(), 2);
        assert_eq!(index.lookup("/work/other").len(), 1);

        // A second lookup with the cached index gives the same answer.
        assert_eq!(
            locate_by_cwd(temp_dir.path(), "/work/app", &mut index),
            Some(newer_mine)
        );
        assert!(locate_by_cwd(temp_dir.path(), "/nowhere", &mut index).is_none());
    }
}
