//! Discovers workspace stores under the editor's `workspaceStorage` directory.
//!
//! Layout:
//! ```text
//! <root>/<workspace-id>/state.vscdb
//! <root>/<workspace-id>/workspace.json   {"folder": "file:///path/to/project"}
//! ```

use crate::locator::locate;
use crate::model::SessionMap;
use crate::schema::normalize_located;
use crate::store::{ItemStore, SqliteStore};
use chrono::{DateTime, Local};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use url::Url;

pub const STORE_FILE: &str = "state.vscdb";
const WORKSPACE_FILE: &str = "workspace.json";

/// Platform default for the root scan location.
pub fn default_root() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Trae/User/workspaceStorage"))
}

#[derive(Debug, Clone)]
pub struct Workspace {
    /// Directory name under the root.
    pub id: String,
    pub store_path: PathBuf,
    /// Project folder URI from `workspace.json`.
    pub folder: Option<String>,
    pub last_modified: DateTime<Local>,
    pub chat_count: usize,
}

impl Workspace {
    /// Human-readable name: the project folder's basename, else the id.
    pub fn label(&self) -> String {
        self.folder
            .as_deref()
            .and_then(folder_basename)
            .unwrap_or_else(|| self.id.clone())
    }

    pub fn matches(&self, needle: &str) -> bool {
        self.id == needle || self.label() == needle
    }

    /// Opens this workspace's store and reads its chat sessions.
    pub fn sessions(&self) -> Result<SessionMap> {
        let store = SqliteStore::open(&self.store_path)?;
        chat_sessions(&store)
    }
}

fn folder_basename(folder: &str) -> Option<String> {
    let from_url = Url::parse(folder)
        .ok()
        .and_then(|u| u.to_file_path().ok())
        .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()));
    from_url.or_else(|| {
        folder
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

/// How many stores may still log detailed diagnostics during a discovery pass.
#[derive(Debug, Clone, Copy)]
pub struct DiagnosticBudget {
    remaining: usize,
}

impl DiagnosticBudget {
    pub fn new(remaining: usize) -> Self {
        Self { remaining }
    }

    /// Consumes one unit, returning whether any was left.
    pub fn take(&mut self) -> bool {
        if self.remaining == 0 {
            return false;
        }
        self.remaining -= 1;
        true
    }
}

impl Default for DiagnosticBudget {
    fn default() -> Self {
        Self::new(5)
    }
}

/// Locates and normalizes the chat sessions of one store.
pub fn chat_sessions(store: &impl ItemStore) -> Result<SessionMap> {
    let record = locate(store)?;
    Ok(normalize_located(record.as_ref()))
}

/// Scans `root` for workspace stores and counts the chats in each.
///
/// Entries that cannot be read are logged and skipped.
pub fn discover(root: &Path, budget: &mut DiagnosticBudget) -> Result<Vec<Workspace>> {
    info!("Scanning workspace path: {}", root.display());
    let mut entries: Vec<_> = fs::read_dir(root)
        .wrap_err_with(|| format!("Failed to read workspace root: {}", root.display()))?
        .flatten()
        .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    entries.sort_by_key(|e| e.file_name());
    debug!("Found {} entries in workspace directory", entries.len());

    let mut workspaces = Vec::new();
    for entry in entries {
        let id = entry.file_name().to_string_lossy().into_owned();
        let dir = entry.path();
        if !dir.join(STORE_FILE).exists() {
            debug!("Skipping {id}: no {STORE_FILE} found");
            continue;
        }
        match inspect(&dir, &id, budget) {
            Ok(ws) => workspaces.push(ws),
            Err(e) => warn!("Error processing workspace {id}: {e:#}"),
        }
    }

    info!("Found {} workspaces", workspaces.len());
    Ok(workspaces)
}

fn inspect(dir: &Path, id: &str, budget: &mut DiagnosticBudget) -> Result<Workspace> {
    let store_path = dir.join(STORE_FILE);
    let modified = fs::metadata(&store_path)
        .and_then(|m| m.modified())
        .wrap_err_with(|| format!("Failed to stat {}", store_path.display()))?;

    let store = SqliteStore::open(&store_path)?;
    let record = locate(&store)?;
    let chat_count = normalize_located(record.as_ref()).len();

    match &record {
        Some(r) => debug!(workspace = id, key = %r.key, chat_count, "Located chat data"),
        None if budget.take() => log_candidate_keys(&store, id)?,
        None => {}
    }

    Ok(Workspace {
        id: id.to_string(),
        folder: read_folder(dir),
        last_modified: DateTime::<Local>::from(modified),
        chat_count,
        store_path,
    })
}

fn log_candidate_keys(store: &impl ItemStore, id: &str) -> Result<()> {
    let chat_keys = store.keys(&["chat"])?;
    if !chat_keys.is_empty() {
        debug!(workspace = id, keys = ?chat_keys, "No chat data; chat-related keys");
        return Ok(());
    }
    let ai_keys = store.keys(&["ai", "conversation", "message"])?;
    if ai_keys.is_empty() {
        debug!(workspace = id, "No chat data found");
    } else {
        debug!(workspace = id, keys = ?ai_keys, "No chat data; AI/conversation-related keys");
    }
    Ok(())
}

fn read_folder(dir: &Path) -> Option<String> {
    #[derive(Deserialize)]
    struct WorkspaceFile {
        folder: Option<String>,
    }
    let content = fs::read_to_string(dir.join(WORKSPACE_FILE)).ok()?;
    serde_json::from_str::<WorkspaceFile>(&content).ok()?.folder
}

/// Workspaces that hold chats, most recently modified first.
pub fn with_chats(workspaces: Vec<Workspace>) -> Vec<Workspace> {
    let mut out: Vec<_> = workspaces.into_iter().filter(|w| w.chat_count > 0).collect();
    out.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
    out
}

/// Finds a workspace by id or label.
pub fn find<'a>(workspaces: &'a [Workspace], needle: &str) -> Result<&'a Workspace> {
    workspaces
        .iter()
        .find(|w| w.matches(needle))
        .ok_or_else(|| eyre!("No workspace with chats matches {needle:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace(id: &str, folder: Option<&str>, chats: usize, secs: i64) -> Workspace {
        Workspace {
            id: id.into(),
            store_path: PathBuf::from("/nowhere"),
            folder: folder.map(str::to_string),
            last_modified: DateTime::from_timestamp(secs, 0).unwrap().with_timezone(&Local),
            chat_count: chats,
        }
    }

    #[test]
    fn label_prefers_folder_basename() {
        let ws = workspace("abc", Some("file:///home/me/my%20project"), 1, 0);
        assert_eq!(ws.label(), "my project");
        assert!(ws.matches("my project"));
        assert!(ws.matches("abc"));

        assert_eq!(workspace("abc", None, 1, 0).label(), "abc");
        assert_eq!(
            workspace("abc", Some("vscode-remote://host/srv/app/"), 1, 0).label(),
            "app"
        );
    }

    #[test]
    fn with_chats_filters_and_sorts_newest_first() {
        let out = with_chats(vec![
            workspace("old", None, 2, 100),
            workspace("none", None, 0, 300),
            workspace("new", None, 1, 200),
        ]);
        let ids: Vec<_> = out.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn budget_runs_out() {
        let mut budget = DiagnosticBudget::new(2);
        assert!(budget.take());
        assert!(budget.take());
        assert!(!budget.take());
    }
}
