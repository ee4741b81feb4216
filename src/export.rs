use crate::model::Session;
use crate::render;
use crate::store::SqliteStore;
use crate::utils::{ExportConfig, ProcessResult, millis_to_utc, parse_existing_frontmatter};
use crate::workspace::{self, DiagnosticBudget, Workspace, chat_sessions};
use chrono::{DateTime, Utc};
use crossbeam_channel::bounded;
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExportStats {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Default)]
struct Counters {
    created: AtomicUsize,
    updated: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

impl Counters {
    fn record(&self, result: ProcessResult) {
        let counter = match result {
            ProcessResult::Created => &self.created,
            ProcessResult::Updated => &self.updated,
            ProcessResult::Skipped => &self.skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ExportStats {
        ExportStats {
            created: self.created.load(Ordering::Relaxed),
            updated: self.updated.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    id: &'a str,
    title: String,
    workspace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
}

/// Exports every chat of every matching workspace under `config.target_dir`.
///
/// Each store is handled by one worker at a time; workers open their own
/// snapshot of the store, so no connection is shared.
pub fn execute(config: &ExportConfig) -> Result<ExportStats> {
    fs::create_dir_all(&config.target_dir).wrap_err("Failed to create target dir")?;

    let mut budget = DiagnosticBudget::default();
    let workspaces: Vec<Workspace> =
        workspace::with_chats(workspace::discover(&config.workspace_root, &mut budget)?)
            .into_iter()
            .filter(|w| config.workspace.as_deref().is_none_or(|needle| w.matches(needle)))
            .collect();

    let progress = if config.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(workspaces.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{bar:30.green} {pos}/{len} workspaces {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar
    };

    let dirs = export_dirs(&workspaces);
    let (tx, rx) = bounded::<(&Workspace, &str)>(32);
    let counters = Counters::default();
    let n_workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(8)
        .min(workspaces.len().max(1));

    std::thread::scope(|s| {
        for _ in 0..n_workers {
            let rx = rx.clone();
            let (config, counters, progress) = (&config, &counters, &progress);

            s.spawn(move || {
                while let Ok((ws, dir_name)) = rx.recv() {
                    progress.set_message(ws.label());
                    if let Err(e) = export_workspace(ws, dir_name, config, counters) {
                        counters.errors.fetch_add(1, Ordering::Relaxed);
                        warn!("Error exporting workspace {}: {:#}", ws.id, e);
                    }
                    progress.inc(1);
                }
            });
        }

        drop(rx);

        for (ws, dir_name) in workspaces.iter().zip(&dirs) {
            if tx.send((ws, dir_name.as_str())).is_err() {
                break;
            }
        }

        drop(tx);
    });

    progress.finish_and_clear();
    let stats = counters.snapshot();

    if !config.quiet {
        eprintln!(
            "Done. {} created, {} updated, {} skipped. Errors: {}",
            stats.created, stats.updated, stats.skipped, stats.errors,
        );
    }

    Ok(stats)
}

// One directory per workspace, named after its folder. Folders that share a
// name get the workspace id appended so their chats never mix.
fn export_dirs(workspaces: &[Workspace]) -> Vec<String> {
    let id_slug = |ws: &Workspace| match slug::slugify(&ws.id) {
        s if s.is_empty() => ws.id.clone(),
        s => s,
    };
    let bases: Vec<String> = workspaces
        .iter()
        .map(|ws| match slug::slugify(ws.label()) {
            s if s.is_empty() => id_slug(ws),
            s => s,
        })
        .collect();

    let mut uses: HashMap<&str, usize> = HashMap::new();
    for base in &bases {
        *uses.entry(base.as_str()).or_default() += 1;
    }

    let mut taken = HashSet::new();
    workspaces
        .iter()
        .zip(&bases)
        .enumerate()
        .map(|(i, (ws, base))| {
            let mut name = if uses[base.as_str()] > 1 {
                format!("{base}-{}", id_slug(ws))
            } else {
                base.clone()
            };
            if !taken.insert(name.clone()) {
                name = format!("{name}-{i}");
                taken.insert(name.clone());
            }
            name
        })
        .collect()
}

fn export_workspace(
    ws: &Workspace,
    dir_name: &str,
    config: &ExportConfig,
    counters: &Counters,
) -> Result<()> {
    let store = SqliteStore::snapshot(&ws.store_path)?;
    let sessions = chat_sessions(&store)?;
    drop(store);

    let label = ws.label();
    let dir = config.target_dir.join(dir_name);
    fs::create_dir_all(&dir)
        .wrap_err_with(|| format!("Failed to create: {}", dir.display()))?;

    for session in sessions.sessions() {
        match export_session(session, &label, &dir, config) {
            Ok(result) => counters.record(result),
            Err(e) => {
                counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("Error [{}]: {:#}", short_id(&session.id), e);
            }
        }
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    head(id, 8)
}

fn head(id: &str, chars: usize) -> &str {
    id.char_indices().nth(chars).map(|(i, _)| &id[..i]).unwrap_or(id)
}

// Ids come straight from store keys, so only their slug may reach a path.
fn id_prefix(id: &str, chars: usize) -> String {
    match slug::slugify(head(id, chars)) {
        s if s.is_empty() => "chat".to_string(),
        s => s,
    }
}

fn export_session(
    session: &Session,
    workspace_label: &str,
    dir: &Path,
    config: &ExportConfig,
) -> Result<ProcessResult> {
    let updated_at = session
        .updated_at
        .or(session.created_at)
        .and_then(millis_to_utc);
    let existing_path = find_existing_file(dir, &session.id);

    if !config.force
        && let Some(ref existing) = existing_path
        && let Some(fm) = parse_existing_frontmatter(existing)
        && let (Some(on_disk), Some(in_store)) = (fm.updated_at, updated_at)
        && on_disk >= in_store
    {
        debug!("Skipped: {}", session.id);
        return Ok(ProcessResult::Skipped);
    }

    let document = render::render(session, workspace_label).wrap_err("Failed to render chat")?;
    let title = session.display_title();
    let stem = allocate_filename(&session.id, &title, dir);
    let desired_path = dir.join(format!("{}.md", stem));
    let result = if existing_path.is_none() {
        ProcessResult::Created
    } else {
        ProcessResult::Updated
    };

    if let Some(ref old_path) = existing_path
        && old_path != &desired_path
        && let Err(e) = fs::rename(old_path, &desired_path)
    {
        warn!(
            "Rename failed {} -> {}: {}",
            old_path.display(),
            desired_path.display(),
            e
        );
    }

    let fm = Frontmatter {
        id: &session.id,
        title,
        workspace: workspace_label.to_string(),
        created_at: session.created_at.and_then(millis_to_utc),
        updated_at,
        tags: config.tags.as_deref(),
    };
    let yaml = serde_yaml::to_string(&fm).wrap_err("Failed to serialize frontmatter")?;

    let md_file = File::create(&desired_path)
        .wrap_err_with(|| format!("Failed to create: {}", desired_path.display()))?;
    let mut writer = BufWriter::new(md_file);
    writeln!(writer, "---")?;
    write!(writer, "{}", yaml)?;
    writeln!(writer, "---")?;
    writeln!(writer)?;
    write!(writer, "{}", document)?;
    writer.flush()?;

    match result {
        ProcessResult::Created => debug!("Created: {}.md", stem),
        ProcessResult::Updated => debug!("Updated: {}.md", stem),
        ProcessResult::Skipped => {}
    }

    Ok(result)
}

// Find a file whose name starts with the 8-char id prefix,
// then confirm ownership by reading the `id:` field from its frontmatter.
fn find_existing_file(dir: &Path, id: &str) -> Option<PathBuf> {
    let prefix = id_prefix(id, 8);
    fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|e| {
            let n = e.file_name();
            let s = n.to_string_lossy();
            s.ends_with(".md") && s.starts_with(&prefix)
        })
        .find_map(|e| {
            let path = e.path();
            let fm = parse_existing_frontmatter(&path)?;
            (fm.id.as_deref() == Some(id)).then_some(path)
        })
}

// For each prefix length [8, 12, full id], check the filesystem:
//   - file absent → claim it
//   - file present and owned by this id → reuse it
//   - file present and owned by another id → try a longer prefix
// Ids that still collide once slugged get a numeric suffix.
// Each workspace directory is written by a single worker, so no lock is needed.
fn allocate_filename(id: &str, title: &str, dir: &Path) -> String {
    let raw_slug = slug::slugify(title);
    // slug output is ASCII-only, so byte == char
    let slug = raw_slug[..raw_slug.len().min(60)]
        .trim_end_matches('-')
        .to_string();
    let stem_for = |prefix: &str| {
        if slug.is_empty() {
            prefix.to_string()
        } else {
            format!("{}_{}", prefix, slug)
        }
    };
    let claimable = |stem: &str| {
        let path = dir.join(format!("{}.md", stem));
        match path.try_exists() {
            Ok(false) | Err(_) => true,
            Ok(true) => parse_existing_frontmatter(&path)
                .is_some_and(|fm| fm.id.as_deref() == Some(id)),
        }
    };

    for len in [8usize, 12usize, usize::MAX] {
        let stem = stem_for(&id_prefix(id, len));
        if claimable(&stem) {
            return stem;
        }
    }

    let base = stem_for(&id_prefix(id, usize::MAX));
    (2..)
        .map(|n| format!("{base}-{n}"))
        .find(|stem| claimable(stem))
        .unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_grow_on_prefix_collision() {
        let dir = tempfile::tempdir().unwrap();
        let first = allocate_filename("abcdefgh-1111-2222", "Hello World", dir.path());
        assert_eq!(first, "abcdefgh_hello-world");

        fs::write(
            dir.path().join(format!("{first}.md")),
            "---\nid: abcdefgh-0000-9999\n---\n",
        )
        .unwrap();
        let second = allocate_filename("abcdefgh-1111-2222", "Hello World", dir.path());
        assert_eq!(second, "abcdefgh-111_hello-world");

        let owner = allocate_filename("abcdefgh-0000-9999", "Hello World", dir.path());
        assert_eq!(owner, first);
    }

    #[test]
    fn id_prefixes_never_leave_the_directory() {
        assert_eq!(id_prefix("../../esc", 8), "es");
        assert_eq!(id_prefix("/etc/passwd", usize::MAX), "etc-passwd");
        assert_eq!(id_prefix("..", 8), "chat");

        let dir = tempfile::tempdir().unwrap();
        let stem = allocate_filename("../../esc", "t", dir.path());
        assert_eq!(stem, "es_t");
        assert_eq!(dir.path().join(format!("{stem}.md")).parent(), Some(dir.path()));
    }

    #[test]
    fn slug_collisions_fall_back_to_numbered_stems() {
        let dir = tempfile::tempdir().unwrap();
        for (stem, owner) in [("ab_x", "AB"), ("ab_x-2", "a/b")] {
            fs::write(
                dir.path().join(format!("{stem}.md")),
                format!("---\nid: {owner}\n---\n"),
            )
            .unwrap();
        }
        assert_eq!(allocate_filename("ab", "x", dir.path()), "ab_x-3");
        assert_eq!(allocate_filename("AB", "x", dir.path()), "ab_x");
    }

    fn workspace(id: &str, folder: &str) -> Workspace {
        Workspace {
            id: id.to_string(),
            store_path: PathBuf::from(id).join("state.vscdb"),
            folder: Some(folder.to_string()),
            last_modified: chrono::Local::now(),
            chat_count: 1,
        }
    }

    #[test]
    fn workspaces_sharing_a_folder_name_get_separate_directories() {
        let workspaces = [
            workspace("1f3a", "file:///a/app"),
            workspace("9c2e", "file:///b/app"),
            workspace("77aa", "file:///c/Other%20Project"),
        ];
        assert_eq!(
            export_dirs(&workspaces),
            vec!["app-1f3a", "app-9c2e", "other-project"]
        );
    }

    #[test]
    fn short_ids_are_used_whole() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(allocate_filename("7", "", dir.path()), "7");
        assert_eq!(short_id("7"), "7");
    }
}
