use chrono::{DateTime, Local, TimeZone, Utc};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone)]
pub struct ExportConfig {
    pub target_dir: PathBuf,
    pub workspace_root: PathBuf,
    /// Only export workspaces matching this id or label.
    pub workspace: Option<String>,
    pub tags: Option<Vec<String>>,
    pub force: bool,
    pub quiet: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Created,
    Updated,
    Skipped,
}

/// The fields of an exported file's frontmatter that decide whether it is
/// re-written. Anything else in the block is ignored.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileFrontmatter {
    pub id: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

const FRONTMATTER_LIMIT: usize = 16 * 1024;

pub fn millis_to_utc(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Formats an epoch-millisecond timestamp in local time, `Unknown` if out of range.
pub fn format_millis(millis: i64, fmt: &str) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(dt) => dt.format(fmt).to_string(),
        None => "Unknown".to_string(),
    }
}

/// Reads the YAML block between the leading `---` fences of an exported file.
/// Returns `None` for files without a closed block or with neither an `id`
/// nor an `updated_at`.
pub fn parse_existing_frontmatter(path: &Path) -> Option<FileFrontmatter> {
    let mut lines = BufReader::new(File::open(path).ok()?).lines();
    if lines.next()?.ok()?.trim() != "---" {
        return None;
    }

    let mut block = String::new();
    loop {
        let line = lines.next()?.ok()?;
        if line.trim() == "---" {
            break;
        }
        if block.len() + line.len() > FRONTMATTER_LIMIT {
            return None;
        }
        block.push_str(&line);
        block.push('\n');
    }

    serde_yaml::from_str::<FileFrontmatter>(&block)
        .ok()
        .filter(|fm| fm.id.is_some() || fm.updated_at.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn frontmatter_is_read_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "---\nid: abc-123\ntitle: Hello\nupdated_at: 2023-11-14T22:13:20Z\n---\n\n# Body"
        )
        .unwrap();
        let fm = parse_existing_frontmatter(file.path()).unwrap();
        assert_eq!(fm.id.as_deref(), Some("abc-123"));
        assert_eq!(fm.updated_at, millis_to_utc(1_700_000_000_000));
    }

    #[test]
    fn frontmatter_written_by_export_is_read_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "---\nid: '0'\ntitle: Chat 0\ntags:\n- trae\nupdated_at: 2023-11-14T22:13:20.500Z\n---\n"
        )
        .unwrap();
        let fm = parse_existing_frontmatter(file.path()).unwrap();
        assert_eq!(fm.id.as_deref(), Some("0"));
        assert_eq!(fm.updated_at, millis_to_utc(1_700_000_000_500));
    }

    #[test]
    fn unclosed_or_unrelated_frontmatter_is_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "---\nid: abc\n# never closed").unwrap();
        assert_eq!(parse_existing_frontmatter(file.path()), None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "---\ntitle: Notes\n---\n").unwrap();
        assert_eq!(parse_existing_frontmatter(file.path()), None);
    }

    #[test]
    fn files_without_frontmatter_are_ignored() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# Just markdown").unwrap();
        assert_eq!(parse_existing_frontmatter(file.path()), None);
    }
}
