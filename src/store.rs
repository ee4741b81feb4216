//! Read-only access to a workspace `state.vscdb`.
//!
//! The editor keeps per-workspace state in a SQLite table:
//! ```sql
//! CREATE TABLE ItemTable (key TEXT UNIQUE ON CONFLICT REPLACE, value BLOB);
//! ```
//! Values are usually JSON text, occasionally stored as BLOB. Nothing here
//! ever writes to the database.

use eyre::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, backup::Backup, params_from_iter};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// The lookups the locator needs from a key-value store.
pub trait ItemStore {
    /// Value stored under exactly `key`, `None` if the key is missing or null.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// All non-null `(key, value)` pairs whose key contains any of `patterns`
    /// (case-sensitive), in store order.
    fn scan(&self, patterns: &[&str]) -> Result<Vec<(String, String)>>;

    /// Keys containing any of `patterns`, in store order. Used for diagnostics.
    fn keys(&self, patterns: &[&str]) -> Result<Vec<String>>;
}

pub struct SqliteStore {
    conn: Connection,
    // Keeps the snapshot file alive for as long as the connection is open.
    _snapshot: Option<NamedTempFile>,
}

impl SqliteStore {
    /// Opens the database at `path` read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err_with(|| format!("Failed to open store: {}", path.display()))?;
        Ok(Self {
            conn,
            _snapshot: None,
        })
    }

    /// Copies the database at `path` into a temporary file and opens the copy.
    /// A running editor can keep writing to the original meanwhile.
    pub fn snapshot(path: &Path) -> Result<Self> {
        let src = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .wrap_err_with(|| format!("Failed to open source store: {}", path.display()))?;

        let tmp = NamedTempFile::new().wrap_err("Failed to create temporary file")?;
        let mut dst =
            Connection::open(tmp.path()).wrap_err("Failed to open snapshot connection")?;

        {
            let backup = Backup::new(&src, &mut dst).wrap_err("Failed to initialize backup")?;
            backup
                .run_to_completion(1000, Duration::from_millis(5), None)
                .wrap_err("Backup did not complete successfully")?;
        }
        drop(src);

        Ok(Self {
            conn: dst,
            _snapshot: Some(tmp),
        })
    }

    /// Wraps an already open connection.
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn,
            _snapshot: None,
        }
    }

    fn filtered(&self, select: &str, patterns: &[&str]) -> Result<rusqlite::Statement<'_>> {
        let clause = if patterns.is_empty() {
            "1".to_string()
        } else {
            (1..=patterns.len())
                .map(|i| format!("instr(\"key\", ?{i}) > 0"))
                .collect::<Vec<_>>()
                .join(" OR ")
        };
        let sql = format!("SELECT {select} FROM ItemTable WHERE {clause} ORDER BY rowid");
        self.conn
            .prepare(&sql)
            .wrap_err("Failed to prepare key scan")
    }
}

fn value_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(String::from_utf8_lossy(bytes).into_owned())
        }
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
    }
}

impl ItemStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT value FROM ItemTable WHERE \"key\" = ?1")
            .wrap_err("Failed to prepare key lookup")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(value_text(row.get_ref(0)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, patterns: &[&str]) -> Result<Vec<(String, String)>> {
        let mut stmt = self.filtered("\"key\", value", patterns)?;
        let rows = stmt.query_map(params_from_iter(patterns.iter()), |row| {
            Ok((row.get::<_, String>(0)?, value_text(row.get_ref(1)?)))
        })?;

        let mut out = Vec::new();
        for row in rows {
            if let (key, Some(value)) = row.wrap_err("Failed to read scanned row")? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    fn keys(&self, patterns: &[&str]) -> Result<Vec<String>> {
        let mut stmt = self.filtered("\"key\"", patterns)?;
        stmt.query_map(params_from_iter(patterns.iter()), |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()
            .wrap_err("Failed to collect keys")
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::memory_store;
    use super::*;

    #[test]
    fn get_returns_none_for_missing_and_null() {
        let store = memory_store(&[("a", Some("1")), ("b", None)]);
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").unwrap(), None);
        assert_eq!(store.get("c").unwrap(), None);
    }

    #[test]
    fn scan_is_case_sensitive_and_ordered() {
        let store = memory_store(&[
            ("zz.chat", Some("1")),
            ("CHAT.upper", Some("2")),
            ("aa.session", Some("3")),
            ("plain", Some("4")),
        ]);
        let keys: Vec<_> = store
            .scan(&["chat", "session"])
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["zz.chat", "aa.session"]);
        assert_eq!(store.keys(&[]).unwrap().len(), 4);
    }

    #[test]
    fn blob_values_are_read_as_text() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE ItemTable (key TEXT, value BLOB);")
            .unwrap();
        conn.execute(
            "INSERT INTO ItemTable VALUES ('k', ?1)",
            [b"{\"list\":[]}".to_vec()],
        )
        .unwrap();
        let store = SqliteStore::from_connection(conn);
        assert_eq!(store.get("k").unwrap().as_deref(), Some("{\"list\":[]}"));
    }
}
