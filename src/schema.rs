//! Normalizes a located record into canonical sessions.
//!
//! Each [`SchemaKind`] stores its sessions in a different collection:
//!
//! | kind                  | collections tried (first non-empty wins)       |
//! |-----------------------|------------------------------------------------|
//! | `AgentStorage`        | `list`                                         |
//! | `ChatStore`           | `sessions`, `entries`, top-level array         |
//! | `AgentStorageVariant` | `list`, `sessions`, `conversations`, `entries`, top-level array |
//! | `SessionIndex`        | `entries`                                      |
//!
//! A collection is either an object keyed by session id or an array whose
//! elements are keyed by their `sessionId`, else `id`, else position.
//! Anything else normalizes to an empty map.

use crate::locator::{LocatedRecord, SchemaKind};
use crate::model::{Session, SessionMap};
use serde_json::Value;
use tracing::{debug, trace};

/// Top-level members tried for each schema, in priority order.
fn collections(kind: SchemaKind) -> &'static [&'static str] {
    match kind {
        SchemaKind::AgentStorage => &["list"],
        SchemaKind::ChatStore => &["sessions", "entries"],
        SchemaKind::AgentStorageVariant => &["list", "sessions", "conversations", "entries"],
        SchemaKind::SessionIndex => &["entries"],
    }
}

fn accepts_top_level_array(kind: SchemaKind) -> bool {
    matches!(
        kind,
        SchemaKind::ChatStore | SchemaKind::AgentStorageVariant
    )
}

pub fn normalize(record: &LocatedRecord) -> SessionMap {
    let Ok(payload) = serde_json::from_str::<Value>(&record.raw_value) else {
        debug!(key = %record.key, "Located record is not valid JSON");
        return SessionMap::new();
    };
    normalize_value(record.kind, &payload)
}

/// Normalizes an optional record; nothing located means no sessions.
pub fn normalize_located(record: Option<&LocatedRecord>) -> SessionMap {
    record.map(normalize).unwrap_or_default()
}

/// Number of sessions a record normalizes to.
pub fn session_count(record: &LocatedRecord) -> usize {
    normalize(record).len()
}

pub fn normalize_value(kind: SchemaKind, payload: &Value) -> SessionMap {
    let chosen = collections(kind)
        .iter()
        .filter_map(|name| payload.get(*name).map(|c| (*name, c)))
        .find(|(_, collection)| !is_empty_collection(collection));

    let (name, collection) = match chosen {
        Some(found) => found,
        None if accepts_top_level_array(kind) && payload.is_array() => ("<root>", payload),
        None => {
            trace!(?kind, "No session collection in payload");
            return SessionMap::new();
        }
    };

    let sessions = sessions_from_collection(collection);
    debug!(?kind, collection = name, count = sessions.len(), "Normalized sessions");
    sessions
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => true,
    }
}

fn sessions_from_collection(collection: &Value) -> SessionMap {
    let mut map = SessionMap::new();
    match collection {
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                let key = element_key(item).unwrap_or_else(|| index.to_string());
                let session =
                    Session::from_value(&key, item).unwrap_or_else(|| Session::placeholder(&key));
                map.insert(key, session);
            }
        }
        Value::Object(entries) => {
            for (index, (key, item)) in entries.iter().enumerate() {
                let key = if key.is_empty() {
                    index.to_string()
                } else {
                    key.clone()
                };
                let session =
                    Session::from_value(&key, item).unwrap_or_else(|| Session::placeholder(&key));
                map.insert(key, session);
            }
        }
        _ => {}
    }
    map
}

fn element_key(item: &Value) -> Option<String> {
    ["sessionId", "id"].iter().find_map(|field| match item.get(*field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
