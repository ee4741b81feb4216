//! Finds the record holding chat data in a workspace store.
//!
//! Different releases of the editor stored chats under different keys. Known
//! keys are tried first, newest generation first. When none is present, keys
//! that look chat-related are sniffed for a JSON payload with a recognizable
//! collection.

use crate::model::truthy_member;
use crate::store::ItemStore;
use eyre::Result;
use serde_json::Value;
use tracing::{debug, trace};

pub const AGENT_STORAGE_KEY: &str = "memento/icube-ai-agent-storage";
pub const CHAT_STORE_KEY: &str = "ChatStore";
pub const SESSION_INDEX_KEY: &str = "chat.ChatSessionStore.index";

/// Exact keys tried in order before falling back to sniffing.
pub const KNOWN_KEYS: [&str; 5] = [
    AGENT_STORAGE_KEY,
    SESSION_INDEX_KEY,
    CHAT_STORE_KEY,
    "memento/icube-ai-chat-storage-7467774676505887760",
    "memento/icube-ai-ng-chat-storage-7467774676505887760",
];

/// Substrings of keys worth sniffing.
pub const SNIFF_PATTERNS: [&str; 5] = ["chat", "ai", "conversation", "session", "memento"];

const AGENT_STORAGE_PREFIX: &str = "memento/icube-ai";

/// Storage schema generation, decided by the key the record was found under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// `memento/icube-ai-agent-storage`: a `list` of sessions.
    AgentStorage,
    /// `ChatStore`: `sessions` or `entries` keyed by id.
    ChatStore,
    /// Any other `memento/icube-ai*` key.
    AgentStorageVariant,
    /// `chat.ChatSessionStore.index` and anything unrecognized: `entries`.
    SessionIndex,
}

impl SchemaKind {
    pub fn from_key(key: &str) -> Self {
        if key == AGENT_STORAGE_KEY {
            SchemaKind::AgentStorage
        } else if key == CHAT_STORE_KEY {
            SchemaKind::ChatStore
        } else if key.contains(AGENT_STORAGE_PREFIX) {
            SchemaKind::AgentStorageVariant
        } else {
            SchemaKind::SessionIndex
        }
    }
}

/// Which lookup produced a [`LocatedRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatedVia {
    KnownKey,
    Sniffed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedRecord {
    pub key: String,
    pub raw_value: String,
    pub kind: SchemaKind,
    pub via: LocatedVia,
}

impl LocatedRecord {
    pub fn new(key: impl Into<String>, raw_value: impl Into<String>, via: LocatedVia) -> Self {
        let key = key.into();
        Self {
            kind: SchemaKind::from_key(&key),
            key,
            raw_value: raw_value.into(),
            via,
        }
    }
}

/// Result of sniffing one candidate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Match,
    NoMarkers,
    Malformed,
}

pub fn probe(raw_value: &str) -> Probe {
    let Ok(value) = serde_json::from_str::<Value>(raw_value) else {
        return Probe::Malformed;
    };
    let has_marker = value.is_array()
        || ["sessions", "conversations", "entries", "list"]
            .iter()
            .any(|marker| truthy_member(&value, marker).is_some());
    if has_marker {
        Probe::Match
    } else {
        Probe::NoMarkers
    }
}

/// Locates the record most likely to contain chat data.
///
/// `Ok(None)` means the store holds no chat data. Errors come only from the
/// store itself.
pub fn locate(store: &impl ItemStore) -> Result<Option<LocatedRecord>> {
    for key in KNOWN_KEYS {
        if let Some(value) = store.get(key)? {
            debug!(key, "Found chat data under known key");
            return Ok(Some(LocatedRecord::new(key, value, LocatedVia::KnownKey)));
        }
    }

    for (key, value) in store.scan(&SNIFF_PATTERNS)? {
        match probe(&value) {
            Probe::Match => {
                debug!(key = %key, "Found potential chat data by sniffing");
                return Ok(Some(LocatedRecord::new(key, value, LocatedVia::Sniffed)));
            }
            Probe::Malformed => trace!(key = %key, "Skipping candidate: not JSON"),
            Probe::NoMarkers => trace!(key = %key, "Skipping candidate: no chat markers"),
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::memory_store;

    #[test]
    fn known_keys_win_in_priority_order() {
        let store = memory_store(&[
            ("ChatStore", Some(r#"{"sessions":{}}"#)),
            ("chat.ChatSessionStore.index", Some(r#"{"entries":{}}"#)),
        ]);
        let record = locate(&store).unwrap().unwrap();
        assert_eq!(record.key, SESSION_INDEX_KEY);
        assert_eq!(record.kind, SchemaKind::SessionIndex);
        assert_eq!(record.via, LocatedVia::KnownKey);
    }

    #[test]
    fn null_known_key_is_skipped() {
        let store = memory_store(&[
            (AGENT_STORAGE_KEY, None),
            (CHAT_STORE_KEY, Some(r#"{"entries":{"a":{}}}"#)),
        ]);
        assert_eq!(locate(&store).unwrap().unwrap().key, CHAT_STORE_KEY);
    }

    #[test]
    fn sniffing_skips_malformed_and_unmarked_candidates() {
        let store = memory_store(&[
            ("workbench.chat.broken", Some("{not json")),
            ("workbench.chat.prefs", Some(r#"{"fontSize":12}"#)),
            ("workbench.chat.empty", Some(r#"{"list":[]}"#)),
            ("my.conversation.history", Some(r#"[{"id":"x"}]"#)),
        ]);
        assert_eq!(probe("{not json"), Probe::Malformed);
        assert_eq!(probe(r#"{"fontSize":12}"#), Probe::NoMarkers);

        let record = locate(&store).unwrap().unwrap();
        assert_eq!(record.key, "workbench.chat.empty");
        assert_eq!(record.via, LocatedVia::Sniffed);
    }

    #[test]
    fn sniffing_is_case_sensitive() {
        let store = memory_store(&[("CHAT", Some(r#"{"list":[]}"#))]);
        assert_eq!(locate(&store).unwrap(), None);
    }

    #[test]
    fn no_matching_keys_locates_nothing() {
        let store = memory_store(&[("editor.fontSize", Some("14")), ("theme", Some("\"dark\""))]);
        assert_eq!(locate(&store).unwrap(), None);
    }

    #[test]
    fn repeated_locate_is_stable() {
        let store = memory_store(&[
            ("a.session", Some(r#"{"sessions":{"x":{}}}"#)),
            ("b.session", Some(r#"{"sessions":{"y":{}}}"#)),
        ]);
        let first = locate(&store).unwrap();
        let second = locate(&store).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.unwrap().key, "a.session");
    }

    #[test]
    fn schema_kind_from_key() {
        assert_eq!(SchemaKind::from_key(AGENT_STORAGE_KEY), SchemaKind::AgentStorage);
        assert_eq!(SchemaKind::from_key("ChatStore"), SchemaKind::ChatStore);
        assert_eq!(
            SchemaKind::from_key("memento/icube-ai-ng-chat-storage-1"),
            SchemaKind::AgentStorageVariant
        );
        assert_eq!(SchemaKind::from_key("foo.chat"), SchemaKind::SessionIndex);
    }
}
