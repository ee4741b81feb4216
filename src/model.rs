//! Canonical session model shared by the normalizer, summarizer and renderer.
//!
//! Every store schema is converted into [`Session`] / [`Message`] values. The
//! raw JSON of message content is kept as-is in [`Message::content_fields`];
//! it is only turned into display text by [`crate::sanitize`].

use chrono::DateTime;
use serde_json::{Map, Value};

/// Fields scanned, in order, for the text of a user message.
pub const USER_CONTENT_FIELDS: [&str; 5] = ["content", "text", "message", "body", "prompt"];

/// Fields scanned, in order, for the text of an assistant message.
pub const ASSISTANT_CONTENT_FIELDS: [&str; 5] = ["content", "text", "message", "body", "response"];

const ALL_CONTENT_FIELDS: [&str; 6] = ["content", "text", "message", "body", "prompt", "response"];

// ---------------------------------------------------------------------------
// Content
// ---------------------------------------------------------------------------

/// Borrowed view of an arbitrary content value, classified by shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Content<'a> {
    /// `null`, `false`, `0`, `""` or a missing field.
    Empty,
    Text(&'a str),
    /// A JSON object or array.
    Structured(&'a Value),
    /// Any other number or `true`.
    Scalar(&'a Value),
}

impl<'a> Content<'a> {
    pub fn of(value: Option<&'a Value>) -> Self {
        value.map(Content::from).unwrap_or(Content::Empty)
    }
}

impl<'a> From<&'a Value> for Content<'a> {
    fn from(value: &'a Value) -> Self {
        if !is_truthy(value) {
            return Content::Empty;
        }
        match value {
            Value::String(s) => Content::Text(s),
            Value::Object(_) | Value::Array(_) => Content::Structured(value),
            _ => Content::Scalar(value),
        }
    }
}

/// Loose truthiness as the stores' writers use it: `null`, `false`, `0` and
/// `""` count as absent.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Looks up `key` on an object value, treating non-truthy members as absent.
pub fn truthy_member<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| is_truthy(v))
}

/// Converts an epoch-millisecond timestamp in any of the encountered encodings.
///
/// Numbers are taken as-is, numeric strings are parsed, RFC 3339 strings are
/// converted. Zero means "unknown".
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    let millis = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.timestamp_millis())
            })
        }
        _ => None,
    };
    millis.filter(|ms| *ms != 0)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    /// Any other tag, or an empty string when the record carries none.
    Other(String),
}

impl Role {
    fn parse(value: Option<&Value>) -> Self {
        match value.and_then(Value::as_str) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some(other) => Role::Other(other.to_string()),
            None => Role::Other(String::new()),
        }
    }
}

/// Shape of the tool-execution payload attached to an assistant message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AgentTask<'a> {
    /// `agentTaskContent.guideline.planItems` is an array.
    Plan(&'a [Value]),
    /// `agentTaskContent` exists but has no usable plan items.
    Unstructured,
    Absent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub turn_id: Option<String>,
    pub turn_index: Option<i64>,
    pub timestamp: Option<i64>,
    /// Raw values of the known content fields present on the record.
    pub content_fields: Map<String, Value>,
    /// Raw `agentTaskContent` payload.
    pub agent_task: Option<Value>,
    pub agent_name: Option<String>,
    pub parsed_query: Vec<String>,
}

impl Message {
    /// Builds a message from one element of a `messages` array. Returns `None`
    /// for anything that is not an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let content_fields = obj
            .iter()
            .filter(|(k, _)| ALL_CONTENT_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let parsed_query = match obj.get("parsedQuery") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
            _ => Vec::new(),
        };

        Some(Self {
            role: Role::parse(obj.get("role")),
            turn_id: obj.get("turnId").and_then(scalar_string),
            turn_index: obj
                .get("turnIndex")
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))),
            timestamp: obj.get("timestamp").and_then(parse_timestamp),
            content_fields,
            agent_task: obj.get("agentTaskContent").filter(|v| !v.is_null()).cloned(),
            agent_name: obj
                .get("agentName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            parsed_query,
        })
    }

    pub fn field(&self, name: &str) -> Content<'_> {
        Content::of(self.content_fields.get(name))
    }

    pub fn agent_task(&self) -> AgentTask<'_> {
        let Some(task) = self.agent_task.as_ref().filter(|v| is_truthy(v)) else {
            return AgentTask::Absent;
        };
        match task
            .get("guideline")
            .and_then(|g| g.get("planItems"))
            .and_then(Value::as_array)
        {
            Some(items) => AgentTask::Plan(items),
            None => AgentTask::Unstructured,
        }
    }
}

/// One plan item of an assistant's task payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolStep<'a> {
    pub thought: Content<'a>,
    pub tool_name: Option<&'a str>,
    pub params: Option<&'a Map<String, Value>>,
    pub result: Content<'a>,
}

impl<'a> ToolStep<'a> {
    pub fn from_value(value: &'a Value) -> Self {
        Self {
            thought: Content::of(value.get("thought")),
            tool_name: value
                .get("toolName")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty()),
            params: value.get("params").and_then(Value::as_object),
            result: Content::of(value.get("result")),
        }
    }

    pub fn param(&self, name: &str) -> Content<'a> {
        Content::of(self.params.and_then(|p| p.get(name)))
    }
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// `sessionId` of the record, else the key it was stored under. Never empty.
    pub id: String,
    pub title: Option<String>,
    /// The record's `type` tag.
    pub kind: Option<String>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
    pub messages: Vec<Message>,
}

impl Session {
    /// Builds a session from a record stored under `key`. Returns `None` for
    /// anything that is not an object.
    pub fn from_value(key: &str, value: &Value) -> Option<Self> {
        let obj = value.as_object()?;

        let non_empty_str = |field: &str| {
            obj.get(field)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let id = non_empty_str("sessionId").unwrap_or_else(|| key.to_string());

        let messages = obj
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Message::from_value).collect())
            .unwrap_or_default();

        Some(Self {
            id,
            title: non_empty_str("title").or_else(|| non_empty_str("name")),
            kind: non_empty_str("type"),
            created_at: obj
                .get("createdAt")
                .and_then(parse_timestamp)
                .or_else(|| obj.get("timestamp").and_then(parse_timestamp)),
            updated_at: obj.get("updatedAt").and_then(parse_timestamp),
            messages,
        })
    }

    /// An empty session for a collection entry that is not an object, so the
    /// entry still counts.
    pub fn placeholder(key: &str) -> Self {
        Self {
            id: key.to_string(),
            title: None,
            kind: None,
            created_at: None,
            updated_at: None,
            messages: Vec::new(),
        }
    }

    /// Explicit title, else `Chat ` plus the first eight characters of the id.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(t) => t.clone(),
            None => format!("Chat {}", self.id.chars().take(8).collect::<String>()),
        }
    }

    pub fn first_user_message(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.role == Role::User)
    }
}

/// Sessions keyed by the collection key they were found under, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMap {
    entries: Vec<(String, Session)>,
}

impl SessionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts under `key`. A repeated key replaces the earlier session but
    /// keeps its position.
    pub fn insert(&mut self, key: String, session: Session) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = session,
            None => self.entries.push((key, session)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.entries.iter().map(|(_, s)| s)
    }

    pub fn into_sessions(self) -> Vec<Session> {
        self.entries.into_iter().map(|(_, s)| s).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_id_prefers_session_id_field() {
        let s = Session::from_value("3", &json!({ "sessionId": "abc", "messages": [] })).unwrap();
        assert_eq!(s.id, "abc");

        let s = Session::from_value("key-1", &json!({ "sessionId": "" })).unwrap();
        assert_eq!(s.id, "key-1");
    }

    #[test]
    fn created_at_falls_back_to_timestamp_and_zero_is_unknown() {
        let s = Session::from_value("k", &json!({ "timestamp": 1700000000000i64, "updatedAt": 0 }))
            .unwrap();
        assert_eq!(s.created_at, Some(1_700_000_000_000));
        assert_eq!(s.updated_at, None);
    }

    #[test]
    fn display_title_synthesizes_from_id() {
        let s = Session::from_value("k", &json!({ "sessionId": "0123456789abcdef" })).unwrap();
        assert_eq!(s.display_title(), "Chat 01234567");

        let s = Session::from_value("k", &json!({ "name": "Refactor" })).unwrap();
        assert_eq!(s.display_title(), "Refactor");
    }

    #[test]
    fn message_keeps_only_known_content_fields() {
        let m = Message::from_value(&json!({
            "role": "assistant",
            "turnId": 7,
            "response": "hi",
            "extra": "ignored",
            "parsedQuery": ["a", 2]
        }))
        .unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(m.turn_id.as_deref(), Some("7"));
        assert_eq!(m.content_fields.len(), 1);
        assert_eq!(m.field("response"), Content::Text("hi"));
        assert_eq!(m.parsed_query, vec!["a".to_string(), "2".to_string()]);
    }

    #[test]
    fn agent_task_distinguishes_absent_and_unstructured() {
        let plan = Message::from_value(&json!({
            "role": "assistant",
            "agentTaskContent": { "guideline": { "planItems": [ {}, {} ] } }
        }))
        .unwrap();
        assert!(matches!(plan.agent_task(), AgentTask::Plan(items) if items.len() == 2));

        let loose = Message::from_value(&json!({
            "role": "assistant",
            "agentTaskContent": { "guideline": {} }
        }))
        .unwrap();
        assert_eq!(loose.agent_task(), AgentTask::Unstructured);

        let none = Message::from_value(&json!({ "role": "assistant" })).unwrap();
        assert_eq!(none.agent_task(), AgentTask::Absent);
    }

    #[test]
    fn timestamps_accept_strings() {
        assert_eq!(parse_timestamp(&json!("1700000000000")), Some(1_700_000_000_000));
        assert_eq!(
            parse_timestamp(&json!("2023-11-14T22:13:20Z")),
            Some(1_700_000_000_000)
        );
        assert_eq!(parse_timestamp(&json!(true)), None);
    }

    #[test]
    fn session_map_replaces_duplicate_keys_in_place() {
        let mut map = SessionMap::new();
        let mk = |id: &str| Session::from_value(id, &json!({})).unwrap();
        map.insert("a".into(), mk("a"));
        map.insert("b".into(), mk("b"));
        map.insert("a".into(), mk("z"));
        assert_eq!(map.len(), 2);
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(map.sessions().next().unwrap().id, "z");
    }
}
