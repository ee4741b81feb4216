//! One-line summaries of sessions, used for listings.

use crate::model::{Message, Session, USER_CONTENT_FIELDS};
use crate::sanitize;
use crate::utils::format_millis;

const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    /// `updated_at`, else `created_at`, else 0. Listings sort on this, newest first.
    pub timestamp: i64,
    pub message_count: usize,
    pub preview: String,
}

pub fn summarize(session: &Session) -> SessionSummary {
    let preview = preview(session);
    let timestamp = session.updated_at.or(session.created_at).unwrap_or(0);
    let updated = if timestamp == 0 {
        "Unknown".to_string()
    } else {
        format_millis(timestamp, "%Y-%m-%d")
    };
    let message_count = session.messages.len();

    SessionSummary {
        id: session.id.clone(),
        title: session.display_title(),
        description: format!("{message_count} messages • Updated: {updated} • {preview}"),
        timestamp,
        message_count,
        preview,
    }
}

/// Summaries of `sessions`, most recently updated first. Equal timestamps
/// keep their input order.
pub fn summarize_all<'a>(sessions: impl IntoIterator<Item = &'a Session>) -> Vec<SessionSummary> {
    let mut out: Vec<_> = sessions.into_iter().map(summarize).collect();
    out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    out
}

fn preview(session: &Session) -> String {
    session
        .first_user_message()
        .and_then(preferred_text)
        .map(|text| truncate(&text, PREVIEW_CHARS))
        .unwrap_or_else(|| "No messages".to_string())
}

/// Sanitized text of the first user content field that is populated.
fn preferred_text(message: &Message) -> Option<String> {
    USER_CONTENT_FIELDS
        .iter()
        .find_map(|field| sanitize::usable(message.field(field)))
}

/// Cuts `text` to `max` characters, appending `...` when anything was cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn session(value: serde_json::Value) -> Session {
        Session::from_value("0123456789", &value).unwrap()
    }

    #[test]
    fn long_preview_is_truncated_to_100_chars() {
        let content = "x".repeat(150);
        let s = session(json!({ "messages": [ { "role": "user", "content": content } ] }));
        let summary = summarize(&s);
        assert_eq!(summary.preview, format!("{}...", "x".repeat(100)));
    }

    #[test]
    fn short_preview_is_unchanged() {
        let content = "y".repeat(50);
        let s = session(json!({ "messages": [ { "role": "user", "content": content.clone() } ] }));
        assert_eq!(summarize(&s).preview, content);
    }

    #[test]
    fn preview_uses_first_user_message_and_field_order() {
        let s = session(json!({ "messages": [
            { "role": "assistant", "content": "answer" },
            { "role": "user", "prompt": "from prompt", "body": "from body" }
        ]}));
        assert_eq!(summarize(&s).preview, "from body");
    }

    #[test]
    fn empty_session_summary() {
        let s = session(json!({}));
        let summary = summarize(&s);
        assert_eq!(summary.title, "Chat 01234567");
        assert_eq!(summary.preview, "No messages");
        assert_eq!(summary.timestamp, 0);
        assert_eq!(summary.description, "0 messages • Updated: Unknown • No messages");
    }

    #[test]
    fn summaries_sort_newest_first() {
        let a = Session::from_value("a", &json!({ "createdAt": 10 })).unwrap();
        let b = Session::from_value("b", &json!({ "createdAt": 5, "updatedAt": 30 })).unwrap();
        let c = Session::from_value("c", &json!({})).unwrap();
        let ids: Vec<_> = summarize_all([&a, &b, &c]).into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("abc", 3), "abc");
    }
}
