//! Turns arbitrary message content into displayable text.
//!
//! Stored content is not trustworthy: it can be plain text, a response
//! envelope (`{"data": {"summary": ...}}`), an arbitrary object, or a blob of
//! binary garbage. [`sanitize`] maps every input to some string and never
//! fails. Unusable content is replaced by a sentinel marker starting with
//! [`SENTINEL_PREFIX`].

use crate::model::{Content, truthy_member};
use serde_json::Value;

pub const SENTINEL_PREFIX: &str = "*[";
pub const BINARY_SENTINEL: &str = "*[Binary or corrupted content detected - content filtered]*";
pub const ENCODING_SENTINEL: &str = "*[Content filtered due to encoding issues]*";

/// Share of control characters above which content is treated as binary.
const BINARY_RATIO: f64 = 0.2;

/// Outcome of sanitizing one value, tagged by the step that decided it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    Text(String),
    BinaryFiltered,
    EncodingFiltered,
}

impl Sanitized {
    pub fn into_display(self) -> String {
        match self {
            Sanitized::Text(s) => s,
            Sanitized::BinaryFiltered => BINARY_SENTINEL.to_string(),
            Sanitized::EncodingFiltered => ENCODING_SENTINEL.to_string(),
        }
    }
}

pub fn is_sentinel(text: &str) -> bool {
    text.starts_with(SENTINEL_PREFIX)
}

/// Sanitizes `content` into display text.
pub fn sanitize(content: Content<'_>) -> String {
    classify(content).into_display()
}

/// Sanitizes `content`, returning `None` when nothing usable is left (empty
/// text or a sentinel marker).
pub fn usable(content: Content<'_>) -> Option<String> {
    match classify(content) {
        Sanitized::Text(s) if !s.is_empty() => Some(s),
        _ => None,
    }
}

pub fn classify(content: Content<'_>) -> Sanitized {
    let raw = coerce(content);
    if raw.is_empty() {
        return Sanitized::Text(raw);
    }

    let total = raw.chars().count();
    let control = raw.chars().filter(|c| is_control(*c)).count();
    if control as f64 / total as f64 > BINARY_RATIO {
        return Sanitized::BinaryFiltered;
    }

    let cleaned: String = raw
        .chars()
        .filter(|c| !(is_control(*c) && !matches!(c, '\t' | '\n' | '\r')) && *c != '\u{FFFD}')
        .collect();
    let cleaned = cleaned.trim();

    if cleaned.chars().count() < 3 && total > 10 {
        return Sanitized::EncodingFiltered;
    }

    if cleaned.starts_with('{') && cleaned.ends_with('}') {
        return Sanitized::Text(reextract(cleaned));
    }

    Sanitized::Text(cleaned.to_string())
}

fn is_control(c: char) -> bool {
    matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}')
}

fn coerce(content: Content<'_>) -> String {
    match content {
        Content::Empty => String::new(),
        Content::Text(s) => s.to_string(),
        Content::Structured(value) => {
            let nested = value
                .get("data")
                .and_then(|d| truthy_member(d, "summary"))
                .or_else(|| truthy_member(value, "summary"))
                .or_else(|| truthy_member(value, "content"))
                .or_else(|| truthy_member(value, "text"));
            match nested {
                Some(inner) => coerce(Content::from(inner)),
                None => pretty(value),
            }
        }
        Content::Scalar(value) => value.to_string(),
    }
}

fn reextract(text: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<Value>(text) else {
        return text.to_string();
    };
    let summary = parsed
        .get("data")
        .and_then(|d| truthy_member(d, "summary"))
        .or_else(|| truthy_member(&parsed, "summary"));
    match summary {
        Some(Value::String(s)) => s.clone(),
        Some(other) => pretty(other),
        None => format!("```json\n{}\n```", pretty(&parsed)),
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text(s: &str) -> String {
        sanitize(Content::Text(s))
    }

    #[test]
    fn printable_text_is_unchanged() {
        let input = "Explain lifetimes in Rust, please: what does 'a mean? 你好 ✓";
        assert_eq!(text(input), input);
    }

    #[test]
    fn thirty_percent_control_is_binary() {
        let input: String = "\u{0001}".repeat(30) + &"a".repeat(70);
        assert_eq!(classify(Content::Text(&input)), Sanitized::BinaryFiltered);
        assert_eq!(text(&input), BINARY_SENTINEL);
    }

    #[test]
    fn ten_percent_control_is_cleaned_not_filtered() {
        let input: String = "\u{0002}".repeat(10) + &"b".repeat(90);
        assert_eq!(text(&input), "b".repeat(90));
    }

    #[test]
    fn cleanup_keeps_tabs_and_newlines() {
        assert_eq!(
            text("  alpha\u{0000}beta\tgamma\ndelta\u{FFFD}\u{0085}omega  "),
            "alphabeta\tgamma\ndeltaomega"
        );
    }

    #[test]
    fn mostly_stripped_content_is_encoding_filtered() {
        let input = format!("{}{}", "\u{FFFD}".repeat(12), "ab");
        assert_eq!(classify(Content::Text(&input)), Sanitized::EncodingFiltered);
        assert!(is_sentinel(&text(&input)));
    }

    #[test]
    fn objects_prefer_nested_summary_fields() {
        let v = json!({ "data": { "summary": "done" }, "summary": "outer", "content": "c" });
        assert_eq!(sanitize(Content::from(&v)), "done");

        let v = json!({ "content": "body", "text": "t" });
        assert_eq!(sanitize(Content::from(&v)), "body");

        let v = json!({ "other": 1 });
        assert_eq!(
            sanitize(Content::from(&v)),
            "```json\n{\n  \"other\": 1\n}\n```"
        );
    }

    #[test]
    fn json_text_is_reextracted() {
        assert_eq!(text(r#"{"data":{"summary":"ok"}}"#), "ok");
        assert_eq!(text(r#"{"a":1}"#), "```json\n{\n  \"a\": 1\n}\n```");
        assert_eq!(text("{not json}"), "{not json}");
    }

    #[test]
    fn empty_and_scalar_values() {
        assert_eq!(sanitize(Content::Empty), "");
        assert_eq!(sanitize(Content::from(&json!(42))), "42");
        assert_eq!(sanitize(Content::from(&json!(0))), "");
        assert_eq!(usable(Content::Text("\u{0001}\u{0001}")), None);
    }
}
