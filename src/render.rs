//! Renders a canonical session as a Markdown document.
//!
//! Layout, in order: title, session metadata table, overview, table of
//! contents, one section per turn, footer. Messages are grouped into turns by
//! `turn_id` and reordered here only; the session itself is never mutated.

use crate::model::{
    ASSISTANT_CONTENT_FIELDS, AgentTask, Content, Message, Role, Session, ToolStep,
    USER_CONTENT_FIELDS,
};
use crate::sanitize::{sanitize, usable};
use crate::summary::truncate;
use crate::utils::format_millis;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::fmt::{self, Write};

/// Turn id given to messages that carry none.
pub const UNKNOWN_TURN: &str = "unknown";

const TOC_PREVIEW_CHARS: usize = 50;
const LONG_PARAM_CHARS: usize = 100;
const COLLAPSE_RESULT_CHARS: usize = 500;
const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FINISH_TOOL: &str = "finish";

/// Tools that act on a single file, with their display label.
const FILE_OPERATIONS: [(&str, &str); 6] = [
    ("update_file", "Edit file"),
    ("write_to_file", "Create file"),
    ("edit_file_fast_apply", "Edit file"),
    ("view_files", "View file"),
    ("delete_file", "Delete file"),
    ("rename_file", "Rename file"),
];

// ---------------------------------------------------------------------------
// Turn grouping
// ---------------------------------------------------------------------------

/// Messages sharing one turn id, already in display order.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn<'a> {
    pub id: &'a str,
    pub messages: Vec<&'a Message>,
}

impl<'a> Turn<'a> {
    pub fn first_user(&self) -> Option<&'a Message> {
        self.messages.iter().copied().find(|m| m.role == Role::User)
    }
}

/// Groups `messages` into ordered turns.
///
/// Turns are ordered by the `turn_index` of their first message when every
/// turn has one, otherwise by that message's timestamp. Inside a turn, user
/// messages come first, then by timestamp, then by original position.
pub fn group_turns(messages: &[Message]) -> Vec<Turn<'_>> {
    let mut turns: Vec<Turn<'_>> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for message in messages {
        let id = message.turn_id.as_deref().unwrap_or(UNKNOWN_TURN);
        let slot = *index.entry(id).or_insert_with(|| {
            turns.push(Turn {
                id,
                messages: Vec::new(),
            });
            turns.len() - 1
        });
        turns[slot].messages.push(message);
    }

    let all_indexed = turns.iter().all(|t| t.messages[0].turn_index.is_some());
    if all_indexed {
        turns.sort_by_key(|t| t.messages[0].turn_index);
    } else {
        turns.sort_by_key(|t| t.messages[0].timestamp.unwrap_or(0));
    }

    for turn in &mut turns {
        turn.messages
            .sort_by_key(|m| (m.role != Role::User, m.timestamp.unwrap_or(0)));
    }

    turns
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Renders `session` as a complete Markdown document.
pub fn render(session: &Session, workspace_label: &str) -> Result<String, fmt::Error> {
    render_at(session, workspace_label, Local::now())
}

/// Same as [`render`] with a fixed generation time.
pub fn render_at(
    session: &Session,
    workspace_label: &str,
    generated_at: DateTime<Local>,
) -> Result<String, fmt::Error> {
    let mut doc = String::new();
    write_document(&mut doc, session, workspace_label, generated_at)?;
    Ok(doc)
}

fn write_document(
    out: &mut String,
    session: &Session,
    workspace: &str,
    generated_at: DateTime<Local>,
) -> fmt::Result {
    writeln!(out, "# {} - {}\n", workspace, session.display_title())?;
    write_metadata(out, session, workspace)?;

    if session.messages.is_empty() {
        writeln!(out, "## 💬 Conversation\n")?;
        writeln!(out, "> ⚠️ No messages recorded in this session.\n")?;
        return write_footer(out, generated_at);
    }

    let turns = group_turns(&session.messages);

    writeln!(out, "## 📊 Overview\n")?;
    writeln!(out, "- **Turns:** {}", turns.len())?;
    writeln!(out, "- **Messages:** {}", session.messages.len())?;
    writeln!(out, "- **Participants:** User & AI assistant\n")?;
    writeln!(out, "---\n")?;

    writeln!(out, "## 📑 Contents\n")?;
    for (i, turn) in turns.iter().enumerate() {
        let preview = turn
            .first_user()
            .and_then(|m| first_usable(m, &USER_CONTENT_FIELDS))
            .map(|text| truncate(&single_line(&text), TOC_PREVIEW_CHARS))
            .unwrap_or_else(|| "Untitled".to_string());
        writeln!(out, "- [Turn {n}](#turn-{n}): {preview}", n = i + 1)?;
    }
    writeln!(out, "\n---\n")?;

    writeln!(out, "## 💬 Conversation\n")?;
    for (i, turn) in turns.iter().enumerate() {
        writeln!(out, "### Turn {}\n", i + 1)?;
        for message in &turn.messages {
            match message.role {
                Role::User => write_user(out, message)?,
                Role::Assistant => write_assistant(out, message)?,
                Role::Other(_) => {}
            }
        }
        writeln!(out, "---\n")?;
    }

    write_footer(out, generated_at)
}

fn write_metadata(out: &mut String, session: &Session, workspace: &str) -> fmt::Result {
    let date = |ts: Option<i64>| {
        ts.map(|t| format_millis(t, DATE_FORMAT))
            .unwrap_or_else(|| "Unknown".to_string())
    };

    writeln!(out, "## 📋 Session Info\n")?;
    writeln!(out, "| Property | Value |")?;
    writeln!(out, "|------|----|")?;
    writeln!(out, "| **Workspace** | {} |", table_cell(workspace))?;
    writeln!(out, "| **Session ID** | {} |", table_cell(&session.id))?;
    writeln!(
        out,
        "| **Type** | {} |",
        table_cell(session.kind.as_deref().unwrap_or("Unknown"))
    )?;
    writeln!(out, "| **Created** | {} |", date(session.created_at))?;
    writeln!(out, "| **Updated** | {} |\n", date(session.updated_at))?;
    writeln!(out, "---\n")
}

fn write_footer(out: &mut String, generated_at: DateTime<Local>) -> fmt::Result {
    writeln!(out, "## 📝 Document Info\n")?;
    writeln!(out, "- **Generated at:** {}", generated_at.format(DATE_FORMAT))?;
    writeln!(
        out,
        "- **Generated by:** {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    )?;
    writeln!(out, "- **Format:** Markdown")
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

fn first_usable(message: &Message, fields: &[&str]) -> Option<String> {
    fields.iter().find_map(|f| usable(message.field(f)))
}

fn write_user(out: &mut String, message: &Message) -> fmt::Result {
    writeln!(out, "#### 👤 User\n")?;
    match first_usable(message, &USER_CONTENT_FIELDS) {
        Some(text) => writeln!(out, "{text}\n")?,
        None => writeln!(out, "> ⚠️ *User message is empty or could not be parsed*\n")?,
    }
    if !message.parsed_query.is_empty() {
        writeln!(out, "**Parsed query:** {}\n", message.parsed_query.join(", "))?;
    }
    Ok(())
}

fn write_assistant(out: &mut String, message: &Message) -> fmt::Result {
    let task = message.agent_task();

    let mut body = match task {
        AgentTask::Plan(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                tool_step(&ToolStep::from_value(item), i + 1).map(|s| s.trim_end().to_string())
            })
            .collect::<Result<Vec<_>, _>>()?
            .join("\n\n---\n\n"),
        _ => String::new(),
    };
    if body.trim().is_empty() {
        body = first_usable(message, &ASSISTANT_CONTENT_FIELDS).unwrap_or_default();
    }

    writeln!(
        out,
        "#### 🤖 {} Response\n",
        message.agent_name.as_deref().unwrap_or("AI")
    )?;

    if !body.trim().is_empty() {
        return writeln!(out, "{}\n", body.trim());
    }

    writeln!(
        out,
        "> ⚠️ *AI response could not be parsed - check the agentTaskContent structure*\n"
    )?;
    match task {
        AgentTask::Absent => writeln!(out, "> *No agentTaskContent found in message*\n"),
        _ => writeln!(
            out,
            "> *agentTaskContent present, but it has no planItems or an invalid structure*\n"
        ),
    }
}

// ---------------------------------------------------------------------------
// Tool steps
// ---------------------------------------------------------------------------

fn operation_label(tool_name: &str) -> Option<&'static str> {
    FILE_OPERATIONS
        .iter()
        .find(|(name, _)| *name == tool_name)
        .map(|(_, label)| *label)
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn tool_step(step: &ToolStep<'_>, number: usize) -> Result<String, fmt::Error> {
    let mut out = String::new();
    write_tool_step(&mut out, step, number)?;
    Ok(out)
}

fn write_tool_step(out: &mut String, step: &ToolStep<'_>, number: usize) -> fmt::Result {
    writeln!(out, "**🔄 Step {number}**\n")?;

    if let Some(thought) = usable(step.thought) {
        writeln!(out, "💭 **Thinking:**\n\n{thought}\n")?;
    }

    if let Some(tool) = step.tool_name {
        match (operation_label(tool), step.params) {
            (Some(label), Some(_)) => write_file_operation(out, step, label)?,
            _ => write_generic_tool(out, step, tool)?,
        }
    }

    if step.tool_name == Some(FINISH_TOOL)
        && let Some(summary) = usable(step.param("summary"))
    {
        writeln!(out, "✅ **Final answer:**\n\n{summary}\n")?;
    }

    Ok(())
}

fn write_file_operation(out: &mut String, step: &ToolStep<'_>, label: &str) -> fmt::Result {
    let file = match step.param("file_path") {
        Content::Text(path) if !basename(path).is_empty() => basename(path).to_string(),
        _ => "unknown file".to_string(),
    };
    writeln!(out, "<details><summary>{label}: {file}</summary>\n")?;

    if let Some(params) = step.params {
        writeln!(out, "**Parameters:**\n")?;
        for (key, value) in params.iter().filter(|(k, _)| *k != "file_path") {
            let value = sanitize(Content::from(value));
            if value.chars().count() > LONG_PARAM_CHARS {
                writeln!(out, "- **{key}:**\n```\n{value}\n```")?;
            } else {
                writeln!(out, "- **{key}:** {value}")?;
            }
        }
        writeln!(out)?;
    }

    if let Some(result) = usable(step.result) {
        writeln!(out, "**Result:**\n")?;
        if looks_like_diff(&result) {
            writeln!(out, "```diff\n{result}\n```\n")?;
        } else {
            writeln!(out, "{result}\n")?;
        }
    }

    writeln!(out, "</details>\n")
}

fn write_generic_tool(out: &mut String, step: &ToolStep<'_>, tool: &str) -> fmt::Result {
    writeln!(out, "🔧 **Tool used:** `{tool}`\n")?;

    if let Some(params) = step.params {
        writeln!(out, "**Parameters:**\n")?;
        for (key, value) in params {
            writeln!(out, "- **{key}:** {}", sanitize(Content::from(value)))?;
        }
        writeln!(out)?;
    }

    if let Some(result) = usable(step.result) {
        writeln!(out, "📋 **Result:**\n")?;
        if result.chars().count() > COLLAPSE_RESULT_CHARS {
            writeln!(
                out,
                "<details>\n<summary>Show full result</summary>\n\n{result}\n\n</details>\n"
            )?;
        } else {
            writeln!(out, "{result}\n")?;
        }
    }
    Ok(())
}

fn looks_like_diff(text: &str) -> bool {
    text.contains("@@") || text.contains("+++") || text.contains("---")
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn table_cell(text: &str) -> String {
    single_line(text).replace('|', "\\|")
}
