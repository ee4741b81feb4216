//! # trae-chat-export
//!
//! A CLI tool that extracts AI chat conversations from Trae workspace storage
//! and renders them as Markdown.
//!
//! ## What it does
//!
//! Every workspace the editor has opened gets a `state.vscdb` SQLite file with
//! a key-value `ItemTable`. Chat history lives in one of its rows, but which
//! key and which JSON shape depends on the editor release that wrote it. This
//! crate:
//!
//! 1. locates the row most likely to hold chats ([`locator`]),
//! 2. normalizes whichever schema it finds into canonical sessions ([`schema`]),
//! 3. cleans up binary or malformed message content ([`sanitize`]),
//! 4. summarizes sessions for listings ([`summary`]) and renders a full
//!    transcript grouped by conversational turn ([`render`]).
//!
//! Stores are opened **read-only**; your data is never modified.
//!
//! ## Usage
//!
//! ```sh
//! # Workspaces that contain chats, newest first
//! trae-chat-export workspaces
//!
//! # Chats of one workspace, then one transcript
//! trae-chat-export chats my-project
//! trae-chat-export show my-project 1a2b3c4d -o chat.md
//!
//! # Everything, as Markdown files with YAML frontmatter
//! trae-chat-export export ~/notes/trae-chats --tags trae,ai-chat
//! ```
//!
//! The scan root defaults to the platform's `Trae/User/workspaceStorage` and
//! can be overridden with `--root`, `WORKSPACE_PATH`, or `workspace_root` in
//! `~/.config/trae-chat-export/config.toml`.

pub mod export;
pub mod locator;
pub mod model;
pub mod render;
pub mod sanitize;
pub mod schema;
pub mod store;
pub mod summary;
pub mod utils;
pub mod workspace;
