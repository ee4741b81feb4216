use clap::{Parser, Subcommand};
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use trae_chat_export::model::Session;
use trae_chat_export::utils::ExportConfig;
use trae_chat_export::workspace::{self, DiagnosticBudget, Workspace};
use trae_chat_export::{export, render, summary};
use tracing_subscriber::EnvFilter;

/// Extract Trae AI chat history from workspace storage as Markdown.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Workspace storage directory to scan.
    /// Defaults to the platform's Trae/User/workspaceStorage.
    #[arg(long, value_name = "PATH", env = "WORKSPACE_PATH", global = true)]
    root: Option<PathBuf>,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/trae-chat-export/config.toml
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Log what is located and skipped.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress progress output and warnings.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List workspaces that contain chats, most recently modified first.
    Workspaces,

    /// List the chats of one workspace, newest first.
    Chats {
        /// Workspace id or folder name.
        workspace: String,
    },

    /// Render one chat as Markdown.
    Show {
        /// Workspace id or folder name.
        workspace: String,
        /// Chat id or a unique id prefix.
        chat: String,
        /// Write to this file instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Export every chat to Markdown files with YAML frontmatter.
    Export {
        /// Directory to export markdown files.
        /// Defaults to ./trae-chat-export if not set in config.
        #[arg(value_name = "TARGET_DIR")]
        target_dir: Option<PathBuf>,

        /// Only export this workspace (id or folder name).
        #[arg(long, value_name = "WORKSPACE")]
        workspace: Option<String>,

        /// Comma-separated tags to add to frontmatter (e.g. "trae,llm").
        #[arg(long, value_name = "TAGS", value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Overwrite existing files even if they are up to date.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Deserialize, Default)]
struct FileConfig {
    workspace_root: Option<PathBuf>,
    target_dir: Option<PathBuf>,
    tags: Option<Vec<String>>,
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        dirs::config_dir()
            .map(|d| d.join("trae-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "trae_chat_export=debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_workspaces(root: &Path) -> Result<Vec<Workspace>> {
    let mut budget = DiagnosticBudget::default();
    Ok(workspace::with_chats(workspace::discover(root, &mut budget)?))
}

fn find_session(sessions: Vec<Session>, needle: &str) -> Result<Session> {
    let mut matches: Vec<Session> = sessions
        .into_iter()
        .filter(|s| s.id.starts_with(needle))
        .collect();
    if let Some(pos) = matches.iter().position(|s| s.id == needle) {
        return Ok(matches.swap_remove(pos));
    }
    match matches.len() {
        0 => Err(eyre!("No chat matches {needle:?}")),
        1 => Ok(matches.remove(0)),
        n => Err(eyre!("{n} chats match {needle:?}; use a longer id prefix")),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve the scan root (CLI/env > Config > Platform default)
    let root = cli
        .root
        .or(file_cfg.workspace_root)
        .or_else(workspace::default_root)
        .ok_or_else(|| {
            eyre!("Could not determine workspace storage path.\nUse --root or WORKSPACE_PATH to specify it.")
        })?;

    if !root.exists() {
        return Err(eyre!(
            "Workspace storage not found at: {}\nUse --root or WORKSPACE_PATH to specify the path manually.",
            root.display()
        ));
    }

    match cli.command {
        Command::Workspaces => {
            let workspaces = load_workspaces(&root)?;
            if workspaces.is_empty() {
                println!("No workspaces found with chat history.");
            }
            for ws in &workspaces {
                println!(
                    "{}\n    {} chats - Last modified: {}",
                    ws.label(),
                    ws.chat_count,
                    ws.last_modified.format("%Y-%m-%d")
                );
            }
        }

        Command::Chats { workspace: needle } => {
            let workspaces = load_workspaces(&root)?;
            let ws = workspace::find(&workspaces, &needle)?;
            let sessions = ws.sessions()?;
            if sessions.is_empty() {
                println!("No chat sessions found for this workspace.");
            }
            for item in summary::summarize_all(sessions.sessions()) {
                let short: String = item.id.chars().take(8).collect();
                println!("{short}  {}\n    {}", item.title, item.description);
            }
        }

        Command::Show {
            workspace: needle,
            chat,
            output,
        } => {
            let workspaces = load_workspaces(&root)?;
            let ws = workspace::find(&workspaces, &needle)?;
            let session = find_session(ws.sessions()?.into_sessions(), &chat)?;
            let document =
                render::render(&session, &ws.label()).wrap_err("Failed to render chat")?;
            match output {
                Some(path) => fs::write(&path, document)
                    .wrap_err_with(|| format!("Failed to write: {}", path.display()))?,
                None => print!("{document}"),
            }
        }

        Command::Export {
            target_dir,
            workspace,
            tags,
            force,
        } => {
            // Resolve target_dir (CLI > Config > Default)
            let target_dir = target_dir
                .or(file_cfg.target_dir)
                .unwrap_or_else(|| PathBuf::from("trae-chat-export"));

            let config = ExportConfig {
                target_dir,
                workspace_root: root,
                workspace,
                tags: tags.or(file_cfg.tags),
                force,
                quiet: cli.quiet,
            };
            let stats = export::execute(&config)?;
            if stats.created + stats.updated + stats.skipped == 0 && !cli.quiet {
                eprintln!("No chats found to export under {}", config.workspace_root.display());
            }
        }
    }

    Ok(())
}
