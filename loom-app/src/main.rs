//! `loom`: command-line front end for the Loom workspace.
//!
//! Usage:
//!   loom projects add "Website redesign" --description "Q3 refresh"
//!   loom chats send "What should the homepage say?"
//!   loom export > backup.json

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use loom_app::{AppConfig, LoomApp};
use loom_features::{ArtifactDraft, ProjectDraft};
use loom_types::{ArtifactType, ChatId, Role, format_time_ago, truncate_chars};
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "loom")]
#[command(about = "Projects, chats and artifacts in a local workspace")]
struct Args {
    /// Path to loom.toml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding storage.json (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List loaded plugins
    Plugins,
    /// Manage projects
    Projects {
        #[command(subcommand)]
        action: ProjectsAction,
    },
    /// Manage chats
    Chats {
        #[command(subcommand)]
        action: ChatsAction,
    },
    /// Manage artifacts
    Artifacts {
        #[command(subcommand)]
        action: ArtifactsAction,
    },
    /// Print every stored bucket as JSON
    Export,
    /// Load buckets from a file written by `export`
    Import {
        file: PathBuf,
        /// Replace buckets that already exist
        #[arg(long)]
        overwrite: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ProjectsAction {
    List,
    Add {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long)]
        knowledge_base: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ChatsAction {
    List {
        /// Only chats whose title or last message contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },
    New,
    /// Send a message and print the reply
    Send {
        /// Chat to send to; defaults to the most recent one
        #[arg(long)]
        chat: Option<String>,
        message: String,
    },
}

#[derive(Subcommand, Debug)]
enum ArtifactsAction {
    List,
    Add {
        title: String,
        /// html, css, javascript, markdown or text
        #[arg(short = 't', long = "type", default_value = "text")]
        kind: String,
        #[arg(long, conflicts_with = "file")]
        content: Option<String>,
        /// Read the content from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    if let Some(dir) = args.data_dir {
        config.storage.data_dir = Some(dir);
    }
    debug!(?config, "Configuration resolved");

    let app = LoomApp::new(config).context("failed to open storage")?;
    app.init();
    let outcome = run(&app, args.command).await;
    app.shutdown();
    outcome
}

async fn run(app: &LoomApp, command: Command) -> Result<()> {
    match command {
        Command::Plugins => {
            for plugin in app.plugins().get_plugins() {
                let state = if plugin.enabled { "enabled" } else { "disabled" };
                println!(
                    "{:<12} {:<8} {:<9} {}",
                    plugin.name, plugin.metadata.version, state, plugin.metadata.description
                );
            }
        }
        Command::Projects { action } => projects(app, action)?,
        Command::Chats { action } => chats(app, action).await?,
        Command::Artifacts { action } => artifacts(app, action)?,
        Command::Export => println!("{}", serde_json::to_string_pretty(&app.export())?),
        Command::Import { file, overwrite } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let document = serde_json::from_str(&contents).context("import file is not valid JSON")?;
            if !app.storage().import(&document, overwrite) {
                bail!("import incomplete, see log for details");
            }
            info!(file = %file.display(), "Imported storage");
        }
    }
    Ok(())
}

fn projects(app: &LoomApp, action: ProjectsAction) -> Result<()> {
    match action {
        ProjectsAction::List => {
            for project in app.projects()? {
                println!(
                    "{}  {:<30} {:<8} {}",
                    project.id,
                    project.title,
                    project.status.label(),
                    project.last_active
                );
            }
        }
        ProjectsAction::Add {
            title,
            description,
            knowledge_base,
        } => {
            let project = app.create_project(&ProjectDraft {
                description,
                knowledge_base,
                ..ProjectDraft::titled(title)
            })?;
            println!("{}", project.id);
        }
    }
    Ok(())
}

async fn chats(app: &LoomApp, action: ChatsAction) -> Result<()> {
    match action {
        ChatsAction::List { filter } => {
            let now = Utc::now();
            for chat in app.chats(filter.as_deref())? {
                println!(
                    "{}  {:<30} {:<14} {}",
                    chat.id,
                    chat.title,
                    format_time_ago(chat.timestamp, now),
                    truncate_chars(&chat.last_message, 40)
                );
            }
        }
        ChatsAction::New => {
            let chat = app.create_chat()?;
            println!("{}", chat.id);
        }
        ChatsAction::Send { chat, message } => {
            let id = match chat {
                Some(id) => ChatId::parse(&id)?,
                None => match app.chats(None)?.first() {
                    Some(chat) => chat.id,
                    None => app.create_chat()?.id,
                },
            };
            app.open_chat(id)?;
            match app.send_message(&message).await? {
                Some(reply) if reply.role == Role::Assistant => println!("{}", reply.content),
                Some(_) => {}
                None => bail!("message was empty or chat {id} no longer exists"),
            }
        }
    }
    Ok(())
}

fn artifacts(app: &LoomApp, action: ArtifactsAction) -> Result<()> {
    match action {
        ArtifactsAction::List => {
            for artifact in app.artifacts()? {
                println!(
                    "{}  {:<30} {:<10} {}",
                    artifact.id,
                    artifact.title,
                    artifact.artifact_type.file_extension(),
                    artifact.size
                );
            }
        }
        ArtifactsAction::Add {
            title,
            kind,
            content,
            file,
        } => {
            let artifact_type: ArtifactType = serde_json::from_value(json!(kind.to_lowercase()))?;
            let content = match file {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?,
                ),
                None => content,
            };
            let artifact = app.create_artifact(&ArtifactDraft {
                title: Some(title),
                artifact_type: Some(artifact_type),
                content,
                preview: None,
            })?;
            println!("{}  {}", artifact.id, artifact.size);
        }
    }
    Ok(())
}
