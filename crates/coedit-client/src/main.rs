//! coedit: Headless collaboration client.
//!
//! Opens one document session against a coedit server: live WebSocket sync,
//! debounced autosave, and AI-assisted writing from the command line. Lines
//! typed on stdin append to the document; slash commands drive the AI panel.

use anyhow::Result;
use clap::Parser;
use coedit_core::editor::InMemoryEditor;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coedit_client::ai::HttpAssistant;
use coedit_client::connection::ws_base_from_http;
use coedit_client::persistence::HttpStore;
use coedit_client::session::{DocumentSession, SessionCommand, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "coedit")]
#[command(about = "Headless collaborative document client")]
struct Args {
    /// HTTP base URL of the server
    #[arg(short, long, default_value = "http://localhost:8000")]
    server: String,

    /// WebSocket base URL (derived from --server if omitted)
    #[arg(long)]
    ws: Option<String>,

    /// Document ID to open
    #[arg(short, long)]
    document: i64,

    /// User ID to act as
    #[arg(short, long)]
    user: i64,

    /// Access token for the collaboration socket
    #[arg(short, long)]
    token: String,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Translate one stdin line into a session command.
fn parse_line(line: &str) -> Option<SessionCommand> {
    let line = line.trim_end();
    if let Some(prompt) = line.strip_prefix("/ask ") {
        return Some(SessionCommand::Prompt {
            text: prompt.to_string(),
            web_search: false,
        });
    }
    if let Some(prompt) = line.strip_prefix("/askweb ") {
        return Some(SessionCommand::Prompt {
            text: prompt.to_string(),
            web_search: true,
        });
    }
    if let Some(title) = line.strip_prefix("/title ") {
        return Some(SessionCommand::EditTitle(title.to_string()));
    }
    match line {
        "/accept" => Some(SessionCommand::AcceptResponse),
        "/discard" => Some(SessionCommand::DiscardResponse),
        "/below" => Some(SessionCommand::InsertBelow),
        "/retry" => Some(SessionCommand::RetryResponse),
        "/quit" => Some(SessionCommand::Shutdown),
        "" => None,
        // Anything else appends as a new paragraph at the end.
        text => Some(SessionCommand::Type {
            position: usize::MAX,
            text: format!("\n{}", text),
        }),
    }
}

fn spawn_stdin_reader(commands: mpsc::UnboundedSender<SessionCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(command) = parse_line(&line) {
                let done = matches!(command, SessionCommand::Shutdown);
                if commands.send(command).is_err() || done {
                    break;
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,coedit_client=debug"
    } else {
        "info,coedit_client=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ws_url = args.ws.unwrap_or_else(|| ws_base_from_http(&args.server));
    info!("Server: {} (ws: {})", args.server, ws_url);
    info!("Opening document {} as user {}", args.document, args.user);

    let config = SessionConfig {
        document_id: args.document,
        user_id: args.user,
        token: args.token,
    };
    let store = HttpStore::new(&args.server);
    let assistant = HttpAssistant::new(&args.server);
    let editor = InMemoryEditor::new();

    let (session, commands) = DocumentSession::new(config, editor, store, assistant, &ws_url);

    spawn_stdin_reader(commands.clone());

    let shutdown_commands = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown signal received");
            let _ = shutdown_commands.send(SessionCommand::Shutdown);
        }
    });

    session.run().await
}
