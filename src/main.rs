use clap::Parser;
use lsp_stdio_client::logging::{LogConfig, init_logging};
use lsp_stdio_client::lsp::ServerCapabilities;
use lsp_stdio_client::lsp::types::{DocumentSymbol, Hover, Position, Uri};
use lsp_stdio_client::server::resolve_server_program;
use lsp_stdio_client::{ReplyHandler, ServerConfig, ServerSession, SessionEvent, SessionState};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Start a language server, report what it can do and optionally query one file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Workspace root handed to the server (defaults to current directory)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Server executable (overrides LSP_SERVER env var)
    #[arg(long, value_name = "PATH")]
    server: Option<String>,

    /// Document to open; its symbols are printed
    #[arg(long, value_name = "FILE")]
    file: Option<PathBuf>,

    /// languageId sent with didOpen
    #[arg(long, default_value = "cpp")]
    language_id: String,

    /// Zero-based line for a hover request on --file
    #[arg(long, requires_all = ["file", "character"])]
    line: Option<u32>,

    /// Zero-based UTF-16 column for a hover request on --file
    #[arg(long, requires_all = ["file", "line"])]
    character: Option<u32>,

    /// Advertise the semantic highlighting capability
    #[arg(long)]
    semantic_highlighting: bool,

    /// How long to wait for the handshake and for each reply
    #[arg(long, value_name = "MS", default_value_t = 10_000)]
    timeout_ms: u64,

    /// Per-stage grace period when stopping the server
    #[arg(long, value_name = "MS", default_value_t = 500)]
    stop_timeout_ms: u64,

    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log file path (overrides LSP_LOG_FILE env var)
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Extra arguments passed to the server, after `--`
    #[arg(last = true)]
    server_args: Vec<String>,
}

#[derive(Serialize)]
struct Report<'a> {
    server: &'a str,
    pid: Option<u32>,
    capabilities: ServerCapabilities,
    #[serde(skip_serializing_if = "Option::is_none")]
    symbols: Option<Vec<DocumentSymbol>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hover: Option<Hover>,
}

fn file_uri(path: &Path) -> Result<Uri, Box<dyn std::error::Error>> {
    let path = std::fs::canonicalize(path)?;
    let url = url::Url::from_file_path(&path)
        .map_err(|_| format!("Cannot build a file URI for {}", path.display()))?;
    Uri::from_str(url.as_str()).map_err(|e| format!("Invalid URI {url}: {e:?}").into())
}

async fn wait_for_running(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let handshake = async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::StateChanged(SessionState::Running) => return Ok(()),
                SessionEvent::StateChanged(SessionState::None) => {
                    return Err("Server exited during initialize".to_string());
                }
                SessionEvent::ApplyEdit { responder, .. } => {
                    responder.respond(Default::default());
                }
                _ => {}
            }
        }
        Err("Event stream closed".to_string())
    };
    tokio::time::timeout(timeout, handshake)
        .await
        .map_err(|_| "Timed out waiting for initialize")??;
    Ok(())
}

/// Await one reply, giving up after `timeout`
async fn reply<T>(receiver: oneshot::Receiver<T>, timeout: Duration, what: &str) -> Option<T> {
    match tokio::time::timeout(timeout, receiver).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) => {
            warn!("{} was abandoned", what);
            None
        }
        Err(_) => {
            warn!("{} timed out", what);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let log_config =
        LogConfig::from_env().with_overrides(args.log_level.clone(), args.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let root = match args.root.clone() {
        Some(root) => root,
        None => std::env::current_dir()?,
    };
    let program = resolve_server_program(args.server.clone());
    info!("Using server: {} (root {})", program, root.display());

    let config = ServerConfig::builder()
        .program(program.clone())
        .args(args.server_args.iter().cloned())
        .root(root)
        .semantic_highlighting(args.semantic_highlighting)
        .build()?;

    let timeout = Duration::from_millis(args.timeout_ms);
    let (mut session, mut events) = ServerSession::new(config);
    session.start()?;
    wait_for_running(&mut events, timeout).await?;

    let mut symbols = None;
    let mut hover = None;
    if let (Some(file), Some(client)) = (&args.file, session.client()) {
        let uri = file_uri(file)?;
        let text = std::fs::read_to_string(file)?;
        client.did_open(&uri, 1, &args.language_id, &text)?;

        let (tx, rx) = oneshot::channel();
        client.document_symbols(
            &uri,
            ReplyHandler::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        symbols = reply(rx, timeout, "documentSymbol").await;

        if let (Some(line), Some(character)) = (args.line, args.character) {
            let (tx, rx) = oneshot::channel();
            client.hover(
                &uri,
                Position::new(line, character),
                ReplyHandler::new(move |result| {
                    let _ = tx.send(result);
                }),
            );
            hover = reply(rx, timeout, "hover").await;
        }

        client.did_close(&uri)?;
    }

    let report = Report {
        server: &program,
        pid: session.pid(),
        capabilities: session.capabilities(),
        symbols,
        hover,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    let stage = Some(Duration::from_millis(args.stop_timeout_ms));
    let outcome = session.stop(stage, stage).await?;
    info!("Server stop outcome: {:?}", outcome);

    Ok(())
}
