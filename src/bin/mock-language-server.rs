//! Scripted language server for exercising the client over real pipes
//!
//! Answers `initialize`, `documentSymbol`, `hover` and `shutdown`, publishes
//! one diagnostic per `didOpen` and asks for a `workspace/applyEdit` on every
//! `didSave`. The client's applyEdit answer is echoed back as a diagnostic on
//! `file:///applied` so tests can observe it.

use clap::Parser;
use lsp_stdio_client::lsp::framing::{FrameReader, encode_frame};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt, Stdout};

#[derive(Parser, Debug)]
#[command(about = "Scripted LSP server used by the integration tests")]
struct Args {
    /// Stay alive after the `exit` notification
    #[arg(long)]
    ignore_exit: bool,

    /// Ignore SIGTERM so only SIGKILL stops the process
    #[arg(long)]
    ignore_term: bool,

    /// Never answer `initialize`
    #[arg(long)]
    silent: bool,
}

struct MockServer {
    args: Args,
    stdout: Stdout,
    next_edit: u64,
}

impl MockServer {
    async fn send(&mut self, message: Value) -> std::io::Result<()> {
        let frame = encode_frame(&message)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        self.stdout.write_all(&frame).await?;
        self.stdout.flush().await
    }

    async fn reply(&mut self, id: &Value, result: Value) -> std::io::Result<()> {
        self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await
    }

    async fn notify(&mut self, method: &str, params: Value) -> std::io::Result<()> {
        self.send(json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
    }

    /// Returns false once the server should exit
    async fn handle(&mut self, message: Value) -> std::io::Result<bool> {
        let method = message["method"].as_str().unwrap_or_default().to_string();
        let id = message.get("id").cloned();
        let params = &message["params"];
        let uri = params["textDocument"]["uri"].clone();

        match (method.as_str(), id) {
            // a response to our applyEdit request
            ("", Some(_)) => {
                let applied = message["result"]["applied"].as_bool().unwrap_or(false);
                let diagnostic = json!({
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
                    "message": format!("applied:{applied}"),
                });
                self.notify(
                    "textDocument/publishDiagnostics",
                    json!({"uri": "file:///applied", "diagnostics": [diagnostic]}),
                )
                .await?;
            }
            ("initialize", Some(id)) => {
                if !self.args.silent {
                    let capabilities = json!({
                        "textDocumentSync": {"openClose": true, "change": 2, "save": {"includeText": false}},
                        "hoverProvider": true,
                        "documentSymbolProvider": {},
                        "definitionProvider": true,
                        "completionProvider": {"triggerCharacters": [".", "->"]},
                        "signatureHelpProvider": {"triggerCharacters": ["("]},
                        "executeCommandProvider": {"commands": ["mock.apply"]},
                    });
                    self.reply(&id, json!({"capabilities": capabilities})).await?;
                }
            }
            ("textDocument/documentSymbol", Some(id)) => {
                let range = json!({"start": {"line": 0, "character": 0}, "end": {"line": 2, "character": 1}});
                let symbols = json!([{
                    "name": "main",
                    "detail": "int ()",
                    "kind": 12,
                    "range": range,
                    "selectionRange": range,
                    "children": [],
                }]);
                self.reply(&id, symbols).await?;
            }
            ("textDocument/hover", Some(id)) => {
                let line = params["position"]["line"].as_u64().unwrap_or(0);
                let contents = json!({"kind": "markdown", "value": format!("hover at line {line}")});
                self.reply(&id, json!({"contents": contents})).await?;
            }
            ("shutdown", Some(id)) => self.reply(&id, Value::Null).await?,
            (_, Some(id)) => self.reply(&id, Value::Null).await?,
            ("textDocument/didOpen", None) => {
                let diagnostic = json!({
                    "range": {"start": {"line": 1, "character": 4}, "end": {"line": 1, "character": 9}},
                    "severity": 1,
                    "code": 1001,
                    "source": "mock",
                    "message": "unused variable",
                });
                self.notify(
                    "textDocument/publishDiagnostics",
                    json!({"uri": uri, "diagnostics": [diagnostic]}),
                )
                .await?;
            }
            ("textDocument/didSave", None) => {
                self.next_edit += 1;
                let edit = json!({
                    "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 0}},
                    "newText": "// saved\n",
                });
                let mut changes = serde_json::Map::new();
                changes.insert(uri.as_str().unwrap_or_default().to_string(), json!([edit]));
                self.send(json!({
                    "jsonrpc": "2.0",
                    "id": format!("edit-{}", self.next_edit),
                    "method": "workspace/applyEdit",
                    "params": {"label": "mock edit", "edit": {"changes": changes}},
                }))
                .await?;
            }
            ("exit", None) => return Ok(self.args.ignore_exit),
            _ => {}
        }
        Ok(true)
    }
}

#[cfg(unix)]
fn ignore_sigterm() {
    // SAFETY: installing SIG_IGN has no handler code to race with
    unsafe {
        libc::signal(libc::SIGTERM, libc::SIG_IGN);
    }
}

#[cfg(not(unix))]
fn ignore_sigterm() {}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::io::Result<()> {
    let args = Args::parse();
    if args.ignore_term {
        ignore_sigterm();
    }

    let mut stdin = tokio::io::stdin();
    let mut server = MockServer {
        args,
        stdout: tokio::io::stdout(),
        next_edit: 0,
    };
    let mut reader = FrameReader::new();
    let mut buffer = vec![0u8; 4096];

    loop {
        let n = stdin.read(&mut buffer).await?;
        if n == 0 {
            if server.args.ignore_exit {
                // keep running until signalled
                std::future::pending::<()>().await;
            }
            return Ok(());
        }
        for message in reader.push(&buffer[..n]) {
            if !server.handle(message).await? {
                return Ok(());
            }
        }
    }
}
