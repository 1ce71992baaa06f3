//! End-to-end sessions against the scripted `mock-language-server` binary

use lsp_stdio_client::io::StopOutcome;
use lsp_stdio_client::lsp::capabilities::DocumentSyncKind;
use lsp_stdio_client::lsp::types::{
    ApplyWorkspaceEditResponse, Hover, Position, PublishDiagnosticsParams, Uri,
};
use lsp_stdio_client::{
    ReplyHandler, ServerConfig, ServerSession, SessionEvent, SessionState,
};
use std::str::FromStr;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot};

const MOCK_SERVER: &str = env!("CARGO_BIN_EXE_mock-language-server");
const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

fn mock_session(
    root: &TempDir,
    flags: &[&str],
) -> (ServerSession, mpsc::UnboundedReceiver<SessionEvent>) {
    let config = ServerConfig::builder()
        .program(MOCK_SERVER)
        .args(flags.iter().copied())
        .root(root.path())
        .build()
        .unwrap();
    ServerSession::new(config)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a session event")
        .expect("event stream closed")
}

async fn wait_for_state(events: &mut mpsc::UnboundedReceiver<SessionEvent>, wanted: SessionState) {
    loop {
        if let SessionEvent::StateChanged(state) = next_event(events).await {
            if state == wanted {
                return;
            }
        }
    }
}

async fn next_diagnostics(
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> PublishDiagnosticsParams {
    loop {
        if let SessionEvent::Diagnostics(params) = next_event(events).await {
            return params;
        }
    }
}

fn document(root: &TempDir) -> Uri {
    let path = std::fs::canonicalize(root.path()).unwrap().join("main.cpp");
    let url = url::Url::from_file_path(path).unwrap();
    Uri::from_str(url.as_str()).unwrap()
}

#[tokio::test]
async fn test_handshake_and_feature_requests() {
    let root = TempDir::new().unwrap();
    let (mut session, mut events) = mock_session(&root, &[]);

    session.start().unwrap();
    assert_eq!(session.state(), SessionState::Started);
    wait_for_state(&mut events, SessionState::Running).await;

    let caps = session.capabilities();
    assert_eq!(caps.text_document_sync, DocumentSyncKind::Incremental);
    assert!(caps.hover_provider);
    assert!(caps.document_symbol_provider);
    assert!(caps.completion_provider.provider);
    assert_eq!(caps.completion_provider.trigger_characters, vec!['.', '-']);
    assert!(!caps.rename_provider);

    let client = session.client().unwrap().clone();
    let uri = document(&root);

    let (tx, rx) = oneshot::channel();
    let handle = client.document_symbols(
        &uri,
        ReplyHandler::new(move |symbols| {
            let _ = tx.send(symbols);
        }),
    );
    assert!(handle.is_valid());
    let symbols = tokio::time::timeout(EVENT_TIMEOUT, rx).await.unwrap().unwrap();
    assert_eq!(symbols.len(), 1);
    assert_eq!(symbols[0].name, "main");
    assert_eq!(symbols[0].detail, "int ()");

    let (tx, rx) = oneshot::channel::<Hover>();
    client.hover(
        &uri,
        Position::new(7, 2),
        ReplyHandler::new(move |hover| {
            let _ = tx.send(hover);
        }),
    );
    let hover = tokio::time::timeout(EVENT_TIMEOUT, rx).await.unwrap().unwrap();
    assert_eq!(hover.contents.len(), 1);
    assert_eq!(hover.contents[0].value, "hover at line 7");
    assert_eq!(client.pending_requests(), 0);

    let outcome = session
        .stop(Some(Duration::from_secs(5)), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(outcome, StopOutcome::Exited);
    wait_for_state(&mut events, SessionState::None).await;
}

#[tokio::test]
async fn test_diagnostics_and_apply_edit_round_trip() {
    let root = TempDir::new().unwrap();
    let (mut session, mut events) = mock_session(&root, &[]);
    session.start().unwrap();
    wait_for_state(&mut events, SessionState::Running).await;

    let client = session.client().unwrap().clone();
    let uri = document(&root);

    client
        .did_open(&uri, 1, "cpp", "int main() {\n    int unused;\n}\n")
        .unwrap();
    let published = next_diagnostics(&mut events).await;
    assert_eq!(published.uri, uri);
    assert_eq!(published.diagnostics.len(), 1);
    let diagnostic = &published.diagnostics[0];
    assert_eq!(diagnostic.message, "unused variable");
    assert_eq!(diagnostic.code.as_deref(), Some("1001"));
    assert_eq!(diagnostic.range.start, Position::new(1, 4));

    client.did_save(&uri, None).unwrap();
    let (params, responder) = loop {
        if let SessionEvent::ApplyEdit { params, responder } = next_event(&mut events).await {
            break (params, responder);
        }
    };
    assert_eq!(params.label.as_deref(), Some("mock edit"));
    assert_eq!(params.edit.changes[&uri][0].new_text, "// saved\n");
    assert!(responder.respond(ApplyWorkspaceEditResponse {
        applied: true,
        failure_reason: None,
    }));

    let echoed = next_diagnostics(&mut events).await;
    assert_eq!(echoed.uri.as_str(), "file:///applied");
    assert_eq!(echoed.diagnostics[0].message, "applied:true");

    session
        .stop(Some(Duration::from_secs(5)), Some(Duration::from_secs(5)))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_stop_escalates_to_terminate() {
    let root = TempDir::new().unwrap();
    let (mut session, mut events) = mock_session(&root, &["--ignore-exit"]);
    session.start().unwrap();
    wait_for_state(&mut events, SessionState::Running).await;

    let outcome = session
        .stop(Some(Duration::from_millis(200)), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(outcome, StopOutcome::Terminated);
    assert_eq!(session.state(), SessionState::None);
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_escalates_to_kill() {
    let root = TempDir::new().unwrap();
    let (mut session, mut events) = mock_session(&root, &["--ignore-exit", "--ignore-term"]);
    session.start().unwrap();
    wait_for_state(&mut events, SessionState::Running).await;

    let outcome = session
        .stop(Some(Duration::from_millis(100)), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    assert_eq!(outcome, StopOutcome::Killed);
}

#[tokio::test]
async fn test_requests_are_gated_until_initialized() {
    let root = TempDir::new().unwrap();
    let (mut session, _events) = mock_session(&root, &["--silent"]);
    session.start().unwrap();

    let client = session.client().unwrap().clone();
    let handle = client.document_symbols(&document(&root), ReplyHandler::new(|_| {}));
    assert!(!handle.is_valid());
    assert!(client.did_close(&document(&root)).is_err());
    assert_eq!(session.state(), SessionState::Started);

    // never Running, so stop goes straight to signals
    let outcome = session
        .stop(Some(Duration::from_millis(100)), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(outcome, StopOutcome::Terminated);
}
