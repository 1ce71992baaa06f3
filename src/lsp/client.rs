//! LSP client state machine
//!
//! [`LspClient`] speaks the protocol over a [`StdioTransport`]: it runs the
//! `initialize` handshake, gates every outbound message on the session state,
//! correlates replies and exposes one typed call per supported feature.
//!
//! A single read task pushes stdout chunks through a [`FrameReader`] and
//! dispatches frames strictly in arrival order. Writes are queued to the
//! transport and never block.

use lsp_types::notification::{self as notif, Notification as _};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::{Level, debug, info, trace, warn};

use crate::io::transport::{StdioTransport, TransportReceiver, TransportSender};
use crate::log_lsp_message;
use crate::lsp::capabilities::ServerCapabilities;
use crate::lsp::codec::DecodeReply;
use crate::lsp::correlator::{
    CancelRequest, PendingReply, ReplyHandler, RequestCorrelator, RequestHandle, RequestKind,
};
use crate::lsp::dispatcher::{self, InboundWindow, SessionEvent};
use crate::lsp::error::LspError;
use crate::lsp::framing::{FrameReader, encode_frame};
use crate::lsp::jsonrpc_utils::{notification, request};
use crate::lsp::params;
use crate::lsp::protocol::RequestId;
use crate::lsp::types::{
    CodeActionOrCommand, CompletionItem, Diagnostic, DocumentHighlight, DocumentSymbol,
    FormattingOptions, Hover, Location, Position, Range, SessionState, SignatureHelp,
    TextDocumentContentChange, TextEdit, Uri, WorkspaceEdit,
};

/// What the client tells the server about its workspace in `initialize`
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub root_path: PathBuf,
    pub root_uri: Uri,
    /// Sent verbatim as `initializationOptions`
    pub initialization_options: Value,
    pub semantic_highlighting: bool,
}

// ============================================================================
// Shared Session State
// ============================================================================

/// Mutable session state, guarded by [`ClientShared::core`]
pub(crate) struct ClientCore {
    pub state: SessionState,
    pub capabilities: ServerCapabilities,
    pub correlator: RequestCorrelator,
    pub inbound: InboundWindow,
    /// `None` once the connection is gone
    outbound: Option<TransportSender>,
}

impl ClientCore {
    /// Frame and queue one message, regardless of session state
    pub fn write<M: Serialize>(&mut self, message: &M) -> Result<(), LspError> {
        let sender = self.outbound.as_ref().ok_or(LspError::TransportClosed)?;
        let value = serde_json::to_value(message)?;
        let frame = encode_frame(&value)?;

        log_lsp_message!(
            Level::TRACE,
            "outgoing",
            value.get("method").and_then(serde_json::Value::as_str).unwrap_or("<response>"),
            &value
        );
        sender
            .send(frame.freeze())
            .map_err(|_| LspError::TransportClosed)
    }
}

pub(crate) struct ClientShared {
    core: Mutex<ClientCore>,
    events: mpsc::UnboundedSender<SessionEvent>,
    options: ClientOptions,
}

impl ClientShared {
    pub fn lock(&self) -> MutexGuard<'_, ClientCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("No event subscriber, dropping session event");
        }
    }

    fn set_state(&self, core: &mut ClientCore, state: SessionState) {
        if core.state != state {
            debug!("Session state {} -> {}", core.state, state);
            core.state = state;
            self.emit(SessionEvent::StateChanged(state));
        }
    }

    fn on_initialize_reply(&self, result: &Value) {
        let mut core = self.lock();
        if core.state != SessionState::Started {
            debug!("Ignoring initialize reply in state {}", core.state);
            return;
        }

        core.capabilities = ServerCapabilities::from_json(&result["capabilities"]);
        let initialized = notification(notif::Initialized::METHOD, params::initialized_params());
        if let Err(e) = core.write(&initialized) {
            warn!("Failed to send initialized: {}", e);
        }
        info!("Server initialized");
        self.set_state(&mut core, SessionState::Running);
    }
}

impl CancelRequest for ClientShared {
    fn cancel_request(&self, id: u64) {
        let mut core = self.lock();
        if !core.correlator.cancel(id) {
            return;
        }
        debug!("Cancelling request {}", id);
        let cancel = notification(notif::Cancel::METHOD, params::cancel_params(id));
        if let Err(e) = core.write(&cancel) {
            debug!("Failed to send cancellation for {}: {}", id, e);
        }
    }
}

/// Read task: bytes in, frames dispatched in order
async fn read_loop(client: Weak<ClientShared>, mut receiver: TransportReceiver) {
    let mut reader = FrameReader::new();

    while let Some(chunk) = receiver.receive().await {
        let frames = reader.push(&chunk);
        if frames.is_empty() {
            continue;
        }
        let Some(client) = client.upgrade() else {
            break;
        };
        for frame in frames {
            dispatcher::dispatch(&client, frame);
        }
    }

    debug!("LSP read loop finished");
}

// ============================================================================
// LSP Client
// ============================================================================

/// Cheap to clone; all clones drive the same session
#[derive(Clone)]
pub struct LspClient {
    shared: Arc<ClientShared>,
}

impl LspClient {
    /// Wrap a connected transport; must be called within a tokio runtime
    pub fn new(
        transport: StdioTransport,
        options: ClientOptions,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (sender, receiver) = transport.into_parts();
        let shared = Arc::new(ClientShared {
            core: Mutex::new(ClientCore {
                state: SessionState::None,
                capabilities: ServerCapabilities::default(),
                correlator: RequestCorrelator::default(),
                inbound: InboundWindow::default(),
                outbound: Some(sender),
            }),
            events,
            options,
        });

        tokio::spawn(read_loop(Arc::downgrade(&shared), receiver));
        Self { shared }
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    /// Capabilities from the last `initialize` reply
    pub fn capabilities(&self) -> ServerCapabilities {
        self.shared.lock().capabilities.clone()
    }

    pub fn pending_requests(&self) -> usize {
        self.shared.lock().correlator.pending_count()
    }

    fn owner(&self) -> Weak<dyn CancelRequest> {
        let weak: Weak<ClientShared> = Arc::downgrade(&self.shared);
        weak
    }

    fn write_request(
        &self,
        core: &mut ClientCore,
        kind: RequestKind,
        params: Value,
        reply: PendingReply,
    ) -> RequestHandle {
        let id = core.correlator.allocate();
        match core.write(&request(RequestId::from(id), kind.method(), params)) {
            Ok(()) => {
                core.correlator.register(id, reply);
                RequestHandle::new(id, self.owner())
            }
            Err(e) => {
                warn!("Failed to send {}: {}", kind.method(), e);
                RequestHandle::empty()
            }
        }
    }

    /// Send `initialize`; the only request allowed before Running
    ///
    /// A no-op returning an empty handle unless the state is None.
    pub fn initialize(&self) -> RequestHandle {
        let mut core = self.shared.lock();
        if core.state != SessionState::None {
            debug!("initialize in state {}, ignoring", core.state);
            return RequestHandle::empty();
        }
        self.shared.set_state(&mut core, SessionState::Started);

        let options = &self.shared.options;
        let init_params = params::initialize_params(
            std::process::id(),
            &options.root_path,
            &options.root_uri,
            options.semantic_highlighting,
            options.initialization_options.clone(),
        );

        let client = Arc::downgrade(&self.shared);
        let reply = PendingReply {
            kind: RequestKind::Initialize,
            deliver: Box::new(move |result| {
                if let Some(client) = client.upgrade() {
                    client.on_initialize_reply(&result);
                }
            }),
        };
        self.write_request(&mut core, RequestKind::Initialize, init_params, reply)
    }

    /// Send a request; refused with an empty handle unless Running
    pub fn send_request<T: DecodeReply>(
        &self,
        kind: RequestKind,
        params: Value,
        handler: ReplyHandler<T>,
    ) -> RequestHandle {
        let mut core = self.shared.lock();
        if core.state != SessionState::Running {
            warn!("send {} for non-running server ({})", kind.method(), core.state);
            return RequestHandle::empty();
        }
        self.write_request(&mut core, kind, params, handler.into_pending(kind))
    }

    /// Send a notification; refused unless Running
    pub fn send_notification(&self, method: &str, params: Value) -> Result<(), LspError> {
        let mut core = self.shared.lock();
        if core.state != SessionState::Running {
            warn!("send {} for non-running server ({})", method, core.state);
            return Err(LspError::NotRunning(core.state));
        }
        core.write(&notification(method, params))
    }

    /// Forget the handler for `id` and tell the server, if it was still pending
    pub fn cancel(&self, id: u64) {
        self.shared.cancel_request(id);
    }

    /// Send `shutdown` + `exit` and drop every pending handler
    ///
    /// Only acts while Running; the `shutdown` reply, if any, is ignored.
    pub fn shutdown(&self) {
        let mut core = self.shared.lock();
        if core.state != SessionState::Running {
            return;
        }

        let abandoned = core.correlator.clear();
        info!("Shutting down server, abandoning {} pending requests", abandoned);

        let id = core.correlator.allocate();
        let shutdown = request(RequestId::from(id), RequestKind::Shutdown.method(), Value::Null);
        if let Err(e) = core.write(&shutdown) {
            warn!("Failed to send shutdown: {}", e);
        }
        if let Err(e) = core.write(&notification(notif::Exit::METHOD, Value::Null)) {
            warn!("Failed to send exit: {}", e);
        }
        self.shared.set_state(&mut core, SessionState::Shutdown);
    }

    /// The server process is gone: abandon everything and fall back to None
    pub fn connection_lost(&self) {
        let mut core = self.shared.lock();
        let abandoned = core.correlator.clear();
        if abandoned > 0 {
            warn!("Server went away with {} pending requests", abandoned);
        }
        core.inbound.clear();
        core.outbound = None;
        self.shared.set_state(&mut core, SessionState::None);
    }

    // ------------------------------------------------------------------------
    // Document synchronization
    // ------------------------------------------------------------------------

    pub fn did_open(
        &self,
        document: &Uri,
        version: i32,
        language_id: &str,
        text: &str,
    ) -> Result<(), LspError> {
        self.send_notification(
            notif::DidOpenTextDocument::METHOD,
            params::did_open_params(document, version, language_id, text),
        )
    }

    pub fn did_change(
        &self,
        document: &Uri,
        version: Option<i32>,
        changes: &[TextDocumentContentChange],
    ) -> Result<(), LspError> {
        self.send_notification(
            notif::DidChangeTextDocument::METHOD,
            params::did_change_params(document, version, changes),
        )
    }

    pub fn did_save(&self, document: &Uri, text: Option<&str>) -> Result<(), LspError> {
        self.send_notification(
            notif::DidSaveTextDocument::METHOD,
            params::did_save_params(document, text),
        )
    }

    pub fn did_close(&self, document: &Uri) -> Result<(), LspError> {
        self.send_notification(
            notif::DidCloseTextDocument::METHOD,
            params::did_close_params(document),
        )
    }

    pub fn did_change_configuration(&self, settings: Value) -> Result<(), LspError> {
        self.send_notification(
            notif::DidChangeConfiguration::METHOD,
            params::did_change_configuration_params(settings),
        )
    }

    // ------------------------------------------------------------------------
    // Feature requests
    // ------------------------------------------------------------------------

    pub fn document_symbols(
        &self,
        document: &Uri,
        handler: ReplyHandler<Vec<DocumentSymbol>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::DocumentSymbol,
            params::document_symbol_params(document),
            handler,
        )
    }

    pub fn definition(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<Vec<Location>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Definition,
            params::text_document_position_params(document, &position),
            handler,
        )
    }

    pub fn declaration(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<Vec<Location>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Declaration,
            params::text_document_position_params(document, &position),
            handler,
        )
    }

    pub fn hover(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<Hover>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Hover,
            params::text_document_position_params(document, &position),
            handler,
        )
    }

    pub fn document_highlight(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<Vec<DocumentHighlight>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::DocumentHighlight,
            params::text_document_position_params(document, &position),
            handler,
        )
    }

    pub fn references(
        &self,
        document: &Uri,
        position: Position,
        include_declaration: bool,
        handler: ReplyHandler<Vec<Location>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::References,
            params::reference_params(document, &position, include_declaration),
            handler,
        )
    }

    pub fn completion(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<Vec<CompletionItem>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Completion,
            params::completion_params(document, &position),
            handler,
        )
    }

    pub fn signature_help(
        &self,
        document: &Uri,
        position: Position,
        handler: ReplyHandler<SignatureHelp>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::SignatureHelp,
            params::signature_help_params(document, &position),
            handler,
        )
    }

    pub fn document_formatting(
        &self,
        document: &Uri,
        options: &FormattingOptions,
        handler: ReplyHandler<Vec<TextEdit>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Formatting,
            params::formatting_params(document, options),
            handler,
        )
    }

    pub fn document_range_formatting(
        &self,
        document: &Uri,
        range: Range,
        options: &FormattingOptions,
        handler: ReplyHandler<Vec<TextEdit>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::RangeFormatting,
            params::range_formatting_params(document, &range, options),
            handler,
        )
    }

    pub fn document_on_type_formatting(
        &self,
        document: &Uri,
        position: Position,
        ch: char,
        options: &FormattingOptions,
        handler: ReplyHandler<Vec<TextEdit>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::OnTypeFormatting,
            params::on_type_formatting_params(document, &position, ch, options),
            handler,
        )
    }

    pub fn rename(
        &self,
        document: &Uri,
        position: Position,
        new_name: &str,
        handler: ReplyHandler<WorkspaceEdit>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::Rename,
            params::rename_params(document, &position, new_name),
            handler,
        )
    }

    pub fn code_action(
        &self,
        document: &Uri,
        range: Range,
        kinds: &[String],
        diagnostics: &[Diagnostic],
        handler: ReplyHandler<Vec<CodeActionOrCommand>>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::CodeAction,
            params::code_action_params(document, &range, kinds, diagnostics),
            handler,
        )
    }

    pub fn execute_command(
        &self,
        command: &str,
        arguments: Value,
        handler: ReplyHandler<Value>,
    ) -> RequestHandle {
        self.send_request(
            RequestKind::ExecuteCommand,
            params::execute_command_params(command, arguments),
            handler,
        )
    }
}

impl fmt::Debug for LspClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LspClient")
            .field("state", &self.state())
            .field("root", &self.shared.options.root_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsp::correlator::Liveness;
    use crate::lsp::semantic::{SemanticHighlightingToken, encode_tokens};
    use crate::lsp::types::ApplyWorkspaceEditResponse;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
    use tokio::sync::oneshot;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Server end of an in-memory session
    struct FakeServer {
        read: ReadHalf<DuplexStream>,
        write: WriteHalf<DuplexStream>,
        reader: FrameReader,
        queued: VecDeque<Value>,
    }

    impl FakeServer {
        async fn next_message(&mut self) -> Value {
            tokio::time::timeout(TIMEOUT, async {
                loop {
                    if let Some(message) = self.queued.pop_front() {
                        return message;
                    }
                    let mut buf = [0u8; 4096];
                    let n = self.read.read(&mut buf).await.unwrap();
                    assert!(n > 0, "client closed the pipe");
                    self.queued.extend(self.reader.push(&buf[..n]));
                }
            })
            .await
            .expect("timed out waiting for a client message")
        }

        async fn send(&mut self, message: Value) {
            let frame = encode_frame(&message).unwrap();
            self.write.write_all(&frame).await.unwrap();
        }

        async fn reply(&mut self, id: &Value, result: Value) {
            self.send(json!({"jsonrpc": "2.0", "id": id, "result": result}))
                .await;
        }
    }

    fn document() -> Uri {
        Uri::from_str("file:///work/main.cpp").unwrap()
    }

    fn connect() -> (LspClient, FakeServer, mpsc::UnboundedReceiver<SessionEvent>) {
        connect_with(true)
    }

    fn connect_with(
        semantic_highlighting: bool,
    ) -> (LspClient, FakeServer, mpsc::UnboundedReceiver<SessionEvent>) {
        let (client_io, server_io) = tokio::io::duplex(1 << 16);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let options = ClientOptions {
            root_path: PathBuf::from("/work"),
            root_uri: Uri::from_str("file:///work").unwrap(),
            initialization_options: json!({"fallbackFlags": ["-std=c++20"]}),
            semantic_highlighting,
        };
        let client = LspClient::new(
            StdioTransport::new(client_write, client_read),
            options,
            events_tx,
        );
        let server = FakeServer {
            read: server_read,
            write: server_write,
            reader: FrameReader::new(),
            queued: VecDeque::new(),
        };
        (client, server, events_rx)
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        tokio::time::timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for a session event")
            .expect("event channel closed")
    }

    async fn wait_for_state(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        wanted: SessionState,
    ) {
        loop {
            if let SessionEvent::StateChanged(state) = next_event(events).await {
                if state == wanted {
                    return;
                }
            }
        }
    }

    async fn running(
        capabilities: Value,
    ) -> (LspClient, FakeServer, mpsc::UnboundedReceiver<SessionEvent>) {
        let (client, mut server, mut events) = connect();
        assert!(client.initialize().is_valid());

        let init = server.next_message().await;
        assert_eq!(init["method"], "initialize");
        server
            .reply(&init["id"], json!({"capabilities": capabilities}))
            .await;
        assert_eq!(server.next_message().await["method"], "initialized");
        wait_for_state(&mut events, SessionState::Running).await;
        (client, server, events)
    }

    fn capture<T: DecodeReply>() -> (ReplyHandler<T>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        let handler = ReplyHandler::new(move |reply: T| {
            let _ = tx.send(reply);
        });
        (handler, rx)
    }

    #[tokio::test]
    async fn test_initialize_handshake() {
        let (client, mut server, mut events) = connect();
        assert_eq!(client.state(), SessionState::None);

        client.initialize();
        assert!(matches!(
            next_event(&mut events).await,
            SessionEvent::StateChanged(SessionState::Started)
        ));

        let init = server.next_message().await;
        assert_eq!(init["id"], 1);
        assert_eq!(init["params"]["processId"], std::process::id());
        assert_eq!(init["params"]["rootPath"], "/work");
        assert_eq!(init["params"]["rootUri"], "file:///work");
        assert_eq!(
            init["params"]["initializationOptions"]["fallbackFlags"][0],
            "-std=c++20"
        );
        assert_eq!(
            init["params"]["capabilities"]["textDocument"]["semanticHighlightingCapabilities"]
                ["semanticHighlighting"],
            true
        );

        // nothing but initialize may leave before the reply
        let (handler, _rx) = capture::<Hover>();
        assert!(!client.hover(&document(), Position::new(0, 0), handler).is_valid());
        assert!(client.did_close(&document()).is_err());
        assert!(!client.initialize().is_valid());

        server
            .reply(
                &init["id"],
                json!({"capabilities": {"hoverProvider": true, "textDocumentSync": 2}}),
            )
            .await;
        let initialized = server.next_message().await;
        assert_eq!(initialized["method"], "initialized");
        assert!(initialized.get("id").is_none());

        wait_for_state(&mut events, SessionState::Running).await;
        let caps = client.capabilities();
        assert!(caps.hover_provider);
        assert!(!caps.definition_provider);
    }

    #[tokio::test]
    async fn test_replies_matched_out_of_order() {
        let (client, mut server, _events) = running(json!({})).await;

        let (first, first_rx) = capture::<Vec<Location>>();
        let (second, second_rx) = capture::<Hover>();
        let a = client.definition(&document(), Position::new(1, 2), first);
        let b = client.hover(&document(), Position::new(3, 4), second);
        assert!(b.id().unwrap() > a.id().unwrap());

        let definition = server.next_message().await;
        let hover = server.next_message().await;
        assert_eq!(definition["method"], "textDocument/definition");
        assert_eq!(hover["params"]["position"], json!({"line": 3, "character": 4}));

        server
            .reply(&hover["id"], json!({"contents": "int x"}))
            .await;
        server
            .reply(
                &definition["id"],
                json!({
                    "uri": "file:///work/a.h",
                    "range": {"start": {"line": 9, "character": 0}, "end": {"line": 9, "character": 5}}
                }),
            )
            .await;

        let hover = second_rx.await.unwrap();
        assert_eq!(hover.contents[0].value, "int x");
        let locations = first_rx.await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start.line, 9);
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_cancel_suppresses_reply() {
        let (client, mut server, _events) = running(json!({})).await;

        let (handler, rx) = capture::<Vec<CompletionItem>>();
        let handle = client.completion(&document(), Position::new(0, 1), handler);
        let sent = server.next_message().await;

        handle.cancel();
        let cancel = server.next_message().await;
        assert_eq!(cancel["method"], "$/cancelRequest");
        assert_eq!(cancel["params"]["id"], sent["id"]);

        // the handler is gone, so a late reply is dropped on the floor
        server.reply(&sent["id"], json!([{"label": "x"}])).await;
        assert!(rx.await.is_err());

        // cancelling again sends nothing
        handle.cancel();
        let (handler, _rx) = capture::<Value>();
        client.execute_command("noop", json!([]), handler);
        assert_eq!(server.next_message().await["method"], "workspace/executeCommand");
    }

    #[tokio::test]
    async fn test_error_reply_delivers_empty_value() {
        let (client, mut server, _events) = running(json!({})).await;

        let (handler, rx) = capture::<Vec<DocumentSymbol>>();
        client.document_symbols(&document(), handler);
        let sent = server.next_message().await;
        server
            .send(json!({
                "jsonrpc": "2.0",
                "id": sent["id"],
                "error": {"code": -32602, "message": "bad params"}
            }))
            .await;
        assert!(rx.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_released_receiver_not_invoked() {
        let (client, mut server, _events) = running(json!({})).await;
        let owner = Liveness::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        client.references(
            &document(),
            Position::new(2, 2),
            true,
            ReplyHandler::bound(&owner, move |_: Vec<Location>| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let sent = server.next_message().await;
        assert_eq!(sent["params"]["context"]["includeDeclaration"], true);
        drop(owner);

        server.reply(&sent["id"], json!([])).await;
        // a second round trip proves the first reply was dispatched
        let (handler, rx) = capture::<Value>();
        client.execute_command("ping", Value::Null, handler);
        let ping = server.next_message().await;
        server.reply(&ping["id"], json!("pong")).await;
        assert_eq!(rx.await.unwrap(), "pong");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_server_request_gets_method_not_found() {
        let (_client, mut server, _events) = running(json!({})).await;

        server
            .send(json!({"jsonrpc": "2.0", "id": 77, "method": "window/showDocument", "params": {}}))
            .await;
        let response = server.next_message().await;
        assert_eq!(response["id"], 77);
        assert_eq!(response["error"]["code"], -32601);
    }

    #[tokio::test]
    async fn test_apply_edit_window_evicts_oldest() {
        let (_client, mut server, mut events) = running(json!({})).await;

        for id in 1..=6 {
            server
                .send(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "method": "workspace/applyEdit",
                    "params": {"label": format!("edit {id}"), "edit": {"changes": {}}}
                }))
                .await;
        }

        let mut responders = Vec::new();
        while responders.len() < 6 {
            if let SessionEvent::ApplyEdit { params, responder } = next_event(&mut events).await {
                assert_eq!(params.label.as_deref(), Some(&*format!("edit {}", responders.len() + 1)));
                responders.push(responder);
            }
        }

        let newest = responders.pop().unwrap();
        let oldest = responders.remove(0);
        assert_eq!(oldest.id(), &RequestId::Number(1));
        assert!(!oldest.respond(ApplyWorkspaceEditResponse {
            applied: true,
            failure_reason: None,
        }));
        assert!(newest.respond(ApplyWorkspaceEditResponse {
            applied: false,
            failure_reason: Some("read-only".into()),
        }));

        // the evicted response never reached the wire
        let response = server.next_message().await;
        assert_eq!(response["id"], 6);
        assert_eq!(response["result"]["applied"], false);
        assert_eq!(response["result"]["failureReason"], "read-only");
    }

    #[tokio::test]
    async fn test_notifications_become_events() {
        let (_client, mut server, mut events) = running(json!({})).await;

        server
            .send(json!({"jsonrpc": "2.0", "method": "window/logMessage", "params": {"type": 3}}))
            .await;
        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {
                    "uri": "file:///work/main.cpp",
                    "diagnostics": [{
                        "range": {"start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 1}},
                        "severity": 1,
                        "code": 42,
                        "message": "expected ';'"
                    }]
                }
            }))
            .await;

        match next_event(&mut events).await {
            SessionEvent::Diagnostics(published) => {
                assert_eq!(published.uri.as_str(), "file:///work/main.cpp");
                assert_eq!(published.diagnostics[0].code.as_deref(), Some("42"));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_diagnostics_without_uri_are_dropped() {
        let (_client, mut server, mut events) = running(json!({})).await;

        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"diagnostics": []}
            }))
            .await;
        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/publishDiagnostics",
                "params": {"uri": "file:///work/other.cpp", "diagnostics": []}
            }))
            .await;

        match next_event(&mut events).await {
            SessionEvent::Diagnostics(published) => {
                assert_eq!(published.uri.as_str(), "file:///work/other.cpp");
                assert!(published.diagnostics.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_semantic_highlighting_not_advertised_when_disabled() {
        let (client, mut server, _events) = connect_with(false);
        client.initialize();

        let init = server.next_message().await;
        assert_eq!(init["method"], "initialize");
        assert_eq!(
            init["params"]["capabilities"]["textDocument"]["semanticHighlightingCapabilities"]
                ["semanticHighlighting"],
            false
        );
    }

    #[tokio::test]
    async fn test_semantic_highlighting_notification_decoded() {
        let (_client, mut server, mut events) = running(json!({})).await;

        let tokens = [
            SemanticHighlightingToken {
                character: 4,
                length: 4,
                scope: 1,
            },
            SemanticHighlightingToken {
                character: 70_000,
                length: 2,
                scope: 9,
            },
        ];
        server
            .send(json!({
                "jsonrpc": "2.0",
                "method": "textDocument/semanticHighlighting",
                "params": {
                    "textDocument": {"uri": "file:///work/main.cpp", "version": 3},
                    "lines": [
                        {"line": 2, "tokens": encode_tokens(&tokens)},
                        {"line": 5, "tokens": ""}
                    ]
                }
            }))
            .await;

        match next_event(&mut events).await {
            SessionEvent::SemanticHighlighting(params) => {
                assert_eq!(params.uri, Some(document()));
                assert_eq!(params.version, Some(3));
                assert_eq!(params.lines.len(), 2);
                assert_eq!(params.lines[0].line, 2);
                assert_eq!(params.lines[0].tokens, tokens.to_vec());
                assert_eq!(params.lines[1].line, 5);
                assert!(params.lines[1].tokens.is_empty());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_abandons_pending() {
        let (client, mut server, mut events) = running(json!({})).await;

        let (handler, rx) = capture::<SignatureHelp>();
        client.signature_help(&document(), Position::new(4, 8), handler);
        let pending = server.next_message().await;

        client.shutdown();
        let shutdown = server.next_message().await;
        assert_eq!(shutdown["method"], "shutdown");
        assert!(shutdown["id"].is_u64());
        let exit = server.next_message().await;
        assert_eq!(exit["method"], "exit");
        assert!(exit.get("id").is_none());
        wait_for_state(&mut events, SessionState::Shutdown).await;

        server.reply(&pending["id"], json!({"signatures": []})).await;
        assert!(rx.await.is_err());
        assert!(client.did_save(&document(), None).is_err());
    }

    #[tokio::test]
    async fn test_connection_lost_resets_state() {
        let (client, mut server, mut events) = running(json!({})).await;

        let (handler, rx) = capture::<WorkspaceEdit>();
        client.rename(&document(), Position::new(1, 1), "renamed", handler);
        assert_eq!(server.next_message().await["params"]["newName"], "renamed");

        client.connection_lost();
        wait_for_state(&mut events, SessionState::None).await;
        assert!(rx.await.is_err());
        assert_eq!(client.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_document_sync_notifications() {
        let (client, mut server, _events) = running(json!({"textDocumentSync": 1})).await;

        client
            .did_open(&document(), 1, "cpp", "int main() {}")
            .unwrap();
        client
            .did_change(
                &document(),
                Some(2),
                &[TextDocumentContentChange::full("int main() { return 0; }")],
            )
            .unwrap();
        client
            .did_change_configuration(json!({"compilationDatabaseChanges": {}}))
            .unwrap();

        let open = server.next_message().await;
        assert_eq!(open["method"], "textDocument/didOpen");
        assert_eq!(open["params"]["textDocument"]["languageId"], "cpp");
        let change = server.next_message().await;
        assert_eq!(change["params"]["textDocument"]["version"], 2);
        let config = server.next_message().await;
        assert_eq!(config["method"], "workspace/didChangeConfiguration");
    }
}
