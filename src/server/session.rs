//! Server session
//!
//! A [`ServerSession`] owns one language server process and the [`LspClient`]
//! talking to it. It is the lifecycle surface for collaborators: `start`,
//! `stop` and, implicitly, drop.

use async_trait::async_trait;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{Level, debug, error, info, warn};

use crate::io::process::{
    ProcessExitEvent, ProcessExitHandler, ProcessSupervisor, StopOutcome,
};
use crate::log_timing;
use crate::lsp::capabilities::ServerCapabilities;
use crate::lsp::client::LspClient;
use crate::lsp::dispatcher::SessionEvent;
use crate::lsp::types::SessionState;
use crate::server::config::ServerConfig;
use crate::server::error::SessionError;

/// Forces the client back to None when the process goes away
struct ClientExitHandler {
    client: OnceLock<LspClient>,
}

#[async_trait]
impl ProcessExitHandler for ClientExitHandler {
    async fn on_process_exit(&self, event: ProcessExitEvent) {
        match event.status {
            Some(status) if status.success() => info!("Server {} exited", event.pid),
            Some(status) => warn!("Server {} exited with {}", event.pid, status),
            None => warn!("Server {} exited with unknown status", event.pid),
        }
        if let Some(client) = self.client.get() {
            client.connection_lost();
        }
    }
}

/// One spawned language server
pub struct ServerSession {
    config: ServerConfig,
    process: Option<ProcessSupervisor>,
    client: Option<LspClient>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl ServerSession {
    /// Create an idle session and the receiving end of its event stream
    pub fn new(config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let session = Self {
            config,
            process: None,
            client: None,
            events,
        };
        (session, receiver)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.client
            .as_ref()
            .map_or(SessionState::None, LspClient::state)
    }

    /// Client for the current process; `None` before the first `start`
    pub fn client(&self) -> Option<&LspClient> {
        self.client.as_ref()
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.client
            .as_ref()
            .map(LspClient::capabilities)
            .unwrap_or_default()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ProcessSupervisor::pid)
    }

    /// Spawn the server in the workspace root and begin `initialize`
    ///
    /// Succeeds without doing anything when the session is not in state None.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.state() != SessionState::None {
            debug!("Session already {}, start ignored", self.state());
            return Ok(());
        }

        let mut process = ProcessSupervisor::new(
            self.config.program().to_string(),
            self.config.args().to_vec(),
            Some(self.config.root.clone()),
        );
        process.set_drop_grace(self.config.shutdown_timeout);
        if let Some(handler) = &self.config.stderr_handler {
            let handler = Arc::clone(handler);
            process.on_stderr_line(move |line| handler(line));
        }
        let exit_handler = Arc::new(ClientExitHandler {
            client: OnceLock::new(),
        });
        process.set_exit_handler(exit_handler.clone());

        if let Err(e) = process.start() {
            error!("Failed to start {}: {}", self.config.program(), e);
            return Err(e.into());
        }
        let transport = process.create_stdio_transport()?;

        let client = LspClient::new(
            transport,
            self.config.client_options(),
            self.events.clone(),
        );
        // set before initialize so an early exit is never missed
        let _ = exit_handler.client.set(client.clone());
        client.initialize();
        if !process.is_running() {
            client.connection_lost();
        }

        self.client = Some(client);
        self.process = Some(process);
        Ok(())
    }

    /// Shut the server down
    ///
    /// Sends `shutdown` + `exit` when Running, then waits `grace` for the
    /// process to leave, terminates it, waits `kill` and finally kills it.
    /// A `None` stage is skipped. A no-op when no process is running.
    pub async fn stop(
        &mut self,
        grace: Option<Duration>,
        kill: Option<Duration>,
    ) -> Result<StopOutcome, SessionError> {
        let Some(process) = self.process.as_mut() else {
            return Ok(StopOutcome::NotRunning);
        };
        if !process.is_running() {
            return Ok(StopOutcome::NotRunning);
        }

        let started = Instant::now();
        if let Some(client) = &self.client {
            client.shutdown();
        }
        let outcome = process.stop_process(grace, kill).await?;
        if !process.is_running() {
            // the exit handler may still be in flight
            if let Some(client) = &self.client {
                client.connection_lost();
            }
        }
        log_timing!(Level::DEBUG, "server_stop", started.elapsed());
        info!("Server stopped: {:?}", outcome);
        Ok(outcome)
    }
}

impl Drop for ServerSession {
    fn drop(&mut self) {
        if let Some(client) = &self.client {
            client.shutdown();
        }
        // the supervisor escalates in the background as it is dropped
    }
}

impl std::fmt::Debug for ServerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerSession")
            .field("command", &self.config.command)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(feature = "test-logging")]
    #[ctor::ctor]
    fn init_test_logging() {
        crate::test_utils::logging::init();
    }

    fn session(command: &[&str], root: &TempDir) -> (ServerSession, mpsc::UnboundedReceiver<SessionEvent>) {
        let config = ServerConfig::builder()
            .command(command.iter().copied())
            .root(root.path())
            .stderr_handler(|_| {})
            .build()
            .unwrap();
        ServerSession::new(config)
    }

    async fn wait_for_state(
        events: &mut mpsc::UnboundedReceiver<SessionEvent>,
        wanted: SessionState,
    ) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = events.recv().await {
                if matches!(event, SessionEvent::StateChanged(state) if state == wanted) {
                    return;
                }
            }
            panic!("event stream closed before {wanted}");
        })
        .await
        .expect("timed out waiting for state change");
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_state_none() {
        let root = TempDir::new().unwrap();
        let (mut session, _events) = session(&["/nonexistent/language-server"], &root);

        let result = session.start();
        assert!(matches!(result, Err(SessionError::Process(_))));
        assert_eq!(session.state(), SessionState::None);
        assert_eq!(
            session.stop(None, None).await.unwrap(),
            StopOutcome::NotRunning
        );
    }

    #[tokio::test]
    async fn test_unexpected_exit_falls_back_to_none() {
        let root = TempDir::new().unwrap();
        // consumes initialize and dies without answering
        let (mut session, mut events) = session(&["sh", "-c", "head -c 1 >/dev/null"], &root);

        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Started);
        wait_for_state(&mut events, SessionState::None).await;
        assert_eq!(session.state(), SessionState::None);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_while_started() {
        let root = TempDir::new().unwrap();
        let (mut session, _events) = session(&["sleep", "30"], &root);

        session.start().unwrap();
        let pid = session.pid();
        session.start().unwrap();
        assert_eq!(session.pid(), pid);

        // never initialized, so no shutdown is sent and sleep must be signalled
        let outcome = session
            .stop(Some(Duration::from_millis(50)), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Terminated);
    }

    #[cfg(feature = "clangd-integration-tests")]
    #[tokio::test]
    async fn test_clangd_session_lifecycle() {
        use crate::lsp::correlator::ReplyHandler;
        use std::str::FromStr;

        let root = TempDir::new().unwrap();
        let source = root.path().join("main.cpp");
        std::fs::write(&source, "int add(int a, int b) { return a + b; }\nint main() { return add(1, 2); }\n").unwrap();

        let clangd = crate::test_utils::get_test_clangd_path();
        let (mut session, mut events) = session(&[clangd.as_str()], &root);
        session.start().unwrap();
        wait_for_state(&mut events, SessionState::Running).await;
        assert!(session.capabilities().document_symbol_provider);

        let path = std::fs::canonicalize(&source).unwrap();
        let url = url::Url::from_file_path(path).unwrap();
        let uri = crate::lsp::types::Uri::from_str(url.as_str()).unwrap();
        let client = session.client().unwrap().clone();
        client
            .did_open(&uri, 1, "cpp", &std::fs::read_to_string(&source).unwrap())
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        client.document_symbols(
            &uri,
            ReplyHandler::new(move |symbols| {
                let _ = tx.send(symbols);
            }),
        );
        let symbols = tokio::time::timeout(Duration::from_secs(30), rx)
            .await
            .unwrap()
            .unwrap();
        let names: Vec<_> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["add", "main"]);

        let outcome = session
            .stop(Some(Duration::from_secs(5)), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(outcome, StopOutcome::Exited);
    }
}
