//! Process management layer
//!
//! Owns the server child process: spawning with piped stdio, stderr
//! forwarding, exit observation, and the staged terminate/kill escalation
//! used when a session is stopped or dropped.

use crate::io::transport::StdioTransport;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

// ============================================================================
// Constants
// ============================================================================

/// How long to wait for the OS to reap a process after SIGKILL
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Process State Management
// ============================================================================

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has not been started yet
    NotStarted,
    /// Process is currently running
    Running { pid: u32 },
    /// Process exited, on its own or after a signal
    Stopped,
}

impl ProcessState {
    /// Get the process ID if the process is running
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    /// Check if the process is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// There was no running process
    NotRunning,
    /// The process exited without being signalled
    Exited,
    /// The process exited after SIGTERM
    Terminated,
    /// The process had to be killed
    Killed,
    /// Both stages were skipped and the process is still alive
    StillRunning,
}

// ============================================================================
// Process Exit Events
// ============================================================================

/// Event fired when the process exits, whatever the cause
#[derive(Debug, Clone)]
pub struct ProcessExitEvent {
    pub pid: u32,
    /// `None` when waiting on the child failed
    pub status: Option<ExitStatus>,
}

/// Trait for handling process exit events
#[async_trait]
pub trait ProcessExitHandler: Send + Sync {
    async fn on_process_exit(&self, event: ProcessExitEvent);
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

type StderrHandler = Box<dyn Fn(String) + Send + Sync>;

/// Supervises one server child process
pub struct ProcessSupervisor {
    /// Command to execute
    command: String,

    /// Command arguments
    args: Vec<String>,

    /// Working directory for the process (optional)
    working_directory: Option<PathBuf>,

    /// Thread-safe process state
    state: Arc<Mutex<ProcessState>>,

    /// Stdio transport (created when process starts)
    stdio_transport: Option<StdioTransport>,

    /// Stderr line handler; without one stderr is passed through to ours
    stderr_handler: Option<StderrHandler>,

    stderr_task: Option<JoinHandle<()>>,

    /// Process wait task handle (waits for child to exit)
    wait_task: Option<JoinHandle<()>>,

    exit_handler: Option<Arc<dyn ProcessExitHandler>>,

    /// Flips to `true` once the child has been reaped
    exited: Option<watch::Receiver<bool>>,

    /// Grace period for each escalation stage when dropped while running;
    /// `None` leaves the process alone
    drop_grace: Option<Duration>,
}

impl ProcessSupervisor {
    /// Create a new supervisor; nothing is spawned until [`Self::start`]
    pub fn new(command: String, args: Vec<String>, working_dir: Option<PathBuf>) -> Self {
        Self {
            command,
            args,
            working_directory: working_dir,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            stdio_transport: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
            exit_handler: None,
            exited: None,
            drop_grace: Some(Duration::from_millis(200)),
        }
    }

    /// Get current process state (thread-safe)
    pub fn get_state(&self) -> ProcessState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    pub fn pid(&self) -> Option<u32> {
        self.get_state().pid()
    }

    /// Install a handler for stderr lines; must be called before `start`
    pub fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }

    /// Install the exit handler; must be called before `start`
    pub fn set_exit_handler(&mut self, handler: Arc<dyn ProcessExitHandler>) {
        self.exit_handler = Some(handler);
    }

    pub fn set_drop_grace(&mut self, grace: Option<Duration>) {
        self.drop_grace = grace;
    }

    /// Spawn the process with piped stdio
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        info!("Starting process: {} {:?}", self.command, self.args);

        let mut command_builder = Command::new(&self.command);
        command_builder
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        if let Some(working_dir) = &self.working_directory {
            command_builder.current_dir(working_dir);
        }

        let mut child = command_builder.spawn()?;

        let Some(pid) = child.id() else {
            return Err(ProcessError::Io(io::Error::other("Failed to get process ID")));
        };
        info!("Process started with PID: {}", pid);

        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = ProcessState::Running { pid };
        self.stdio_transport = Some(StdioTransport::new(stdin, stdout));
        self.spawn_stderr_task(stderr);
        self.spawn_wait_task(child, pid);

        Ok(())
    }

    /// Hand out the stdio transport; only the first call after `start` succeeds
    pub fn create_stdio_transport(&mut self) -> Result<StdioTransport, ProcessError> {
        self.stdio_transport.take().ok_or(ProcessError::NotStarted)
    }

    /// Spawn the stderr task
    ///
    /// Always drains stderr so the child never blocks on a full pipe.
    fn spawn_stderr_task(&mut self, stderr: ChildStderr) {
        let handler = self.stderr_handler.take();

        let task = tokio::spawn(async move {
            let Some(handler) = handler else {
                trace!("ProcessSupervisor: Forwarding stderr to parent");
                let mut stderr = stderr;
                let mut parent = tokio::io::stderr();
                if let Err(e) = tokio::io::copy(&mut stderr, &mut parent).await {
                    debug!("Stderr forwarding ended: {}", e);
                }
                return;
            };

            let mut reader = BufReader::new(stderr);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        trace!("ProcessSupervisor: stderr EOF reached");
                        break;
                    }
                    Ok(_) => {
                        let line_content = line.trim_end();
                        if !line_content.is_empty() {
                            handler(line_content.to_string());
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stderr: {}", e);
                        break;
                    }
                }
            }
        });

        self.stderr_task = Some(task);
    }

    /// Spawn the wait task that reaps the child and reports its exit
    fn spawn_wait_task(&mut self, mut child: Child, pid: u32) {
        let exit_handler = self.exit_handler.clone();
        let state = Arc::clone(&self.state);
        let (exited_tx, exited_rx) = watch::channel(false);
        self.exited = Some(exited_rx);

        let task = tokio::spawn(async move {
            trace!("ProcessSupervisor: Starting wait task for PID {}", pid);

            let status = match child.wait().await {
                Ok(status) => {
                    info!("Process PID {} exited with status: {}", pid, status);
                    Some(status)
                }
                Err(e) => {
                    error!("Error waiting for child process: {}", e);
                    None
                }
            };

            // published before the handler runs so nothing signals a reaped pid
            *state.lock().unwrap_or_else(PoisonError::into_inner) = ProcessState::Stopped;
            let _ = exited_tx.send(true);

            if let Some(handler) = &exit_handler {
                handler.on_process_exit(ProcessExitEvent { pid, status }).await;
            }

            trace!("ProcessSupervisor: Wait task finished for PID {}", pid);
        });

        self.wait_task = Some(task);
    }

    /// Wait up to `timeout` for the child to be reaped
    pub async fn wait_for_exit(&self, timeout: Duration) -> bool {
        match &self.exited {
            Some(exited) => wait_exited(exited.clone(), timeout).await,
            None => true,
        }
    }

    /// Staged stop
    ///
    /// With `terminate_after` set, waits that long for a voluntary exit and
    /// then sends SIGTERM. With `kill_after` set, waits that long again and
    /// then sends SIGKILL. A `None` stage is skipped entirely.
    pub async fn stop_process(
        &mut self,
        terminate_after: Option<Duration>,
        kill_after: Option<Duration>,
    ) -> Result<StopOutcome, ProcessError> {
        let Some(pid) = self.pid() else {
            return Ok(StopOutcome::NotRunning);
        };

        let mut terminated = false;
        if let Some(timeout) = terminate_after {
            if self.wait_for_exit(timeout).await {
                return Ok(StopOutcome::Exited);
            }
            info!("Process {} still running after {:?}, terminating", pid, timeout);
            signal_if_running(&self.state, pid, Signal::Term);
            terminated = true;
        }

        if let Some(timeout) = kill_after {
            if self.wait_for_exit(timeout).await {
                return Ok(if terminated {
                    StopOutcome::Terminated
                } else {
                    StopOutcome::Exited
                });
            }
            warn!("Process {} still running after {:?}, killing", pid, timeout);
            signal_if_running(&self.state, pid, Signal::Kill);
            if !self.wait_for_exit(KILL_REAP_TIMEOUT).await {
                error!("Process {} not reaped after SIGKILL", pid);
            }
            return Ok(StopOutcome::Killed);
        }

        if self.wait_for_exit(Duration::ZERO).await {
            Ok(if terminated {
                StopOutcome::Terminated
            } else {
                StopOutcome::Exited
            })
        } else {
            Ok(StopOutcome::StillRunning)
        }
    }

    /// Synchronous force kill, for contexts without a runtime
    pub fn kill_sync(&mut self) {
        let Some(pid) = self.pid() else {
            return;
        };

        info!("Synchronously force killing process with PID: {}", pid);
        signal_if_running(&self.state, pid, Signal::Kill);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        // the wait task reaps the child and updates state
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let Some(pid) = self.pid() else {
            return;
        };
        let Some(grace) = self.drop_grace else {
            debug!("Leaving process {} running on drop", pid);
            return;
        };

        match (tokio::runtime::Handle::try_current(), self.exited.clone()) {
            (Ok(runtime), Some(exited)) => {
                debug!("Detaching shutdown escalation for PID {}", pid);
                let state = Arc::clone(&self.state);
                runtime.spawn(async move {
                    if wait_exited(exited.clone(), grace).await {
                        return;
                    }
                    signal_if_running(&state, pid, Signal::Term);
                    if wait_exited(exited, grace).await {
                        return;
                    }
                    warn!("Process {} ignored SIGTERM, killing", pid);
                    signal_if_running(&state, pid, Signal::Kill);
                });
            }
            _ => {
                eprintln!("Warning: server process {} dropped without a runtime, killing", pid);
                self.kill_sync();
            }
        }
    }
}

async fn wait_exited(mut exited: watch::Receiver<bool>, timeout: Duration) -> bool {
    let reaped = async move {
        while !*exited.borrow_and_update() {
            // the sender is dropped only after it published `true`
            if exited.changed().await.is_err() {
                break;
            }
        }
    };
    tokio::time::timeout(timeout, reaped).await.is_ok()
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Term,
    Kill,
}

/// Signal `pid` only while it is still the child we have not reaped
fn signal_if_running(state: &Mutex<ProcessState>, pid: u32, signal: Signal) {
    let state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.pid() != Some(pid) {
        debug!("Process {} already reaped, not sending {:?}", pid, signal);
        return;
    }
    send_signal(pid, signal);
}

fn send_signal(pid: u32, signal: Signal) {
    #[cfg(unix)]
    {
        let signo = match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, signo) };
        if rc == 0 {
            info!("Sent {:?} to process {}", signal, pid);
        } else {
            debug!(
                "Failed to send {:?} to process {}: {}",
                signal,
                pid,
                io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    {
        warn!(
            "Signal {:?} for process {} not supported on this platform",
            signal, pid
        );
    }
}
