//! Transport layer - raw byte exchange with a server process
//!
//! Two background tasks own the pipes: one drains an outbound queue into the
//! server's stdin, the other forwards whatever arrives on stdout as opaque
//! chunks. Framing is the caller's business; chunk boundaries carry no meaning.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

// ============================================================================
// Constants
// ============================================================================

/// Size of the read buffer for stdout reading operations
const READ_BUFFER_SIZE: usize = 4096;

/// Error types for the stdio transport
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transport is disconnected")]
    Disconnected,
}

// ============================================================================
// Stdio Transport
// ============================================================================

/// Cloneable write half; writes are queued and never block the caller
#[derive(Debug, Clone)]
pub struct TransportSender {
    sender: mpsc::UnboundedSender<Bytes>,
}

impl TransportSender {
    /// Queue `bytes` for the writer task, preserving call order
    pub fn send(&self, bytes: Bytes) -> Result<(), TransportError> {
        self.sender
            .send(bytes)
            .map_err(|_| TransportError::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Read half; yields stdout chunks in arrival order
#[derive(Debug)]
pub struct TransportReceiver {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl TransportReceiver {
    /// Next chunk, or `None` once stdout reached EOF
    pub async fn receive(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }
}

/// Transport over a pair of pipes, typically a child's stdin/stdout
#[derive(Debug)]
pub struct StdioTransport {
    sender: TransportSender,
    receiver: TransportReceiver,
}

impl StdioTransport {
    /// Spawn the writer and reader tasks; must be called within a tokio runtime
    pub fn new<W, R>(stdin: W, stdout: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (stdin_sender, stdin_receiver) = mpsc::unbounded_channel();
        let (stdout_sender, stdout_receiver) = mpsc::unbounded_channel();

        tokio::spawn(Self::stdin_writer_task(stdin, stdin_receiver));
        tokio::spawn(Self::stdout_reader_task(stdout, stdout_sender));

        Self {
            sender: TransportSender {
                sender: stdin_sender,
            },
            receiver: TransportReceiver {
                receiver: stdout_receiver,
            },
        }
    }

    pub fn sender(&self) -> TransportSender {
        self.sender.clone()
    }

    pub fn into_parts(self) -> (TransportSender, TransportReceiver) {
        (self.sender, self.receiver)
    }

    /// Background task that writes queued bytes to stdin
    ///
    /// Once every sender is dropped the pipe is shut down, which the server
    /// observes as EOF on its stdin.
    async fn stdin_writer_task<W>(mut stdin: W, mut receiver: mpsc::UnboundedReceiver<Bytes>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        while let Some(bytes) = receiver.recv().await {
            trace!("StdioTransport: Writing {} bytes", bytes.len());

            if let Err(e) = stdin.write_all(&bytes).await {
                error!("Failed to write to stdin: {}", e);
                return;
            }

            if let Err(e) = stdin.flush().await {
                error!("Failed to flush stdin: {}", e);
                return;
            }
        }

        if let Err(e) = stdin.shutdown().await {
            debug!("StdioTransport: stdin shutdown failed: {}", e);
        }
        trace!("StdioTransport: stdin writer task finished");
    }

    /// Background task that forwards stdout chunks as they arrive
    async fn stdout_reader_task<R>(mut stdout: R, sender: mpsc::UnboundedSender<Vec<u8>>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut read_buffer = Box::new([0u8; READ_BUFFER_SIZE]);

        loop {
            match stdout.read(read_buffer.as_mut()).await {
                Ok(0) => {
                    trace!("StdioTransport: stdout reader reached EOF");
                    break;
                }
                Ok(n) => {
                    if sender.send(read_buffer[..n].to_vec()).is_err() {
                        trace!("StdioTransport: stdout receiver dropped, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    error!("Failed to read from stdout: {}", e);
                    break;
                }
            }
        }

        trace!("StdioTransport: stdout reader task finished");
    }
}
