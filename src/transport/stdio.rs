//! STDIO transport.
//!
//! Newline-framed JSON-RPC over the process's own stdin/stdout, the
//! standard pairing for MCP servers launched as subprocesses. Log output
//! must go to stderr; stdout belongs to the protocol.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin, Stdout};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::{McpError, Result, TransportError};
use crate::protocol::{parse_message, serialize_message, AnyMessage};
use crate::transport::Transport;

/// Default read buffer size in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// STDIO transport over the current process's standard streams
pub struct StdioTransport {
    lines: Mutex<Lines<BufReader<Stdin>>>,
    stdout: Mutex<Stdout>,
}

impl StdioTransport {
    /// Create a transport with the default buffer size
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    /// Create a transport with an explicit read buffer size
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let reader = BufReader::with_capacity(buffer_size, tokio::io::stdin());
        Self {
            lines: Mutex::new(reader.lines()),
            stdout: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, message: AnyMessage) -> Result<()> {
        let serialized = serialize_message(&message)?;
        debug!("stdio send: {}", serialized);

        let mut stdout = self.stdout.lock().await;
        stdout
            .write_all(serialized.as_bytes())
            .await
            .map_err(|e| McpError::Transport(TransportError::ConnectionLost(e.to_string())))?;
        stdout
            .write_all(b"\n")
            .await
            .map_err(|e| McpError::Transport(TransportError::ConnectionLost(e.to_string())))?;
        stdout
            .flush()
            .await
            .map_err(|e| McpError::Transport(TransportError::ConnectionLost(e.to_string())))?;

        Ok(())
    }

    async fn recv(&self) -> Option<AnyMessage> {
        let mut lines = self.lines.lock().await;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    debug!("stdio recv: {}", line);
                    match parse_message(&line) {
                        Ok(message) => return Some(message),
                        Err(e) => {
                            // One bad frame doesn't kill the session
                            error!("failed to parse message from stdin: {}", e);
                            continue;
                        }
                    }
                }
                Ok(None) => {
                    info!("EOF reached on stdin");
                    return None;
                }
                Err(e) => {
                    error!("error reading from stdin: {}", e);
                    return None;
                }
            }
        }
    }

    async fn close(&self) {
        let mut stdout = self.stdout.lock().await;
        let _ = stdout.flush().await;
    }
}
