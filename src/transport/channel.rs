//! In-memory channel transport.
//!
//! A duplex pair of message queues. Used to embed a server and its client
//! in one process, and throughout the test suite to drive sessions without
//! touching real I/O.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{McpError, Result, TransportError};
use crate::protocol::AnyMessage;
use crate::transport::Transport;

/// One endpoint of an in-memory duplex message channel
pub struct ChannelTransport {
    tx: Mutex<Option<mpsc::Sender<AnyMessage>>>,
    rx: Mutex<mpsc::Receiver<AnyMessage>>,
}

impl ChannelTransport {
    /// Create a connected pair of endpoints
    pub fn pair(buffer: usize) -> (ChannelTransport, ChannelTransport) {
        let (a_tx, a_rx) = mpsc::channel(buffer);
        let (b_tx, b_rx) = mpsc::channel(buffer);

        (
            ChannelTransport {
                tx: Mutex::new(Some(a_tx)),
                rx: Mutex::new(b_rx),
            },
            ChannelTransport {
                tx: Mutex::new(Some(b_tx)),
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, message: AnyMessage) -> Result<()> {
        let tx = self.tx.lock().await;
        match tx.as_ref() {
            Some(tx) => tx
                .send(message)
                .await
                .map_err(|_| McpError::Transport(TransportError::ConnectionLost(
                    "peer endpoint dropped".to_string(),
                ))),
            None => Err(McpError::Transport(TransportError::Closed)),
        }
    }

    async fn recv(&self) -> Option<AnyMessage> {
        self.rx.lock().await.recv().await
    }

    async fn close(&self) {
        // Dropping the sender lets the peer's recv() observe EOF
        self.tx.lock().await.take();
    }
}
