//! Transport abstraction.
//!
//! The session core is transport-agnostic: it consumes and produces parsed
//! [`AnyMessage`] values over a full-duplex channel. Byte-level framing,
//! message ID assignment on the peer side, and process plumbing live in the
//! concrete implementations.

pub mod channel;
pub mod stdio;

pub use channel::ChannelTransport;
pub use stdio::StdioTransport;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::AnyMessage;

/// A full-duplex, message-oriented connection to the peer.
///
/// Implementations must serialize concurrent `send` calls internally; the
/// session issues them from multiple tasks. `recv` is only called from the
/// session's read loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message to the peer
    async fn send(&self, message: AnyMessage) -> Result<()>;

    /// Receive the next message; `None` means the peer is gone
    async fn recv(&self) -> Option<AnyMessage>;

    /// Close the connection
    async fn close(&self);
}
