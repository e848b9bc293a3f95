//! # MCP Session
//!
//! The server side of a Model Context Protocol (MCP) session in Rust: a
//! bidirectional JSON-RPC 2.0 peer exposing tools, resources, resource
//! templates and prompts to one connected client, while consuming the
//! client's own capabilities (LLM sampling, filesystem roots).
//!
//! The core is transport-agnostic. A [`transport::Transport`] delivers
//! parsed messages; the session state machine enforces the initialize
//! handshake, correlates concurrent requests and responses over the single
//! duplex stream, probes liveness with periodic pings, and tears down in
//! order on disconnect.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mcp_session::{McpServerBuilder, transport::StdioTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = McpServerBuilder::new()
//!         .name("example")
//!         .version("0.1.0")
//!         .build(Arc::new(StdioTransport::new()))?;
//!
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod schema;
pub mod server;
pub mod transport;
pub mod uri_template;
pub mod utils;

// Re-export main types for convenience
pub use client::{CapabilityStatus, ClientHandle, RootsWatcher};
pub use config::Config;
pub use error::{McpError, Result};
pub use protocol::{
    ClientCapabilities, ClientInfo, Implementation, InitializeRequest, InitializeResult,
    ServerCapabilities, PROTOCOL_VERSION,
};
pub use server::session::SessionState;
pub use server::{McpServer, McpServerBuilder};
pub use uri_template::UriTemplate;

/// Default server name
pub const SERVER_NAME: &str = "mcp-session";

/// Default server version
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
