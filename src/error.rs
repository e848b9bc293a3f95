//! Error handling for the MCP session core.
//!
//! One error type covers both layers: the JSON-RPC envelope errors that map
//! directly to wire codes, and the domain errors raised by registries,
//! handlers and the session state machine.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for MCP operations
pub type Result<T> = std::result::Result<T, McpError>;

/// Main error type for the MCP session core
#[derive(Error, Debug)]
pub enum McpError {
    /// JSON-RPC parse error (-32700)
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON-RPC invalid request (-32600)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// JSON-RPC method not found (-32601)
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// JSON-RPC invalid params (-32602)
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// JSON-RPC internal error (-32603)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// Protocol-level violation (handshake ordering, duplicate initialize)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No tool registered under the given name
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No static resource or matching template for the given URI
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// No prompt registered under the given name
    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    /// A URI template failed to parse
    #[error("Invalid URI template '{pattern}': {reason}")]
    InvalidTemplate { pattern: String, reason: String },

    /// A server-side API requires a capability the server did not declare,
    /// or an outbound call requires one the client did not advertise
    #[error("Capability not supported: {0}")]
    CapabilityNotSupported(String),

    /// The client side of the session is gone
    #[error("Client disconnected")]
    ClientDisconnected,

    /// A duplicate key was offered to a registry
    #[error("Already registered: {0}")]
    AlreadyRegistered(String),

    /// Tool arguments did not satisfy the tool's input schema
    #[error("Invalid input for tool '{tool}': {cause}")]
    InvalidToolInput { tool: String, cause: String },

    /// Prompt arguments did not satisfy the prompt's argument list
    #[error("Invalid arguments for prompt '{prompt}': {cause}")]
    InvalidPromptArguments { prompt: String, cause: String },

    /// An argument bag could not be decoded into the handler's input type.
    /// Carries both the raw payload and the expected schema for diagnostics.
    #[error("Decoding failed\n  received: {raw}\n  expected schema: {schema}")]
    DecodingError { raw: String, schema: String },

    /// Aggregated tool handler failures
    #[error("Tool call failed: {}", format_causes(.0))]
    ToolCallError(Vec<String>),

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_causes(causes: &[String]) -> String {
    causes.join("; ")
}

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Transport closed")]
    Closed,
}

/// JSON-RPC error response structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    /// Convert to JSON-RPC error code
    pub fn to_json_rpc_code(&self) -> i32 {
        match self {
            McpError::ParseError(_) => -32700,
            McpError::InvalidRequest(_) => -32600,
            McpError::MethodNotFound(_) => -32601,
            McpError::InvalidParams(_) => -32602,
            // Domain errors surface as internal errors with their own message
            _ => -32603,
        }
    }

    /// Convert to JSON-RPC error structure
    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.to_json_rpc_code(),
            message: self.to_string(),
            data: None,
        }
    }

    /// Create a parse error
    pub fn parse_error(msg: impl Into<String>) -> Self {
        McpError::ParseError(msg.into())
    }

    /// Create an invalid request error
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        McpError::InvalidRequest(msg.into())
    }

    /// Create a method not found error
    pub fn method_not_found(method: impl Into<String>) -> Self {
        McpError::MethodNotFound(format!("Method '{}' not found", method.into()))
    }

    /// Create an invalid params error
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        McpError::InvalidParams(msg.into())
    }

    /// Create an internal error
    pub fn internal_error(msg: impl Into<String>) -> Self {
        McpError::InternalError(msg.into())
    }

    /// Create an invalid-template error
    pub fn invalid_template(pattern: impl Into<String>, reason: impl Into<String>) -> Self {
        McpError::InvalidTemplate {
            pattern: pattern.into(),
            reason: reason.into(),
        }
    }

    /// Create a decoding error carrying the raw payload and expected schema
    pub fn decoding(raw: &serde_json::Value, schema: &serde_json::Value) -> Self {
        McpError::DecodingError {
            raw: serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()),
            schema: serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string()),
        }
    }
}

impl From<McpError> for JsonRpcError {
    fn from(error: McpError) -> Self {
        error.to_json_rpc_error()
    }
}
