//! JSON-RPC 2.0 envelope for the Model Context Protocol.
//!
//! The session core consumes and produces already-framed messages; the
//! types here are the envelope shapes shared by every transport.

pub mod messages;
pub mod validation;

pub use messages::*;

use serde::{Deserialize, Serialize};

use crate::error::{JsonRpcError, McpError};

/// Protocol version advertised in the initialize handshake
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC version used by MCP
pub const JSONRPC_VERSION: &str = "2.0";

/// Cursor type for pagination
pub type Cursor = String;

/// Progress token attached to long-running requests
pub type ProgressToken = serde_json::Value;

/// A JSON-RPC request ID.
///
/// Kept as its own enum rather than a raw JSON value so it can key the
/// pending-request map on the outbound side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// Generic JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Generic JSON-RPC notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

/// Generic JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// Any JSON-RPC message.
///
/// Untagged variant order matters: a request carries both `id` and
/// `method`, a notification only `method`, a response only `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnyMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
    Response(JsonRpcResponse),
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request
    pub fn new(
        id: impl Into<RequestId>,
        method: impl Into<String>,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcNotification {
    /// Create a new JSON-RPC notification
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

impl JsonRpcResponse {
    /// Create a successful JSON-RPC response
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error JSON-RPC response
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parse a JSON-RPC message from a string
pub fn parse_message(data: &str) -> crate::Result<AnyMessage> {
    serde_json::from_str(data).map_err(|e| McpError::parse_error(e.to_string()))
}

/// Serialize a JSON-RPC message to a string
pub fn serialize_message(message: &AnyMessage) -> crate::Result<String> {
    serde_json::to_string(message).map_err(McpError::Serialization)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_roundtrip() {
        let id: RequestId = serde_json::from_str("42").unwrap();
        assert_eq!(id, RequestId::Number(42));
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");

        let id: RequestId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id, RequestId::String("abc".to_string()));
    }

    #[test]
    fn test_message_classification() {
        let req = parse_message(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#).unwrap();
        assert!(matches!(req, AnyMessage::Request(_)));

        let note =
            parse_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(note, AnyMessage::Notification(_)));

        let resp = parse_message(r#"{"jsonrpc":"2.0","id":1,"result":{}}"#).unwrap();
        assert!(matches!(resp, AnyMessage::Response(_)));

        let err_resp = parse_message(
            r#"{"jsonrpc":"2.0","id":2,"error":{"code":-32601,"message":"nope"}}"#,
        )
        .unwrap();
        match err_resp {
            AnyMessage::Response(r) => {
                assert_eq!(r.error.unwrap().code, -32601);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[test]
    fn test_encode_decode_preserves_shape() {
        let original = r#"{"jsonrpc":"2.0","id":7,"method":"tools/call","params":{"name":"echo","arguments":{"msg":"hi"}}}"#;
        let message = parse_message(original).unwrap();
        let encoded = serialize_message(&message).unwrap();
        let a: serde_json::Value = serde_json::from_str(original).unwrap();
        let b: serde_json::Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(a, b);
    }
}
