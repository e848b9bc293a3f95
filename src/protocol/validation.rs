//! Structural validation of JSON-RPC messages.
//!
//! Checks the envelope before routing: version string, method shape, and
//! response result/error exclusivity. Body validation belongs to the
//! individual handlers.

use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION};

/// Validate a JSON-RPC request envelope
pub fn validate_request(request: &JsonRpcRequest) -> Result<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::invalid_request(format!(
            "unsupported jsonrpc version '{}'",
            request.jsonrpc
        )));
    }

    if request.method.is_empty() {
        return Err(McpError::invalid_request("empty method name"));
    }

    Ok(())
}

/// Validate a JSON-RPC notification envelope
pub fn validate_notification(notification: &JsonRpcNotification) -> Result<()> {
    if notification.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::invalid_request(format!(
            "unsupported jsonrpc version '{}'",
            notification.jsonrpc
        )));
    }

    if notification.method.is_empty() {
        return Err(McpError::invalid_request("empty method name"));
    }

    Ok(())
}

/// Validate a JSON-RPC response envelope
pub fn validate_response(response: &JsonRpcResponse) -> Result<()> {
    if response.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::invalid_request(format!(
            "unsupported jsonrpc version '{}'",
            response.jsonrpc
        )));
    }

    if response.result.is_some() && response.error.is_some() {
        return Err(McpError::invalid_request(
            "response carries both result and error",
        ));
    }

    if response.result.is_none() && response.error.is_none() {
        return Err(McpError::invalid_request(
            "response carries neither result nor error",
        ));
    }

    Ok(())
}
