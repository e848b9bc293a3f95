//! LLM sampling through the client.
//!
//! `sampling/createMessage` asks the connected client to run a model
//! generation on the server's behalf. Only available when the client
//! advertised the `sampling` capability in the handshake.

use tracing::debug;

use crate::error::{McpError, Result};
use crate::protocol::{CreateMessageRequest, CreateMessageResult};

impl crate::client::ClientHandle {
    /// Request an LLM generation from the client
    pub async fn create_message(
        &self,
        params: CreateMessageRequest,
    ) -> Result<CreateMessageResult> {
        let client = self
            .core
            .client_info()
            .await
            .ok_or_else(|| McpError::Protocol("session not initialized".to_string()))?;

        if client.capabilities.sampling.is_none() {
            return Err(McpError::CapabilityNotSupported("sampling".to_string()));
        }

        debug!("requesting sampling from client");
        let result = self
            .core
            .request(
                "sampling/createMessage",
                Some(serde_json::to_value(&params)?),
            )
            .await?;

        Ok(serde_json::from_value(result)?)
    }
}
