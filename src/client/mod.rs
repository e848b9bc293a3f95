//! Outbound client API.
//!
//! [`ClientHandle`] is the server-side view of the connected client:
//! sampling, log forwarding, roots, progress, and the capability-gated
//! list-changed notifications. Handles are cheap to clone and stay valid
//! for the session lifetime; calls after disconnect fail with
//! `ClientDisconnected`.

pub mod features;

pub use features::{CapabilityStatus, RootsCache, RootsWatcher};

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::error::{McpError, Result};
use crate::protocol::{LoggingLevel, LoggingMessage, ProgressParams, ProgressToken};
use crate::server::features::{list_changed_enabled, require_capability, LoggingState};
use crate::server::session::SessionCore;

/// Server-side handle for talking back to the connected client
#[derive(Clone)]
pub struct ClientHandle {
    pub(crate) core: Arc<SessionCore>,
    pub(crate) roots: RootsCache,
    pub(crate) logging: Arc<LoggingState>,
}

impl ClientHandle {
    pub(crate) fn new(
        core: Arc<SessionCore>,
        roots: RootsCache,
        logging: Arc<LoggingState>,
    ) -> Self {
        Self {
            core,
            roots,
            logging,
        }
    }

    /// Forward a log message to the client.
    ///
    /// Requires the `logging` capability; messages below the level the
    /// client asked for via `logging/setLevel` are dropped.
    pub async fn log(
        &self,
        level: LoggingLevel,
        logger: Option<String>,
        data: serde_json::Value,
    ) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        require_capability(&capabilities, "logging")?;

        if !self.logging.should_send(level).await {
            debug!("log message below client threshold, dropping");
            return Ok(());
        }

        let message = LoggingMessage {
            level,
            logger,
            data,
        };
        self.core
            .notify(
                "notifications/message",
                Some(serde_json::to_value(&message)?),
            )
            .await
    }

    /// Notify the client that a subscribed resource changed
    pub async fn notify_resource_updated(&self, uri: &str) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        require_capability(&capabilities, "resources")?;

        self.core
            .notify(
                "notifications/resources/updated",
                Some(json!({ "uri": uri })),
            )
            .await
    }

    /// Notify the client that the resource list changed
    pub async fn notify_resource_list_changed(&self) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        if !list_changed_enabled(&capabilities, "resources") {
            return Err(McpError::CapabilityNotSupported(
                "resources.listChanged".to_string(),
            ));
        }

        self.core
            .notify("notifications/resources/list_changed", None)
            .await
    }

    /// Notify the client that the tool list changed
    pub async fn notify_tool_list_changed(&self) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        if !list_changed_enabled(&capabilities, "tools") {
            return Err(McpError::CapabilityNotSupported(
                "tools.listChanged".to_string(),
            ));
        }

        self.core
            .notify("notifications/tools/list_changed", None)
            .await
    }

    /// Notify the client that the prompt list changed
    pub async fn notify_prompt_list_changed(&self) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        if !list_changed_enabled(&capabilities, "prompts") {
            return Err(McpError::CapabilityNotSupported(
                "prompts.listChanged".to_string(),
            ));
        }

        self.core
            .notify("notifications/prompts/list_changed", None)
            .await
    }

    /// Report progress on a long-running request. Not capability-gated.
    pub async fn notify_progress(
        &self,
        token: ProgressToken,
        progress: f64,
        total: Option<f64>,
    ) -> Result<()> {
        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
        };
        self.core
            .notify("notifications/progress", Some(serde_json::to_value(&params)?))
            .await
    }

    /// Suspend until the client disconnects
    pub async fn wait_for_disconnection(&self) {
        self.core.wait_for_disconnection().await;
    }

    /// Whether the disconnect event has fired
    pub fn is_disconnected(&self) -> bool {
        self.core.is_disconnected()
    }
}
