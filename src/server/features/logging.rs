//! Logging feature state.
//!
//! Tracks the minimum severity requested by the client through
//! `logging/setLevel`. Outbound `notifications/message` payloads below the
//! threshold are dropped.

use tokio::sync::RwLock;
use tracing::debug;

use crate::protocol::LoggingLevel;

/// Client-controlled log forwarding state
pub struct LoggingState {
    min_level: RwLock<LoggingLevel>,
}

impl LoggingState {
    pub fn new() -> Self {
        Self {
            min_level: RwLock::new(LoggingLevel::Info),
        }
    }

    /// Record the minimum level requested by the client
    pub async fn set_level(&self, level: LoggingLevel) {
        debug!("client set log level to {:?}", level);
        *self.min_level.write().await = level;
    }

    /// The current minimum level
    pub async fn min_level(&self) -> LoggingLevel {
        *self.min_level.read().await
    }

    /// Whether a message at `level` should be forwarded
    pub async fn should_send(&self, level: LoggingLevel) -> bool {
        level >= *self.min_level.read().await
    }
}

impl Default for LoggingState {
    fn default() -> Self {
        Self::new()
    }
}
