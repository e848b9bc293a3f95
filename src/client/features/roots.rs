//! Client roots.
//!
//! The client advertises filesystem/workspace roots and signals changes
//! with `notifications/roots/list_changed`; each signal triggers a
//! `roots/list` round-trip whose result lands in a last-value cache.
//! Observers get deduplicated updates through a watch channel.

use tokio::sync::watch;
use tracing::debug;

use crate::error::{McpError, Result};
use crate::protocol::{ListRootsResult, Root};

/// Whether the peer supports a capability, and its value when it does
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityStatus<T> {
    Supported(T),
    NotSupported,
}

/// Last-value cache of the client's roots.
///
/// `None` until the first update arrives. Updates publish in observation
/// order; publishing a value equal to the current one is a no-op, so
/// watchers never wake up for duplicates.
#[derive(Clone)]
pub struct RootsCache {
    tx: watch::Sender<Option<CapabilityStatus<Vec<Root>>>>,
}

impl RootsCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    /// Publish an update, dropping it if nothing changed
    pub fn publish(&self, status: CapabilityStatus<Vec<Root>>) {
        let next = Some(status);
        self.tx.send_if_modified(|current| {
            if *current == next {
                debug!("roots unchanged, skipping publish");
                false
            } else {
                *current = next.clone();
                true
            }
        });
    }

    /// The latest value, if any update has arrived
    pub fn current(&self) -> Option<CapabilityStatus<Vec<Root>>> {
        self.tx.borrow().clone()
    }

    /// Subscribe to future updates
    pub fn watch(&self) -> RootsWatcher {
        RootsWatcher {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for RootsCache {
    fn default() -> Self {
        Self::new()
    }
}

/// A subscription to roots cache updates
pub struct RootsWatcher {
    rx: watch::Receiver<Option<CapabilityStatus<Vec<Root>>>>,
}

impl RootsWatcher {
    /// The value visible to this watcher right now
    pub fn current(&self) -> Option<CapabilityStatus<Vec<Root>>> {
        self.rx.borrow().clone()
    }

    /// Wait for the next update. Returns `None` once the session is gone.
    pub async fn changed(&mut self) -> Option<CapabilityStatus<Vec<Root>>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

impl crate::client::ClientHandle {
    /// Fetch the client's current roots.
    ///
    /// Requires the client to have advertised the `roots` capability.
    pub async fn list_roots(&self) -> Result<Vec<Root>> {
        let client = self
            .core
            .client_info()
            .await
            .ok_or_else(|| McpError::Protocol("session not initialized".to_string()))?;

        if client.capabilities.roots.is_none() {
            return Err(McpError::CapabilityNotSupported("roots".to_string()));
        }

        let result = self.core.request("roots/list", None).await?;
        let parsed: ListRootsResult = serde_json::from_value(result)?;
        Ok(parsed.roots)
    }

    /// Subscribe to the deduplicated roots cache
    pub fn watch_roots(&self) -> RootsWatcher {
        self.roots.watch()
    }

    /// The latest cached roots value
    pub fn current_roots(&self) -> Option<CapabilityStatus<Vec<Root>>> {
        self.roots.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(uri: &str) -> Root {
        Root {
            uri: uri.to_string(),
            name: None,
        }
    }

    #[tokio::test]
    async fn test_publish_and_watch() {
        let cache = RootsCache::new();
        assert!(cache.current().is_none());

        let mut watcher = cache.watch();
        cache.publish(CapabilityStatus::Supported(vec![root("file:///a")]));

        let update = watcher.changed().await.unwrap();
        assert_eq!(
            update,
            CapabilityStatus::Supported(vec![root("file:///a")])
        );
    }

    #[tokio::test]
    async fn test_duplicate_updates_conflate() {
        let cache = RootsCache::new();
        cache.publish(CapabilityStatus::Supported(vec![root("file:///a")]));

        let mut watcher = cache.watch();
        // Same value again: watcher must not wake
        cache.publish(CapabilityStatus::Supported(vec![root("file:///a")]));
        cache.publish(CapabilityStatus::Supported(vec![root("file:///b")]));

        let update = watcher.changed().await.unwrap();
        assert_eq!(
            update,
            CapabilityStatus::Supported(vec![root("file:///b")])
        );
    }

    #[tokio::test]
    async fn test_not_supported_is_a_value() {
        let cache = RootsCache::new();
        cache.publish(CapabilityStatus::NotSupported);
        assert_eq!(cache.current(), Some(CapabilityStatus::NotSupported));
    }
}
