//! Session state machine and outbound plumbing.
//!
//! One `SessionCore` per connected client. It owns the lifecycle state,
//! the pending map correlating outbound requests with their responses,
//! the liveness ping task, and the disconnect event. Registries and
//! dispatch live in the server layer; everything that touches the
//! transport directly funnels through here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{McpError, Result, TransportError};
use crate::protocol::{
    validation, AnyMessage, ClientInfo, Implementation, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, RequestId, ServerCapabilities,
};
use crate::transport::Transport;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Connecting,
    Ready,
    Closing,
    Closed,
}

/// Identity and liveness settings for one session
pub struct SessionOptions {
    pub server_info: Implementation,
    pub instructions: Option<String>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
}

/// Shared core of a server session
pub struct SessionCore {
    options: SessionOptions,
    capabilities: RwLock<ServerCapabilities>,
    client: RwLock<Option<ClientInfo>>,
    state: RwLock<SessionState>,
    transport: Arc<dyn Transport>,

    /// Outbound requests awaiting their correlated response
    pending: Mutex<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
    next_id: AtomicI64,

    /// Inbound requests currently being serviced
    active: Mutex<HashMap<RequestId, Instant>>,

    disconnect_tx: watch::Sender<bool>,
    ping_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionCore {
    pub fn new(
        options: SessionOptions,
        capabilities: ServerCapabilities,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (disconnect_tx, _) = watch::channel(false);

        Self {
            options,
            capabilities: RwLock::new(capabilities),
            client: RwLock::new(None),
            state: RwLock::new(SessionState::New),
            transport,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            active: Mutex::new(HashMap::new()),
            disconnect_tx,
            ping_task: Mutex::new(None),
        }
    }

    /// Server identity advertised in the handshake
    pub fn server_info(&self) -> &Implementation {
        &self.options.server_info
    }

    /// Optional instructions surfaced in the initialize result
    pub fn instructions(&self) -> Option<&str> {
        self.options.instructions.as_deref()
    }

    /// The underlying transport
    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        *self.state.read().await
    }

    pub(crate) async fn set_state(&self, state: SessionState) {
        debug!("session state -> {:?}", state);
        *self.state.write().await = state;
    }

    /// Snapshot of the advertised capabilities
    pub async fn capabilities(&self) -> ServerCapabilities {
        self.capabilities.read().await.clone()
    }

    /// Client identity, populated by the handshake
    pub async fn client_info(&self) -> Option<ClientInfo> {
        self.client.read().await.clone()
    }

    pub(crate) async fn set_client_info(&self, info: ClientInfo) {
        *self.client.write().await = Some(info);
    }

    /// Issue an outbound request and await its correlated response
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if matches!(
            self.state().await,
            SessionState::Closing | SessionState::Closed
        ) {
            return Err(McpError::ClientDisconnected);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let request = JsonRpcRequest::new(id.clone(), method, params);
        debug!("outbound request {} (id {})", method, id);
        if let Err(e) = self.transport.send(AnyMessage::Request(request)).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        // Sender dropped means the session shut down underneath us
        let response = rx.await.map_err(|_| McpError::ClientDisconnected)?;

        match (response.result, response.error) {
            (Some(result), _) => Ok(result),
            (None, Some(error)) => Err(McpError::internal_error(format!(
                "{} failed with code {}: {}",
                method, error.code, error.message
            ))),
            (None, None) => Ok(Value::Null),
        }
    }

    /// Send a one-way notification to the client
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        if matches!(
            self.state().await,
            SessionState::Closing | SessionState::Closed
        ) {
            return Err(McpError::ClientDisconnected);
        }

        self.transport
            .send(AnyMessage::Notification(JsonRpcNotification::new(
                method, params,
            )))
            .await
    }

    /// Write a response to an inbound request
    pub(crate) async fn respond(&self, response: JsonRpcResponse) {
        if let Err(e) = self.transport.send(AnyMessage::Response(response)).await {
            warn!("failed to write response: {}", e);
        }
    }

    /// Route an inbound response to the outbound request awaiting it
    pub(crate) async fn resolve_response(&self, response: JsonRpcResponse) {
        if let Err(e) = validation::validate_response(&response) {
            warn!("dropping malformed response: {}", e);
            return;
        }

        let sender = self.pending.lock().await.remove(&response.id);
        match sender {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!("response for unknown request id {}", response.id),
        }
    }

    /// Record an inbound request as in flight
    pub(crate) async fn track_request(&self, id: &RequestId) {
        self.active.lock().await.insert(id.clone(), Instant::now());
    }

    /// Mark an inbound request as finished
    pub(crate) async fn finish_request(&self, id: &RequestId) {
        self.active.lock().await.remove(id);
    }

    /// Observe a cancellation for an in-flight request.
    ///
    /// The entry is dropped from the in-flight map; the running handler is
    /// not interrupted.
    pub(crate) async fn cancel_request(&self, id: &RequestId) {
        if self.active.lock().await.remove(id).is_some() {
            info!("request {} cancelled by client", id);
        } else {
            debug!("cancellation for unknown request id {}", id);
        }
    }

    /// One liveness round-trip, bounded by the configured timeout
    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(self.options.ping_timeout, self.request("ping", None))
            .await
            .map_err(|_| {
                McpError::Transport(TransportError::ConnectionLost("ping timed out".to_string()))
            })??;
        Ok(())
    }

    /// Start the background ping task
    pub(crate) async fn start_ping(self: &Arc<Self>) {
        let core = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticks = tokio::time::interval(core.options.ping_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval fires immediately; the handshake already proved liveness
            ticks.tick().await;

            loop {
                ticks.tick().await;
                match core.ping().await {
                    Ok(()) => debug!("ping ok"),
                    Err(e) => {
                        warn!("ping failed, disconnecting: {}", e);
                        core.shutdown(false).await;
                        break;
                    }
                }
            }
        });

        *self.ping_task.lock().await = Some(handle);
    }

    /// Tear the session down.
    ///
    /// Safe to call from any path; only the first call acts. `abort_ping`
    /// is false when the ping task itself is the caller.
    pub(crate) async fn shutdown(&self, abort_ping: bool) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, SessionState::Closing | SessionState::Closed) {
                return;
            }
            *state = SessionState::Closing;
        }
        info!("session closing");

        if abort_ping {
            if let Some(handle) = self.ping_task.lock().await.take() {
                handle.abort();
            }
        }

        // Dropping the senders fails every in-flight outbound request
        self.pending.lock().await.clear();
        self.active.lock().await.clear();
        self.transport.close().await;

        // The disconnect event fires exactly once; send_replace stores the
        // value even when nobody subscribed yet
        self.disconnect_tx.send_replace(true);
        self.set_state(SessionState::Closed).await;
        info!("session closed");
    }

    /// Whether the disconnect event has fired
    pub fn is_disconnected(&self) -> bool {
        *self.disconnect_tx.borrow()
    }

    /// Suspend until the client disconnects
    pub async fn wait_for_disconnection(&self) {
        let mut rx = self.disconnect_tx.subscribe();
        let _ = rx.wait_for(|disconnected| *disconnected).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JSONRPC_VERSION;
    use crate::transport::ChannelTransport;

    fn options() -> SessionOptions {
        SessionOptions {
            server_info: Implementation {
                name: "s".to_string(),
                version: "1".to_string(),
            },
            instructions: None,
            ping_interval: Duration::from_secs(30),
            ping_timeout: Duration::from_millis(200),
        }
    }

    fn core_with_peer() -> (Arc<SessionCore>, ChannelTransport) {
        let (server_side, client_side) = ChannelTransport::pair(16);
        let core = Arc::new(SessionCore::new(
            options(),
            ServerCapabilities::default(),
            Arc::new(server_side),
        ));
        (core, client_side)
    }

    #[tokio::test]
    async fn test_request_response_correlation() {
        let (core, client) = core_with_peer();

        let requester = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.request("roots/list", None).await })
        };

        // The peer answers with the matching ID
        let id = match client.recv().await {
            Some(AnyMessage::Request(req)) => {
                assert_eq!(req.method, "roots/list");
                req.id
            }
            other => panic!("expected request, got {:?}", other),
        };

        let response = JsonRpcResponse::success(id, serde_json::json!({"roots": []}));
        core.resolve_response(response).await;

        let result = requester.await.unwrap().unwrap();
        assert_eq!(result, serde_json::json!({"roots": []}));
    }

    #[tokio::test]
    async fn test_error_response_surfaces() {
        let (core, client) = core_with_peer();

        let requester = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.request("roots/list", None).await })
        };

        let id = match client.recv().await {
            Some(AnyMessage::Request(req)) => req.id,
            other => panic!("expected request, got {:?}", other),
        };

        core.resolve_response(JsonRpcResponse {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(crate::error::JsonRpcError {
                code: -32601,
                message: "nope".to_string(),
                data: None,
            }),
        })
        .await;

        let err = requester.await.unwrap().unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_and_fires_once() {
        let (core, client) = core_with_peer();

        let requester = {
            let core = Arc::clone(&core);
            tokio::spawn(async move { core.request("roots/list", None).await })
        };

        // Let the request land in the pending map
        let _ = client.recv().await;

        core.shutdown(true).await;
        let err = requester.await.unwrap().unwrap_err();
        assert!(matches!(err, McpError::ClientDisconnected));

        assert_eq!(core.state().await, SessionState::Closed);
        assert!(core.is_disconnected());

        // Second shutdown is a no-op
        core.shutdown(true).await;
        assert_eq!(core.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_requests_fail_after_disconnect() {
        let (core, _client) = core_with_peer();
        core.shutdown(true).await;

        let err = core.request("roots/list", None).await.unwrap_err();
        assert!(matches!(err, McpError::ClientDisconnected));

        let err = core.notify("notifications/message", None).await.unwrap_err();
        assert!(matches!(err, McpError::ClientDisconnected));
    }

    #[tokio::test]
    async fn test_wait_for_disconnection() {
        let (core, _client) = core_with_peer();

        let waiter = {
            let core = Arc::clone(&core);
            tokio::spawn(async move {
                core.wait_for_disconnection().await;
                true
            })
        };

        core.shutdown(true).await;
        assert!(waiter.await.unwrap());

        // Already disconnected resolves immediately
        core.wait_for_disconnection().await;
    }

    #[tokio::test]
    async fn test_ping_timeout() {
        let (core, _client) = core_with_peer();
        // Nobody answers
        let err = core.ping().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
