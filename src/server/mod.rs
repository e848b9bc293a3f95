//! MCP server: session loop, dispatch, and registration surface.
//!
//! [`McpServer`] owns one session over one transport. The run loop enforces
//! the handshake (the first request must be `initialize`), then services
//! requests concurrently: each one runs on its own task and the response is
//! written when the handler completes, correlated by request ID. Inbound
//! responses resolve the session's pending outbound requests; notifications
//! are routed inline.

pub mod features;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::client::{CapabilityStatus, ClientHandle, RootsCache};
use crate::config::Config;
use crate::error::{McpError, Result};
use crate::protocol::{
    validation, AnyMessage, CallToolResult, ClientInfo, CompleteRequest, CompleteResult,
    Implementation, InitializeRequest, InitializeResult, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, LoggingLevel, PaginationParams, PaginationResult, Prompt,
    ReadResourceResult, Resource, ResourceTemplate, PROTOCOL_VERSION,
};
use crate::server::features::completion::CompletionProvider;
use crate::server::features::{
    CompletionEngine, LoggingState, PromptHandler, PromptRegistry, ResourceReader,
    ResourceRegistry, TemplateReader, ToolHandler, ToolRegistry,
};
use crate::server::session::{SessionCore, SessionOptions, SessionState};
use crate::transport::Transport;

/// Hook run against the initialize request before the handshake completes.
/// An error fails the whole session.
pub type InitializeHook = Arc<dyn Fn(&InitializeRequest) -> Result<()> + Send + Sync>;

/// Page size applied by the list endpoints when a cursor is supplied
const LIST_PAGE_SIZE: usize = 50;

/// An MCP server bound to one client session
#[derive(Clone)]
pub struct McpServer {
    core: Arc<SessionCore>,
    tools: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    prompts: Arc<PromptRegistry>,
    completion: Arc<CompletionEngine>,
    logging: Arc<LoggingState>,
    roots: RootsCache,
    initialize_hook: Option<InitializeHook>,
}

impl McpServer {
    /// Create a server from configuration and a transport
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let capabilities = features::capabilities_from(&config.features);
        let options = SessionOptions {
            server_info: Implementation {
                name: config.server.name.clone(),
                version: config.server.version.clone(),
            },
            instructions: config.server.instructions.clone(),
            ping_interval: config.server.ping_interval(),
            ping_timeout: config.server.ping_timeout(),
        };

        let core = Arc::new(SessionCore::new(options, capabilities, transport));
        let tools = Arc::new(ToolRegistry::new());
        let resources = Arc::new(ResourceRegistry::new());
        let prompts = Arc::new(PromptRegistry::new());
        let completion = Arc::new(CompletionEngine::new(prompts.clone(), resources.clone()));

        Ok(Self {
            core,
            tools,
            resources,
            prompts,
            completion,
            logging: Arc::new(LoggingState::new()),
            roots: RootsCache::new(),
            initialize_hook: None,
        })
    }

    /// Current session state
    pub async fn state(&self) -> SessionState {
        self.core.state().await
    }

    /// Client identity and capabilities, available once the handshake ran
    pub async fn client_info(&self) -> Option<ClientInfo> {
        self.core.client_info().await
    }

    /// Handle for talking back to the connected client
    pub fn client(&self) -> ClientHandle {
        ClientHandle::new(
            self.core.clone(),
            self.roots.clone(),
            self.logging.clone(),
        )
    }

    // ---- registration surface -------------------------------------------

    /// Register a tool. Requires the `tools` capability; emits
    /// `notifications/tools/list_changed` once the session is ready and the
    /// capability advertises it.
    pub async fn register_tool(&self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "tools")?;

        self.tools.register(handler).await?;
        self.emit_list_changed("tools", "notifications/tools/list_changed")
            .await;
        Ok(())
    }

    /// Atomically replace the whole tool set.
    ///
    /// Requires `tools.listChanged == true`, since the client can only
    /// learn about the swap through the notification.
    pub async fn update_tools(&self, handlers: Vec<Arc<dyn ToolHandler>>) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "tools")?;
        if !features::list_changed_enabled(&capabilities, "tools") {
            return Err(McpError::CapabilityNotSupported(
                "tools.listChanged".to_string(),
            ));
        }

        self.tools.replace_all(handlers).await?;
        self.emit_list_changed("tools", "notifications/tools/list_changed")
            .await;
        Ok(())
    }

    /// Register a static resource. Requires the `resources` capability.
    pub async fn register_resource(
        &self,
        descriptor: Resource,
        reader: Arc<dyn ResourceReader>,
    ) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "resources")?;

        self.resources.register_resource(descriptor, reader).await?;
        self.emit_list_changed("resources", "notifications/resources/list_changed")
            .await;
        Ok(())
    }

    /// Register a resource template with per-variable completion providers.
    /// Requires the `resources` capability.
    pub async fn register_template(
        &self,
        descriptor: ResourceTemplate,
        reader: Arc<dyn TemplateReader>,
        completions: HashMap<String, Arc<dyn CompletionProvider>>,
    ) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "resources")?;

        self.resources
            .register_template(descriptor, reader, completions)
            .await?;
        self.emit_list_changed("resources", "notifications/resources/list_changed")
            .await;
        Ok(())
    }

    /// Register a prompt with per-argument completion providers.
    /// Requires the `prompts` capability.
    pub async fn register_prompt(
        &self,
        prompt: Prompt,
        handler: Arc<dyn PromptHandler>,
        completions: HashMap<String, Arc<dyn CompletionProvider>>,
    ) -> Result<()> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "prompts")?;

        self.prompts.register(prompt, handler, completions).await?;
        self.emit_list_changed("prompts", "notifications/prompts/list_changed")
            .await;
        Ok(())
    }

    /// Register a prompt described by a JSON argument schema.
    ///
    /// The argument list comes from the schema's `properties`/`required`;
    /// fields marked `x-completable: true` are expected to have an entry in
    /// `completions`, and a marker without a provider is logged.
    pub async fn register_prompt_with_schema(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        arguments_schema: &Value,
        handler: Arc<dyn PromptHandler>,
        completions: HashMap<String, Arc<dyn CompletionProvider>>,
    ) -> Result<()> {
        let name = name.into();

        for field in crate::schema::completable_fields(arguments_schema) {
            if !completions.contains_key(&field) {
                warn!(
                    "prompt '{}' marks '{}' completable but supplies no provider",
                    name, field
                );
            }
        }

        let prompt = Prompt {
            name,
            description,
            arguments: Some(crate::schema::prompt_arguments(arguments_schema)),
        };

        self.register_prompt(prompt, handler, completions).await
    }

    /// Emit a list-changed notification after a registry mutation commits.
    /// Nothing is sent before the handshake or when the capability bit is
    /// off.
    async fn emit_list_changed(&self, group: &str, method: &str) {
        if self.core.state().await != SessionState::Ready {
            return;
        }

        let capabilities = self.core.capabilities().await;
        if !features::list_changed_enabled(&capabilities, group) {
            return;
        }

        if let Err(e) = self.core.notify(method, None).await {
            warn!("failed to send {}: {}", method, e);
        }
    }

    // ---- session loop ---------------------------------------------------

    /// Run the session to completion.
    ///
    /// Consumes inbound messages until the peer disconnects. Returns an
    /// error if the handshake fails; a clean peer EOF returns `Ok`.
    pub async fn run(&self) -> Result<()> {
        if self.core.state().await != SessionState::New {
            return Err(McpError::Protocol("session already started".to_string()));
        }
        self.core.set_state(SessionState::Connecting).await;
        info!("session started, awaiting initialize");

        while let Some(message) = self.core.transport().recv().await {
            match message {
                AnyMessage::Request(request) => {
                    if let Err(e) = validation::validate_request(&request) {
                        self.core
                            .respond(JsonRpcResponse::error(
                                request.id.clone(),
                                e.to_json_rpc_error(),
                            ))
                            .await;
                        continue;
                    }

                    match self.core.state().await {
                        SessionState::Connecting => {
                            if let Err(e) = self.handle_handshake(request).await {
                                self.core.shutdown(true).await;
                                return Err(e);
                            }
                        }
                        SessionState::Ready => {
                            self.core.track_request(&request.id).await;
                            let server = self.clone();
                            tokio::spawn(async move {
                                let id = request.id.clone();
                                let response = server.dispatch(request).await;
                                server.core.respond(response).await;
                                server.core.finish_request(&id).await;
                            });
                        }
                        _ => {
                            let e = McpError::ClientDisconnected;
                            self.core
                                .respond(JsonRpcResponse::error(
                                    request.id,
                                    e.to_json_rpc_error(),
                                ))
                                .await;
                        }
                    }
                }
                AnyMessage::Response(response) => self.core.resolve_response(response).await,
                AnyMessage::Notification(notification) => {
                    self.handle_notification(notification).await
                }
            }
        }

        info!("transport reached EOF");
        self.core.shutdown(true).await;
        Ok(())
    }

    /// Handle the one request allowed before Ready. Anything other than a
    /// clean `initialize` fails the whole session.
    async fn handle_handshake(&self, request: JsonRpcRequest) -> Result<()> {
        if request.method != "initialize" {
            let e = McpError::Protocol(format!(
                "'{}' received before initialize",
                request.method
            ));
            error!("{}", e);
            self.core
                .respond(JsonRpcResponse::error(request.id, e.to_json_rpc_error()))
                .await;
            return Err(e);
        }

        match self.handle_initialize(&request).await {
            Ok(result) => {
                self.core
                    .respond(JsonRpcResponse::success(request.id, result))
                    .await;
                self.core.set_state(SessionState::Ready).await;
                self.core.start_ping().await;
                info!("handshake complete, session ready");
                Ok(())
            }
            Err(e) => {
                error!("initialize failed: {}", e);
                self.core
                    .respond(JsonRpcResponse::error(request.id, e.to_json_rpc_error()))
                    .await;
                Err(e)
            }
        }
    }

    async fn handle_initialize(&self, request: &JsonRpcRequest) -> Result<Value> {
        let params = request
            .params
            .as_ref()
            .ok_or_else(|| McpError::invalid_params("initialize requires parameters"))?;

        let init: InitializeRequest = serde_json::from_value(params.clone())
            .map_err(|e| McpError::invalid_params(format!("invalid initialize parameters: {}", e)))?;

        if init.protocol_version != PROTOCOL_VERSION {
            warn!(
                "client requested protocol version {}, server speaks {}",
                init.protocol_version, PROTOCOL_VERSION
            );
        }

        if let Some(hook) = &self.initialize_hook {
            hook(&init)?;
        }

        if init.capabilities.roots.is_none() {
            self.roots.publish(CapabilityStatus::NotSupported);
        }

        self.core
            .set_client_info(ClientInfo {
                info: init.client_info.clone(),
                capabilities: init.capabilities.clone(),
            })
            .await;
        info!(
            "client connected: {} {}",
            init.client_info.name, init.client_info.version
        );

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: self.core.capabilities().await,
            server_info: self.core.server_info().clone(),
            instructions: self.core.instructions().map(String::from),
        };

        Ok(serde_json::to_value(result)?)
    }

    // ---- dispatch -------------------------------------------------------

    /// Route one post-handshake request to its handler and fold the outcome
    /// into exactly one response.
    async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        debug!("handling request: {} (id {})", request.method, request.id);
        let id = request.id.clone();

        let result = match request.method.as_str() {
            "initialize" => Err(McpError::Protocol(
                "initialize received after handshake".to_string(),
            )),
            "ping" => Ok(json!({})),

            "tools/list" => self.handle_tools_list(&request).await,
            "tools/call" => self.handle_tools_call(&request).await,

            "resources/list" => self.handle_resources_list(&request).await,
            "resources/templates/list" => self.handle_templates_list(&request).await,
            "resources/read" => self.handle_resources_read(&request).await,
            "resources/subscribe" => self.handle_resources_subscribe(&request, true).await,
            "resources/unsubscribe" => self.handle_resources_subscribe(&request, false).await,

            "prompts/list" => self.handle_prompts_list(&request).await,
            "prompts/get" => self.handle_prompts_get(&request).await,

            "completion/complete" => self.handle_completion(&request).await,
            "logging/setLevel" => self.handle_set_level(&request).await,

            other => Err(McpError::method_not_found(other)),
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(e) => {
                error!("request {} failed: {}", request.method, e);
                JsonRpcResponse::error(id, e.to_json_rpc_error())
            }
        }
    }

    async fn handle_tools_list(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "tools")?;

        let (tools, page) = paginate(self.tools.list().await, pagination_of(request));
        Ok(listing("tools", serde_json::to_value(tools)?, page))
    }

    async fn handle_tools_call(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "tools")?;

        let params = request
            .params
            .as_ref()
            .ok_or_else(|| McpError::invalid_params("tools/call requires parameters"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing 'name' parameter"))?;
        let arguments = params.get("arguments").cloned();

        // A missing tool is a protocol failure; everything the handler does
        // wrong is a tool-semantic failure reported inside the result.
        let outcome = match self.tools.call(name, arguments).await {
            Ok(content) => CallToolResult::success(content),
            Err(e @ McpError::ToolNotFound(_)) => return Err(e),
            Err(e) => {
                warn!("tool '{}' failed: {}", name, e);
                CallToolResult::error_text(e.to_string())
            }
        };

        Ok(serde_json::to_value(outcome)?)
    }

    async fn handle_resources_list(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "resources")?;

        let (resources, page) = paginate(self.resources.list().await, pagination_of(request));
        Ok(listing("resources", serde_json::to_value(resources)?, page))
    }

    async fn handle_templates_list(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "resources")?;

        let (templates, page) =
            paginate(self.resources.list_templates().await, pagination_of(request));
        Ok(listing(
            "resourceTemplates",
            serde_json::to_value(templates)?,
            page,
        ))
    }

    async fn handle_resources_read(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "resources")?;

        let uri = request
            .params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing 'uri' parameter"))?;

        let contents = self.resources.read(uri).await?;
        Ok(serde_json::to_value(ReadResourceResult { contents })?)
    }

    async fn handle_resources_subscribe(
        &self,
        request: &JsonRpcRequest,
        subscribe: bool,
    ) -> Result<Value> {
        let capabilities = self.core.capabilities().await;
        features::require_capability(&capabilities, "resources")?;

        let supports_subscribe = capabilities
            .resources
            .as_ref()
            .and_then(|r| r.subscribe)
            .unwrap_or(false);
        if !supports_subscribe {
            return Err(McpError::CapabilityNotSupported(
                "resources.subscribe".to_string(),
            ));
        }

        let uri = request
            .params
            .as_ref()
            .and_then(|p| p.get("uri"))
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing 'uri' parameter"))?;

        if subscribe {
            self.resources.subscribe(uri).await;
        } else {
            self.resources.unsubscribe(uri).await;
        }

        Ok(json!({}))
    }

    async fn handle_prompts_list(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "prompts")?;

        let (prompts, page) = paginate(self.prompts.list().await, pagination_of(request));
        Ok(listing("prompts", serde_json::to_value(prompts)?, page))
    }

    async fn handle_prompts_get(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "prompts")?;

        let params = request
            .params
            .as_ref()
            .ok_or_else(|| McpError::invalid_params("prompts/get requires parameters"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::invalid_params("missing 'name' parameter"))?;
        let arguments = params.get("arguments").cloned();

        let result = self.prompts.execute(name, arguments).await?;
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_completion(&self, request: &JsonRpcRequest) -> Result<Value> {
        let params = request
            .params
            .as_ref()
            .ok_or_else(|| McpError::invalid_params("completion/complete requires parameters"))?;

        let complete: CompleteRequest = serde_json::from_value(params.clone())
            .map_err(|e| McpError::invalid_params(format!("invalid completion request: {}", e)))?;

        let completion = self
            .completion
            .complete(&complete.reference, &complete.argument)
            .await?;

        Ok(serde_json::to_value(CompleteResult { completion })?)
    }

    async fn handle_set_level(&self, request: &JsonRpcRequest) -> Result<Value> {
        features::require_capability(&self.core.capabilities().await, "logging")?;

        let level: LoggingLevel = request
            .params
            .as_ref()
            .and_then(|p| p.get("level"))
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| McpError::invalid_params("missing or invalid 'level' parameter"))?;

        self.logging.set_level(level).await;
        Ok(json!({}))
    }

    // ---- notifications --------------------------------------------------

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        if let Err(e) = validation::validate_notification(&notification) {
            warn!("dropping malformed notification: {}", e);
            return;
        }

        match notification.method.as_str() {
            "notifications/initialized" => {
                debug!("client reports initialized");
            }
            "notifications/cancelled" => {
                let id = notification
                    .params
                    .as_ref()
                    .and_then(|p| p.get("requestId"))
                    .cloned()
                    .and_then(|v| serde_json::from_value(v).ok());
                match id {
                    Some(id) => self.core.cancel_request(&id).await,
                    None => warn!("cancellation without a requestId"),
                }
            }
            "notifications/progress" => {
                debug!("progress notification received");
            }
            "notifications/roots/list_changed" => {
                // Round-trip on a separate task; the reply comes back
                // through this loop.
                let handle = self.client();
                let roots = self.roots.clone();
                tokio::spawn(async move {
                    match handle.list_roots().await {
                        Ok(list) => roots.publish(CapabilityStatus::Supported(list)),
                        Err(McpError::CapabilityNotSupported(_)) => {
                            roots.publish(CapabilityStatus::NotSupported)
                        }
                        Err(e) => warn!("roots/list round-trip failed: {}", e),
                    }
                });
            }
            other => {
                warn!("unknown notification method: {}", other);
            }
        }
    }
}

/// Builder for [`McpServer`]
pub struct McpServerBuilder {
    config: Config,
    initialize_hook: Option<InitializeHook>,
}

impl McpServerBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            initialize_hook: None,
        }
    }

    /// Use a full configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set the server name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.server.name = name.into();
        self
    }

    /// Set the server version
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.server.version = version.into();
        self
    }

    /// Set the instructions surfaced in the initialize result
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.server.instructions = Some(instructions.into());
        self
    }

    /// Install a hook run against the initialize request
    pub fn on_initialize<F>(mut self, hook: F) -> Self
    where
        F: Fn(&InitializeRequest) -> Result<()> + Send + Sync + 'static,
    {
        self.initialize_hook = Some(Arc::new(hook));
        self
    }

    /// Build the server over the given transport
    pub fn build(self, transport: Arc<dyn Transport>) -> Result<McpServer> {
        let mut server = McpServer::new(self.config, transport)?;
        server.initialize_hook = self.initialize_hook;
        Ok(server)
    }
}

impl Default for McpServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Read pagination parameters off a request, tolerating their absence
fn pagination_of(request: &JsonRpcRequest) -> Option<PaginationParams> {
    request
        .params
        .as_ref()
        .and_then(|p| serde_json::from_value(p.clone()).ok())
}

/// Index-cursor pagination over an already-sorted snapshot
fn paginate<T>(items: Vec<T>, params: Option<PaginationParams>) -> (Vec<T>, PaginationResult) {
    let start = params
        .and_then(|p| p.cursor)
        .and_then(|c| c.parse::<usize>().ok())
        .unwrap_or(0);

    if start >= items.len() {
        return (Vec::new(), PaginationResult { next_cursor: None });
    }

    let end = usize::min(start + LIST_PAGE_SIZE, items.len());
    let next_cursor = (end < items.len()).then(|| end.to_string());
    let page = items
        .into_iter()
        .skip(start)
        .take(LIST_PAGE_SIZE)
        .collect();

    (page, PaginationResult { next_cursor })
}

/// Assemble a list response body with its optional continuation cursor
fn listing(key: &str, items: Value, page: PaginationResult) -> Value {
    let mut body = json!({ key: items });
    if let Some(cursor) = page.next_cursor {
        body["nextCursor"] = Value::String(cursor);
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Content, GetPromptResult, PromptMessage, Role};
    use crate::server::features::{FnTool, StaticCompletions, TemplatePrompt};
    use crate::transport::ChannelTransport;
    use serde::Deserialize;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    struct TestClient {
        transport: ChannelTransport,
    }

    impl TestClient {
        async fn send_request(&self, id: i64, method: &str, params: Option<Value>) {
            self.transport
                .send(AnyMessage::Request(JsonRpcRequest::new(id, method, params)))
                .await
                .unwrap();
        }

        async fn send_notification(&self, method: &str, params: Option<Value>) {
            self.transport
                .send(AnyMessage::Notification(JsonRpcNotification::new(
                    method, params,
                )))
                .await
                .unwrap();
        }

        async fn send_response(&self, response: JsonRpcResponse) {
            self.transport
                .send(AnyMessage::Response(response))
                .await
                .unwrap();
        }

        async fn recv(&self) -> AnyMessage {
            tokio::time::timeout(Duration::from_secs(5), self.transport.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("transport closed")
        }

        /// Next response, skipping interleaved notifications
        async fn response(&self) -> JsonRpcResponse {
            loop {
                match self.recv().await {
                    AnyMessage::Response(response) => return response,
                    AnyMessage::Notification(n) => {
                        debug!("skipping notification {}", n.method)
                    }
                    AnyMessage::Request(r) => panic!("unexpected server request {}", r.method),
                }
            }
        }

        /// Next notification, skipping interleaved responses
        async fn notification(&self) -> JsonRpcNotification {
            loop {
                match self.recv().await {
                    AnyMessage::Notification(notification) => return notification,
                    AnyMessage::Response(_) => continue,
                    AnyMessage::Request(r) => panic!("unexpected server request {}", r.method),
                }
            }
        }

        /// Next server-originated request
        async fn incoming_request(&self) -> JsonRpcRequest {
            loop {
                match self.recv().await {
                    AnyMessage::Request(request) => return request,
                    _ => continue,
                }
            }
        }

        async fn initialize(&self) -> JsonRpcResponse {
            self.initialize_with(json!({"sampling": {}, "roots": {"listChanged": true}}))
                .await
        }

        async fn initialize_with(&self, capabilities: Value) -> JsonRpcResponse {
            self.send_request(
                1,
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": capabilities,
                    "clientInfo": {"name": "c", "version": "1"}
                })),
            )
            .await;
            self.response().await
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.server.name = "s".to_string();
        config.server.version = "1".to_string();
        config
    }

    fn spawn_server(config: Config) -> (McpServer, TestClient, JoinHandle<Result<()>>) {
        let (server_side, client_side) = ChannelTransport::pair(32);
        let server = McpServerBuilder::new()
            .config(config)
            .build(Arc::new(server_side))
            .unwrap();

        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };

        (
            server,
            TestClient {
                transport: client_side,
            },
            task,
        )
    }

    #[derive(Deserialize)]
    struct EchoArgs {
        msg: String,
    }

    fn echo_tool() -> Arc<dyn ToolHandler> {
        Arc::new(FnTool::new(
            "echo",
            Some("Echo back the provided message".to_string()),
            json!({
                "type": "object",
                "properties": { "msg": { "type": "string" } },
                "required": ["msg"]
            }),
            |args: EchoArgs| async move { Ok(vec![Content::text(args.msg)]) },
        ))
    }

    struct JoinBindings;

    #[async_trait::async_trait]
    impl TemplateReader for JoinBindings {
        async fn read(
            &self,
            uri: &str,
            bindings: HashMap<String, String>,
        ) -> Result<Vec<crate::protocol::ResourceContents>> {
            let id = bindings.get("id").cloned().unwrap_or_default();
            let post = bindings.get("post").cloned().unwrap_or_default();
            Ok(vec![crate::protocol::ResourceContents::text(
                uri,
                format!("{}/{}", id, post),
            )])
        }
    }

    struct NoopPrompt;

    #[async_trait::async_trait]
    impl PromptHandler for NoopPrompt {
        async fn execute(&self, _arguments: Option<Value>) -> Result<GetPromptResult> {
            Ok(GetPromptResult {
                description: None,
                messages: vec![PromptMessage {
                    role: Role::User,
                    content: Content::text("ok"),
                }],
            })
        }
    }

    struct ManySuggestions(usize);

    #[async_trait::async_trait]
    impl CompletionProvider for ManySuggestions {
        async fn complete(&self, _value: &str) -> Result<Vec<String>> {
            Ok((0..self.0).map(|i| format!("s{}", i)).collect())
        }
    }

    #[tokio::test]
    async fn test_handshake() {
        let (server, client, _task) = spawn_server(test_config());

        let response = client.initialize().await;
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], json!(PROTOCOL_VERSION));
        assert_eq!(result["serverInfo"], json!({"name": "s", "version": "1"}));
        assert!(result["capabilities"]["tools"].is_object());

        client
            .send_notification("notifications/initialized", None)
            .await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.state().await, SessionState::Ready);

        let info = server.client_info().await.unwrap();
        assert_eq!(info.info.name, "c");
        assert!(info.capabilities.sampling.is_some());
    }

    #[tokio::test]
    async fn test_request_before_initialize_fails_session() {
        let (server, client, task) = spawn_server(test_config());

        client.send_request(1, "tools/list", None).await;

        let response = client.response().await;
        assert!(response.error.is_some());

        let outcome = task.await.unwrap();
        assert!(outcome.is_err());
        assert_eq!(server.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_initialize_hook_failure_fails_session() {
        let (server_side, client_side) = ChannelTransport::pair(32);
        let server = McpServerBuilder::new()
            .config(test_config())
            .on_initialize(|_| Err(McpError::invalid_request("not welcome")))
            .build(Arc::new(server_side))
            .unwrap();

        let task = {
            let server = server.clone();
            tokio::spawn(async move { server.run().await })
        };
        let client = TestClient {
            transport: client_side,
        };

        let response = client.initialize().await;
        assert!(response.error.unwrap().message.contains("not welcome"));

        assert!(task.await.unwrap().is_err());
        assert_eq!(server.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_initialize_after_handshake_rejected() {
        let (_server, client, _task) = spawn_server(test_config());
        client.initialize().await;

        client
            .send_request(
                2,
                "initialize",
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "c", "version": "1"}
                })),
            )
            .await;

        let response = client.response().await;
        assert!(response.error.unwrap().message.contains("after handshake"));
    }

    #[tokio::test]
    async fn test_echo_tool_dispatch() {
        let (server, client, _task) = spawn_server(test_config());
        server.register_tool(echo_tool()).await.unwrap();
        client.initialize().await;

        client
            .send_request(
                2,
                "tools/call",
                Some(json!({"name": "echo", "arguments": {"msg": "hi"}})),
            )
            .await;

        let result = client.response().await.result.unwrap();
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"], json!([{"type": "text", "text": "hi"}]));
    }

    #[tokio::test]
    async fn test_tool_failure_becomes_is_error_result() {
        let (server, client, _task) = spawn_server(test_config());
        let failing: Arc<dyn ToolHandler> = Arc::new(FnTool::new(
            "broken",
            None,
            json!({"type": "object"}),
            |_: Value| async move {
                Err::<Vec<Content>, _>(McpError::internal_error("boom"))
            },
        ));
        server.register_tool(failing).await.unwrap();
        client.initialize().await;

        client
            .send_request(2, "tools/call", Some(json!({"name": "broken"})))
            .await;
        let result = client.response().await.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("boom"));

        // A missing tool is a protocol error, not an isError result
        client
            .send_request(3, "tools/call", Some(json!({"name": "missing"})))
            .await;
        let response = client.response().await;
        assert!(response.error.unwrap().message.contains("missing"));
    }

    #[tokio::test]
    async fn test_tools_list_snapshot() {
        let (server, client, _task) = spawn_server(test_config());
        server.register_tool(echo_tool()).await.unwrap();
        client.initialize().await;

        client.send_request(2, "tools/list", None).await;
        let result = client.response().await.result.unwrap();
        let tools = result["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["name"], json!("echo"));
    }

    #[tokio::test]
    async fn test_resource_read_via_template() {
        let (server, client, _task) = spawn_server(test_config());
        server
            .register_template(
                ResourceTemplate {
                    uri_template: "/users/{id}/posts/{post}".to_string(),
                    name: "user-posts".to_string(),
                    description: None,
                    mime_type: None,
                },
                Arc::new(JoinBindings),
                HashMap::new(),
            )
            .await
            .unwrap();
        client.initialize().await;

        client
            .send_request(
                2,
                "resources/read",
                Some(json!({"uri": "/users/42/posts/7"})),
            )
            .await;
        let result = client.response().await.result.unwrap();
        assert_eq!(result["contents"][0]["text"], json!("42/7"));

        client
            .send_request(3, "resources/read", Some(json!({"uri": "/nowhere"})))
            .await;
        let response = client.response().await;
        assert!(response
            .error
            .unwrap()
            .message
            .contains("Resource not found"));
    }

    #[tokio::test]
    async fn test_templates_list() {
        let (server, client, _task) = spawn_server(test_config());
        server
            .register_template(
                ResourceTemplate {
                    uri_template: "/users/{id}".to_string(),
                    name: "users".to_string(),
                    description: None,
                    mime_type: None,
                },
                Arc::new(JoinBindings),
                HashMap::new(),
            )
            .await
            .unwrap();
        client.initialize().await;

        client.send_request(2, "resources/templates/list", None).await;
        let result = client.response().await.result.unwrap();
        assert_eq!(
            result["resourceTemplates"][0]["uriTemplate"],
            json!("/users/{id}")
        );
    }

    #[tokio::test]
    async fn test_prompt_get() {
        let (server, client, _task) = spawn_server(test_config());
        let handler =
            TemplatePrompt::new("greeting", None, "Hello, {{name}}!").unwrap();
        let prompt = handler.descriptor(&json!({
            "type": "object",
            "properties": { "name": { "type": "string" } },
            "required": ["name"]
        }));
        server
            .register_prompt(prompt, Arc::new(handler), HashMap::new())
            .await
            .unwrap();
        client.initialize().await;

        client
            .send_request(
                2,
                "prompts/get",
                Some(json!({"name": "greeting", "arguments": {"name": "Ada"}})),
            )
            .await;
        let result = client.response().await.result.unwrap();
        assert_eq!(
            result["messages"][0]["content"]["text"],
            json!("Hello, Ada!")
        );
    }

    #[tokio::test]
    async fn test_completion_cap_through_dispatch() {
        let (server, client, _task) = spawn_server(test_config());

        let mut completions: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        completions.insert("topic".to_string(), Arc::new(ManySuggestions(150)));
        server
            .register_prompt(
                Prompt {
                    name: "research".to_string(),
                    description: None,
                    arguments: None,
                },
                Arc::new(NoopPrompt),
                completions,
            )
            .await
            .unwrap();
        client.initialize().await;

        client
            .send_request(
                2,
                "completion/complete",
                Some(json!({
                    "ref": {"type": "ref/prompt", "name": "research"},
                    "argument": {"name": "topic", "value": ""}
                })),
            )
            .await;

        let result = client.response().await.result.unwrap();
        assert_eq!(result["completion"]["values"].as_array().unwrap().len(), 100);
        assert_eq!(result["completion"]["total"], json!(150));
        assert_eq!(result["completion"]["hasMore"], json!(true));
    }

    #[tokio::test]
    async fn test_capability_gate() {
        let mut config = test_config();
        config.features.tools.enabled = false;
        let (server, client, _task) = spawn_server(config);

        let err = server.register_tool(echo_tool()).await.unwrap_err();
        assert!(matches!(err, McpError::CapabilityNotSupported(g) if g == "tools"));

        client.initialize().await;

        client.send_request(2, "tools/list", None).await;
        let response = client.response().await;
        assert!(response
            .error
            .unwrap()
            .message
            .contains("Capability not supported"));
    }

    #[tokio::test]
    async fn test_update_tools_requires_list_changed() {
        let mut config = test_config();
        config.features.tools.list_changed = false;
        let (server, _client, _task) = spawn_server(config);

        let err = server.update_tools(vec![echo_tool()]).await.unwrap_err();
        assert!(
            matches!(err, McpError::CapabilityNotSupported(g) if g == "tools.listChanged")
        );
    }

    #[tokio::test]
    async fn test_registration_emits_list_changed_when_ready() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.register_tool(echo_tool()).await.unwrap();

        let notification = client.notification().await;
        assert_eq!(notification.method, "notifications/tools/list_changed");
    }

    #[tokio::test]
    async fn test_duplicate_tool_registration_rejected() {
        let (server, _client, _task) = spawn_server(test_config());
        server.register_tool(echo_tool()).await.unwrap();
        let err = server.register_tool(echo_tool()).await.unwrap_err();
        assert!(matches!(err, McpError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (_server, client, _task) = spawn_server(test_config());
        client.initialize().await;

        client.send_request(2, "nonexistent/method", None).await;
        let response = client.response().await;
        assert_eq!(response.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn test_subscribe_bookkeeping_and_gate() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;

        client
            .send_request(2, "resources/subscribe", Some(json!({"uri": "mem://a"})))
            .await;
        assert!(client.response().await.result.is_some());
        assert!(server.resources.is_subscribed("mem://a").await);

        client
            .send_request(3, "resources/unsubscribe", Some(json!({"uri": "mem://a"})))
            .await;
        assert!(client.response().await.result.is_some());
        assert!(!server.resources.is_subscribed("mem://a").await);
    }

    #[tokio::test]
    async fn test_subscribe_rejected_without_capability_bit() {
        let mut config = test_config();
        config.features.resources.subscribe = false;
        let (_server, client, _task) = spawn_server(config);
        client.initialize().await;

        client
            .send_request(2, "resources/subscribe", Some(json!({"uri": "mem://a"})))
            .await;
        let response = client.response().await;
        assert!(response
            .error
            .unwrap()
            .message
            .contains("resources.subscribe"));
    }

    #[tokio::test]
    async fn test_roots_round_trip_updates_cache() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut watcher = server.client().watch_roots();
        client
            .send_notification("notifications/roots/list_changed", None)
            .await;

        let request = client.incoming_request().await;
        assert_eq!(request.method, "roots/list");
        client
            .send_response(JsonRpcResponse::success(
                request.id,
                json!({"roots": [{"uri": "file:///workspace"}]}),
            ))
            .await;

        let update = tokio::time::timeout(Duration::from_secs(5), watcher.changed())
            .await
            .unwrap()
            .unwrap();
        match update {
            CapabilityStatus::Supported(roots) => {
                assert_eq!(roots.len(), 1);
                assert_eq!(roots[0].uri, "file:///workspace");
            }
            CapabilityStatus::NotSupported => panic!("expected supported roots"),
        }
    }

    #[tokio::test]
    async fn test_roots_not_supported_published_at_handshake() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize_with(json!({"sampling": {}})).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(
            server.client().current_roots(),
            Some(CapabilityStatus::NotSupported)
        );

        let err = server.client().list_roots().await.unwrap_err();
        assert!(matches!(err, McpError::CapabilityNotSupported(g) if g == "roots"));
    }

    #[tokio::test]
    async fn test_sampling_round_trip() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = server.client();
        let sampler = tokio::spawn(async move {
            handle
                .create_message(crate::protocol::CreateMessageRequest {
                    messages: vec![crate::protocol::SamplingMessage {
                        role: Role::User,
                        content: Content::text("hello"),
                    }],
                    model_preferences: None,
                    system_prompt: None,
                    temperature: None,
                    max_tokens: 64,
                    stop_sequences: None,
                    metadata: None,
                })
                .await
        });

        let request = client.incoming_request().await;
        assert_eq!(request.method, "sampling/createMessage");
        client
            .send_response(JsonRpcResponse::success(
                request.id,
                json!({
                    "role": "assistant",
                    "content": {"type": "text", "text": "hi there"},
                    "model": "test-model"
                }),
            ))
            .await;

        let result = sampler.await.unwrap().unwrap();
        assert_eq!(result.model, "test-model");
        assert_eq!(result.content, Content::text("hi there"));
    }

    #[tokio::test]
    async fn test_sampling_requires_client_capability() {
        let (server, client, _task) = spawn_server(test_config());
        client
            .initialize_with(json!({"roots": {"listChanged": true}}))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let err = server
            .client()
            .create_message(crate::protocol::CreateMessageRequest {
                messages: Vec::new(),
                model_preferences: None,
                system_prompt: None,
                temperature: None,
                max_tokens: 16,
                stop_sequences: None,
                metadata: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::CapabilityNotSupported(g) if g == "sampling"));
    }

    #[tokio::test]
    async fn test_log_level_filtering() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;

        client
            .send_request(2, "logging/setLevel", Some(json!({"level": "error"})))
            .await;
        assert!(client.response().await.result.is_some());

        let handle = server.client();
        // Below threshold: accepted but dropped
        handle
            .log(LoggingLevel::Info, None, json!("quiet"))
            .await
            .unwrap();
        // At threshold: forwarded
        handle
            .log(LoggingLevel::Error, None, json!("loud"))
            .await
            .unwrap();

        let notification = client.notification().await;
        assert_eq!(notification.method, "notifications/message");
        let params = notification.params.unwrap();
        assert_eq!(params["level"], json!("error"));
        assert_eq!(params["data"], json!("loud"));
    }

    #[tokio::test]
    async fn test_progress_notification_unconditional() {
        let (server, client, _task) = spawn_server(test_config());
        client.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        server
            .client()
            .notify_progress(json!("token-1"), 0.5, Some(1.0))
            .await
            .unwrap();

        let notification = client.notification().await;
        assert_eq!(notification.method, "notifications/progress");
        let params = notification.params.unwrap();
        assert_eq!(params["progressToken"], json!("token-1"));
        assert_eq!(params["progress"], json!(0.5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_failure_disconnects() {
        let mut config = test_config();
        config.server.ping_interval_secs = 1;
        config.server.ping_timeout_secs = 1;
        let (server, client, _task) = spawn_server(config);
        client.initialize().await;

        // Never answer the ping; the timeout tears the session down
        let handle = server.client();
        handle.wait_for_disconnection().await;
        assert!(handle.is_disconnected());
        assert_eq!(server.state().await, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_eof_closes_session() {
        let (server, client, task) = spawn_server(test_config());
        client.initialize().await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        client.transport.close().await;

        assert!(task.await.unwrap().is_ok());
        assert_eq!(server.state().await, SessionState::Closed);
        assert!(server.client().is_disconnected());
    }

    #[tokio::test]
    async fn test_schema_driven_prompt_registration() {
        let (server, client, _task) = spawn_server(test_config());

        let mut completions: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        completions.insert(
            "language".to_string(),
            Arc::new(StaticCompletions::new(vec![
                "rust".to_string(),
                "ruby".to_string(),
            ])),
        );
        server
            .register_prompt_with_schema(
                "review",
                Some("Review some code".to_string()),
                &json!({
                    "type": "object",
                    "properties": {
                        "code": { "type": "string", "description": "The code to review" },
                        "language": { "type": "string", "x-completable": true }
                    },
                    "required": ["code"]
                }),
                Arc::new(NoopPrompt),
                completions,
            )
            .await
            .unwrap();
        client.initialize().await;

        client.send_request(2, "prompts/list", None).await;
        let result = client.response().await.result.unwrap();
        let prompt = &result["prompts"][0];
        assert_eq!(prompt["name"], json!("review"));
        let arguments = prompt["arguments"].as_array().unwrap();
        assert_eq!(arguments.len(), 2);
        let code = arguments.iter().find(|a| a["name"] == "code").unwrap();
        assert_eq!(code["required"], json!(true));

        client
            .send_request(
                3,
                "completion/complete",
                Some(json!({
                    "ref": {"type": "ref/prompt", "name": "review"},
                    "argument": {"name": "language", "value": "ru"}
                })),
            )
            .await;
        let result = client.response().await.result.unwrap();
        assert_eq!(result["completion"]["values"], json!(["rust", "ruby"]));
    }

    #[tokio::test]
    async fn test_completion_for_template_variable() {
        let (server, client, _task) = spawn_server(test_config());

        let mut completions: HashMap<String, Arc<dyn CompletionProvider>> = HashMap::new();
        completions.insert(
            "id".to_string(),
            Arc::new(StaticCompletions::new(vec![
                "42".to_string(),
                "43".to_string(),
            ])),
        );
        server
            .register_template(
                ResourceTemplate {
                    uri_template: "/users/{id}".to_string(),
                    name: "users".to_string(),
                    description: None,
                    mime_type: None,
                },
                Arc::new(JoinBindings),
                completions,
            )
            .await
            .unwrap();
        client.initialize().await;

        // The reference must be the literal template pattern
        client
            .send_request(
                2,
                "completion/complete",
                Some(json!({
                    "ref": {"type": "ref/resource", "uri": "/users/{id}"},
                    "argument": {"name": "id", "value": "4"}
                })),
            )
            .await;
        let result = client.response().await.result.unwrap();
        assert_eq!(result["completion"]["values"], json!(["42", "43"]));
    }
}

