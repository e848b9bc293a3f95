//! Tool registry.
//!
//! Tools are named callables with a JSON-Schema input description. The
//! registry is append-only for the session lifetime; the only bulk
//! mutation is the atomic replacement backing `update_tools`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{McpError, Result};
use crate::protocol::{Content, Tool};
use crate::schema;

/// Tool handler trait
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Unique tool name
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> Option<String> {
        None
    }

    /// JSON Schema describing the argument bag
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// The wire descriptor for `tools/list`
    fn definition(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description(),
            input_schema: self.input_schema(),
        }
    }

    /// Execute the tool with the raw argument bag
    async fn call(&self, arguments: Option<Value>) -> Result<Vec<Content>>;
}

/// Tool registry keyed by tool name
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, Arc<dyn ToolHandler>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool. Duplicate names reject with `AlreadyRegistered`.
    pub async fn register(&self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let name = handler.name().to_string();

        let mut tools = self.tools.write().await;
        if tools.contains_key(&name) {
            return Err(McpError::AlreadyRegistered(name));
        }
        tools.insert(name.clone(), handler);
        drop(tools);

        info!("registered tool: {}", name);
        Ok(())
    }

    /// Atomically replace the whole tool set.
    pub async fn replace_all(&self, handlers: Vec<Arc<dyn ToolHandler>>) -> Result<()> {
        let mut next = HashMap::new();
        for handler in handlers {
            let name = handler.name().to_string();
            if next.insert(name.clone(), handler).is_some() {
                return Err(McpError::AlreadyRegistered(name));
            }
        }

        let count = next.len();
        let mut tools = self.tools.write().await;
        *tools = next;
        drop(tools);

        info!("replaced tool set: {} tools", count);
        Ok(())
    }

    /// Get a handler by name
    pub async fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Snapshot of every tool descriptor, sorted by name
    pub async fn list(&self) -> Vec<Tool> {
        let tools = self.tools.read().await;
        let mut all: Vec<Tool> = tools.values().map(|h| h.definition()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Number of registered tools
    pub async fn count(&self) -> usize {
        self.tools.read().await.len()
    }

    /// Invoke a tool.
    ///
    /// `ToolNotFound` means the name is unknown; every other failure is a
    /// tool-semantic error (validation, decode, handler) wrapped in
    /// `ToolCallError` for the dispatcher to fold into an `isError` result.
    pub async fn call(&self, name: &str, arguments: Option<Value>) -> Result<Vec<Content>> {
        let handler = self
            .get(name)
            .await
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        if let Err(cause) = schema::validate_arguments(&handler.input_schema(), arguments.as_ref())
        {
            return Err(McpError::InvalidToolInput {
                tool: name.to_string(),
                cause,
            });
        }

        debug!("calling tool: {}", name);
        handler
            .call(arguments)
            .await
            .map_err(|e| McpError::ToolCallError(vec![e.to_string()]))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A tool built from a typed async closure.
///
/// The raw argument bag decodes into `T` before the closure runs; decode
/// failures surface as `InvalidToolInput` carrying the payload/schema
/// diagnostics.
pub struct FnTool<T> {
    name: String,
    description: Option<String>,
    input_schema: Value,
    f: Box<dyn Fn(T) -> BoxFuture<'static, Result<Vec<Content>>> + Send + Sync>,
}

impl<T> FnTool<T>
where
    T: DeserializeOwned + Send + 'static,
{
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: Option<String>,
        input_schema: Value,
        f: F,
    ) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Vec<Content>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description,
            input_schema,
            f: Box::new(move |args| Box::pin(f(args))),
        }
    }
}

#[async_trait::async_trait]
impl<T> ToolHandler for FnTool<T>
where
    T: DeserializeOwned + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn input_schema(&self) -> Value {
        self.input_schema.clone()
    }

    async fn call(&self, arguments: Option<Value>) -> Result<Vec<Content>> {
        let raw = arguments.unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let decoded: T = serde_json::from_value(raw.clone()).map_err(|_| {
            let decode = McpError::decoding(&raw, &self.input_schema);
            McpError::InvalidToolInput {
                tool: self.name.clone(),
                cause: decode.to_string(),
            }
        })?;

        (self.f)(decoded).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

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

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).await.unwrap();

        let tools = registry.list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        assert!(tools[0].input_schema.get("properties").is_some());
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).await.unwrap();

        let err = registry.register(echo_tool()).await.unwrap_err();
        assert!(matches!(err, McpError::AlreadyRegistered(name) if name == "echo"));
    }

    #[tokio::test]
    async fn test_call_decodes_arguments() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).await.unwrap();

        let content = registry
            .call("echo", Some(json!({"msg": "hi"})))
            .await
            .unwrap();
        assert_eq!(content, vec![Content::text("hi")]);
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.call("missing", None).await.unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn test_call_invalid_input() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).await.unwrap();

        let err = registry.call("echo", Some(json!({}))).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidToolInput { .. }));
    }

    #[tokio::test]
    async fn test_replace_all() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool()).await.unwrap();

        let replacement: Arc<dyn ToolHandler> = Arc::new(FnTool::new(
            "shout",
            None,
            json!({
                "type": "object",
                "properties": { "msg": { "type": "string" } },
                "required": ["msg"]
            }),
            |args: EchoArgs| async move { Ok(vec![Content::text(args.msg.to_uppercase())]) },
        ));
        registry.replace_all(vec![replacement]).await.unwrap();

        let tools = registry.list().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "shout");
        assert!(registry.get("echo").await.is_none());
    }
}
