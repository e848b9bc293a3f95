//! Prompt registry.
//!
//! Prompts pair a wire descriptor with an execute handler and an explicit
//! per-argument map of completion providers. `TemplatePrompt` covers the
//! common case of a handlebars template rendered into a single user
//! message.

use std::collections::HashMap;
use std::sync::Arc;

use handlebars::Handlebars;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{McpError, Result};
use crate::protocol::{Content, GetPromptResult, Prompt, PromptMessage, Role};
use crate::schema;
use crate::server::features::completion::CompletionProvider;

/// Prompt execution handler
#[async_trait::async_trait]
pub trait PromptHandler: Send + Sync {
    /// Produce the prompt messages for the given argument bag
    async fn execute(&self, arguments: Option<Value>) -> Result<GetPromptResult>;
}

/// A prompt registration: descriptor, handler, completion providers
pub struct RegisteredPrompt {
    pub prompt: Prompt,
    pub handler: Arc<dyn PromptHandler>,
    pub completions: HashMap<String, Arc<dyn CompletionProvider>>,
}

/// Prompt registry keyed by prompt name
pub struct PromptRegistry {
    prompts: Arc<RwLock<HashMap<String, Arc<RegisteredPrompt>>>>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self {
            prompts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a prompt. Duplicate names reject with `AlreadyRegistered`.
    pub async fn register(
        &self,
        prompt: Prompt,
        handler: Arc<dyn PromptHandler>,
        completions: HashMap<String, Arc<dyn CompletionProvider>>,
    ) -> Result<()> {
        let name = prompt.name.clone();

        let mut prompts = self.prompts.write().await;
        if prompts.contains_key(&name) {
            return Err(McpError::AlreadyRegistered(name));
        }
        prompts.insert(
            name.clone(),
            Arc::new(RegisteredPrompt {
                prompt,
                handler,
                completions,
            }),
        );
        drop(prompts);

        info!("registered prompt: {}", name);
        Ok(())
    }

    /// Look up a registration by name
    pub async fn get(&self, name: &str) -> Option<Arc<RegisteredPrompt>> {
        self.prompts.read().await.get(name).cloned()
    }

    /// Snapshot of every prompt descriptor, sorted by name
    pub async fn list(&self) -> Vec<Prompt> {
        let prompts = self.prompts.read().await;
        let mut all: Vec<Prompt> = prompts.values().map(|p| p.prompt.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Execute a prompt with the given argument bag
    pub async fn execute(&self, name: &str, arguments: Option<Value>) -> Result<GetPromptResult> {
        let registered = self
            .get(name)
            .await
            .ok_or_else(|| McpError::PromptNotFound(name.to_string()))?;

        if let Some(declared) = &registered.prompt.arguments {
            check_required_arguments(name, declared, arguments.as_ref())?;
        }

        debug!("executing prompt: {}", name);
        registered.handler.execute(arguments).await
    }
}

impl Default for PromptRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn check_required_arguments(
    prompt: &str,
    declared: &[crate::protocol::PromptArgument],
    arguments: Option<&Value>,
) -> Result<()> {
    let empty = serde_json::Map::new();
    let args = match arguments {
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(McpError::InvalidPromptArguments {
                prompt: prompt.to_string(),
                cause: "arguments must be an object".to_string(),
            })
        }
        None => &empty,
    };

    for arg in declared {
        if arg.required == Some(true) && !args.contains_key(&arg.name) {
            return Err(McpError::InvalidPromptArguments {
                prompt: prompt.to_string(),
                cause: format!("missing required argument '{}'", arg.name),
            });
        }
    }

    Ok(())
}

/// A prompt rendered from a handlebars template.
///
/// The request's argument bag is the template context; the rendered text
/// becomes a single user message.
pub struct TemplatePrompt {
    name: String,
    description: Option<String>,
    registry: Handlebars<'static>,
}

impl TemplatePrompt {
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        template: &str,
    ) -> Result<Self> {
        let name = name.into();
        let mut registry = Handlebars::new();
        registry
            .register_template_string(&name, template)
            .map_err(|e| {
                McpError::internal_error(format!("failed to register template '{}': {}", name, e))
            })?;

        Ok(Self {
            name,
            description,
            registry,
        })
    }

    /// Build the wire descriptor, deriving the argument list from an
    /// object schema describing the template's context
    pub fn descriptor(&self, arguments_schema: &Value) -> Prompt {
        Prompt {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: Some(schema::prompt_arguments(arguments_schema)),
        }
    }
}

#[async_trait::async_trait]
impl PromptHandler for TemplatePrompt {
    async fn execute(&self, arguments: Option<Value>) -> Result<GetPromptResult> {
        let context = arguments.unwrap_or_else(|| Value::Object(serde_json::Map::new()));

        let text = self
            .registry
            .render(&self.name, &context)
            .map_err(|e| McpError::InvalidPromptArguments {
                prompt: self.name.clone(),
                cause: e.to_string(),
            })?;

        Ok(GetPromptResult {
            description: self.description.clone(),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(text),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn greeting() -> (Prompt, Arc<dyn PromptHandler>) {
        let handler = TemplatePrompt::new(
            "greeting",
            Some("Greet someone".to_string()),
            "Hello, {{name}}!",
        )
        .unwrap();

        let prompt = handler.descriptor(&json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Who to greet" }
            },
            "required": ["name"]
        }));

        (prompt, Arc::new(handler))
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let registry = PromptRegistry::new();
        let (prompt, handler) = greeting();
        registry
            .register(prompt, handler, HashMap::new())
            .await
            .unwrap();

        let prompts = registry.list().await;
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].name, "greeting");

        let args = prompts[0].arguments.as_ref().unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].name, "name");
        assert_eq!(args[0].required, Some(true));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let registry = PromptRegistry::new();
        let (prompt, handler) = greeting();
        registry
            .register(prompt, handler, HashMap::new())
            .await
            .unwrap();

        let (prompt, handler) = greeting();
        let err = registry
            .register(prompt, handler, HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_template_rendering() {
        let registry = PromptRegistry::new();
        let (prompt, handler) = greeting();
        registry
            .register(prompt, handler, HashMap::new())
            .await
            .unwrap();

        let result = registry
            .execute("greeting", Some(json!({"name": "Ada"})))
            .await
            .unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content, Content::text("Hello, Ada!"));
    }

    #[tokio::test]
    async fn test_missing_required_argument() {
        let registry = PromptRegistry::new();
        let (prompt, handler) = greeting();
        registry
            .register(prompt, handler, HashMap::new())
            .await
            .unwrap();

        let err = registry.execute("greeting", None).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidPromptArguments { .. }));
    }

    #[tokio::test]
    async fn test_unknown_prompt() {
        let registry = PromptRegistry::new();
        let err = registry.execute("missing", None).await.unwrap_err();
        assert!(matches!(err, McpError::PromptNotFound(name) if name == "missing"));
    }
}
