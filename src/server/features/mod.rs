//! Server feature implementations.
//!
//! The registries behind the MCP feature groups, plus capability
//! construction and the gate checks used by registration and dispatch.

pub mod completion;
pub mod logging;
pub mod prompts;
pub mod resources;
pub mod tools;

pub use completion::{CompletionEngine, CompletionProvider, StaticCompletions};
pub use logging::LoggingState;
pub use prompts::{PromptHandler, PromptRegistry, TemplatePrompt};
pub use resources::{FileReader, ResourceReader, ResourceRegistry, TemplateReader};
pub use tools::{FnTool, ToolHandler, ToolRegistry};

use crate::config::FeatureConfig;
use crate::error::{McpError, Result};
use crate::protocol::{
    PromptsCapability, ResourcesCapability, ServerCapabilities, ToolsCapability,
};

/// Build the advertised capability record from the feature configuration.
/// An absent group means every request of that group is rejected.
pub fn capabilities_from(config: &FeatureConfig) -> ServerCapabilities {
    ServerCapabilities {
        experimental: None,
        logging: config.logging.then(|| serde_json::json!({})),
        prompts: config.prompts.enabled.then(|| PromptsCapability {
            list_changed: Some(config.prompts.list_changed),
        }),
        resources: config.resources.enabled.then(|| ResourcesCapability {
            subscribe: Some(config.resources.subscribe),
            list_changed: Some(config.resources.list_changed),
        }),
        tools: config.tools.enabled.then(|| ToolsCapability {
            list_changed: Some(config.tools.list_changed),
        }),
    }
}

/// Reject with `CapabilityNotSupported` unless the named group is declared
pub fn require_capability(capabilities: &ServerCapabilities, group: &str) -> Result<()> {
    let declared = match group {
        "tools" => capabilities.tools.is_some(),
        "resources" => capabilities.resources.is_some(),
        "prompts" => capabilities.prompts.is_some(),
        "logging" => capabilities.logging.is_some(),
        _ => false,
    };

    if declared {
        Ok(())
    } else {
        Err(McpError::CapabilityNotSupported(group.to_string()))
    }
}

/// Whether the named group advertises `listChanged == true`
pub fn list_changed_enabled(capabilities: &ServerCapabilities, group: &str) -> bool {
    match group {
        "tools" => capabilities
            .tools
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false),
        "resources" => capabilities
            .resources
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false),
        "prompts" => capabilities
            .prompts
            .as_ref()
            .and_then(|c| c.list_changed)
            .unwrap_or(false),
        _ => false,
    }
}
