//! Argument completion.
//!
//! Resolves `completion/complete` references to the provider attached to a
//! prompt argument or a template variable, and caps the suggestions at
//! [`MAX_COMPLETION_VALUES`].

use std::sync::Arc;

use tracing::debug;

use crate::error::{McpError, Result};
use crate::protocol::{Completion, CompletionArgument, CompletionReference};
use crate::server::features::prompts::PromptRegistry;
use crate::server::features::resources::ResourceRegistry;

/// Hard cap on the number of suggestions returned to the client
pub const MAX_COMPLETION_VALUES: usize = 100;

/// Supplies suggestions for one completable field
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Suggestions for the partial `value` typed so far
    async fn complete(&self, value: &str) -> Result<Vec<String>>;
}

/// Fixed candidate list filtered by case-insensitive prefix
pub struct StaticCompletions {
    values: Vec<String>,
}

impl StaticCompletions {
    pub fn new(values: Vec<String>) -> Self {
        Self { values }
    }
}

#[async_trait::async_trait]
impl CompletionProvider for StaticCompletions {
    async fn complete(&self, value: &str) -> Result<Vec<String>> {
        let prefix = value.to_lowercase();
        Ok(self
            .values
            .iter()
            .filter(|v| v.to_lowercase().starts_with(&prefix))
            .cloned()
            .collect())
    }
}

/// Resolves completion references against the prompt and resource registries
pub struct CompletionEngine {
    prompts: Arc<PromptRegistry>,
    resources: Arc<ResourceRegistry>,
}

impl CompletionEngine {
    pub fn new(prompts: Arc<PromptRegistry>, resources: Arc<ResourceRegistry>) -> Self {
        Self { prompts, resources }
    }

    /// Answer a `completion/complete` request.
    ///
    /// A prompt reference resolves by prompt name; a resource reference
    /// resolves by literal equality with a registered template pattern, not
    /// by URI template matching. A field with no provider completes empty.
    pub async fn complete(
        &self,
        reference: &CompletionReference,
        argument: &CompletionArgument,
    ) -> Result<Completion> {
        let provider = match reference {
            CompletionReference::Prompt { name } => {
                let registered = self
                    .prompts
                    .get(name)
                    .await
                    .ok_or_else(|| McpError::PromptNotFound(name.clone()))?;
                registered.completions.get(&argument.name).cloned()
            }
            CompletionReference::Resource { uri } => {
                let registered = self
                    .resources
                    .template_by_pattern(uri)
                    .await
                    .ok_or_else(|| McpError::ResourceNotFound(uri.clone()))?;
                registered.completions.get(&argument.name).cloned()
            }
        };

        let values = match provider {
            Some(provider) => provider.complete(&argument.value).await?,
            None => {
                debug!("no completion provider for field '{}'", argument.name);
                Vec::new()
            }
        };

        Ok(capped(values))
    }
}

/// Truncate suggestions to the cap, keeping the full count in `total`
fn capped(mut values: Vec<String>) -> Completion {
    let total = values.len();
    values.truncate(MAX_COMPLETION_VALUES);

    Completion {
        values,
        total: Some(total),
        has_more: Some(total > MAX_COMPLETION_VALUES),
    }
}
