//! Resource and resource-template registry.
//!
//! Static resources are keyed by URI; templates are kept in registration
//! order (name-unique) so URI matching is deterministic: the static map is
//! consulted first, then the first template whose pattern matches wins.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{McpError, Result};
use crate::protocol::{Resource, ResourceContents, ResourceTemplate};
use crate::server::features::completion::CompletionProvider;
use crate::uri_template::UriTemplate;

/// Reads a static resource
#[async_trait::async_trait]
pub trait ResourceReader: Send + Sync {
    /// Read the resource's contents
    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>>;
}

/// Reads and enumerates resources addressed through a URI template
#[async_trait::async_trait]
pub trait TemplateReader: Send + Sync {
    /// Read the resource addressed by `uri`, with the template variable
    /// bindings extracted from it
    async fn read(&self, uri: &str, bindings: HashMap<String, String>)
        -> Result<Vec<ResourceContents>>;

    /// Enumerate concrete resources this template currently covers
    async fn list(&self) -> Result<Vec<Resource>> {
        Ok(Vec::new())
    }
}

struct RegisteredResource {
    descriptor: Resource,
    reader: Arc<dyn ResourceReader>,
}

/// A template registration: descriptor, compiled pattern, reader, and
/// per-variable completion providers
pub struct RegisteredTemplate {
    pub descriptor: ResourceTemplate,
    pub template: UriTemplate,
    pub reader: Arc<dyn TemplateReader>,
    pub completions: HashMap<String, Arc<dyn CompletionProvider>>,
}

/// Resource registry
pub struct ResourceRegistry {
    resources: Arc<RwLock<HashMap<String, RegisteredResource>>>,
    templates: Arc<RwLock<Vec<Arc<RegisteredTemplate>>>>,
    subscriptions: Arc<RwLock<HashSet<String>>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self {
            resources: Arc::new(RwLock::new(HashMap::new())),
            templates: Arc::new(RwLock::new(Vec::new())),
            subscriptions: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// Register a static resource. Duplicate URIs reject.
    pub async fn register_resource(
        &self,
        descriptor: Resource,
        reader: Arc<dyn ResourceReader>,
    ) -> Result<()> {
        let uri = descriptor.uri.clone();

        let mut resources = self.resources.write().await;
        if resources.contains_key(&uri) {
            return Err(McpError::AlreadyRegistered(uri));
        }
        resources.insert(uri.clone(), RegisteredResource { descriptor, reader });
        drop(resources);

        info!("registered resource: {}", uri);
        Ok(())
    }

    /// Register a resource template. Duplicate template names reject.
    pub async fn register_template(
        &self,
        descriptor: ResourceTemplate,
        reader: Arc<dyn TemplateReader>,
        completions: HashMap<String, Arc<dyn CompletionProvider>>,
    ) -> Result<()> {
        let template = UriTemplate::new(&descriptor.uri_template)?;
        let name = descriptor.name.clone();

        let mut templates = self.templates.write().await;
        if templates.iter().any(|t| t.descriptor.name == name) {
            return Err(McpError::AlreadyRegistered(name));
        }
        templates.push(Arc::new(RegisteredTemplate {
            descriptor,
            template,
            reader,
            completions,
        }));
        drop(templates);

        info!("registered resource template: {}", name);
        Ok(())
    }

    /// Static resource descriptors plus each template's `list()`, sorted
    /// by URI. Individual template listing failures are logged and skipped.
    pub async fn list(&self) -> Vec<Resource> {
        let mut all: Vec<Resource> = {
            let resources = self.resources.read().await;
            resources.values().map(|r| r.descriptor.clone()).collect()
        };

        let templates: Vec<Arc<RegisteredTemplate>> =
            self.templates.read().await.iter().cloned().collect();
        for registered in templates {
            match registered.reader.list().await {
                Ok(resources) => all.extend(resources),
                Err(e) => {
                    warn!(
                        "template '{}' failed to list resources: {}",
                        registered.descriptor.name, e
                    );
                }
            }
        }

        all.sort_by(|a, b| a.uri.cmp(&b.uri));
        all
    }

    /// Template descriptors, sorted by name
    pub async fn list_templates(&self) -> Vec<ResourceTemplate> {
        let templates = self.templates.read().await;
        let mut all: Vec<ResourceTemplate> =
            templates.iter().map(|t| t.descriptor.clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Read the resource addressed by `uri`.
    ///
    /// The static map takes precedence; otherwise templates are tried in
    /// registration order and the first match wins.
    pub async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let static_reader = {
            let resources = self.resources.read().await;
            resources.get(uri).map(|r| r.reader.clone())
        };
        if let Some(reader) = static_reader {
            debug!("reading static resource: {}", uri);
            return reader.read(uri).await;
        }

        let templates: Vec<Arc<RegisteredTemplate>> =
            self.templates.read().await.iter().cloned().collect();
        for registered in templates {
            if let Some(bindings) = registered.template.match_uri(uri) {
                debug!(
                    "reading '{}' through template '{}'",
                    uri, registered.descriptor.name
                );
                return registered.reader.read(uri, bindings).await;
            }
        }

        Err(McpError::ResourceNotFound(uri.to_string()))
    }

    /// Find a registration whose template pattern equals `pattern` literally
    pub async fn template_by_pattern(&self, pattern: &str) -> Option<Arc<RegisteredTemplate>> {
        let templates = self.templates.read().await;
        templates
            .iter()
            .find(|t| t.descriptor.uri_template == pattern)
            .cloned()
    }

    /// Record a subscription to update notifications for `uri`
    pub async fn subscribe(&self, uri: &str) -> bool {
        self.subscriptions.write().await.insert(uri.to_string())
    }

    /// Drop a subscription
    pub async fn unsubscribe(&self, uri: &str) -> bool {
        self.subscriptions.write().await.remove(uri)
    }

    /// Whether any client subscribed to `uri`
    pub async fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions.read().await.contains(uri)
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Static resource reader serving local files addressed by `file://` URIs
pub struct FileReader {
    root: PathBuf,
}

impl FileReader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let url = Url::parse(uri)
            .map_err(|e| McpError::invalid_params(format!("invalid file URI '{}': {}", uri, e)))?;
        if url.scheme() != "file" {
            return Err(McpError::invalid_params(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let path = url
            .to_file_path()
            .map_err(|_| McpError::invalid_params(format!("not a file path: {}", uri)))?;

        // Refuse to escape the configured root
        if !path.starts_with(&self.root) {
            return Err(McpError::ResourceNotFound(uri.to_string()));
        }

        Ok(path)
    }
}

#[async_trait::async_trait]
impl ResourceReader for FileReader {
    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let path = self.resolve(uri)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                McpError::ResourceNotFound(uri.to_string())
            } else {
                McpError::Io(e)
            }
        })?;

        match String::from_utf8(bytes) {
            Ok(text) => Ok(vec![ResourceContents::text(uri, text)]),
            Err(original) => Ok(vec![ResourceContents::blob(
                uri,
                Some("application/octet-stream".to_string()),
                original.as_bytes(),
            )]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Resource;

    struct StaticText(&'static str);

    #[async_trait::async_trait]
    impl ResourceReader for StaticText {
        async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>> {
            Ok(vec![ResourceContents::text(uri, self.0)])
        }
    }

    struct EchoBindings;

    #[async_trait::async_trait]
    impl TemplateReader for EchoBindings {
        async fn read(
            &self,
            uri: &str,
            bindings: HashMap<String, String>,
        ) -> Result<Vec<ResourceContents>> {
            let id = bindings.get("id").cloned().unwrap_or_default();
            let post = bindings.get("post").cloned().unwrap_or_default();
            Ok(vec![ResourceContents::text(uri, format!("{}/{}", id, post))])
        }
    }

    fn descriptor(uri: &str) -> Resource {
        Resource {
            uri: uri.to_string(),
            name: uri.to_string(),
            description: None,
            mime_type: None,
        }
    }

    fn template_descriptor(pattern: &str, name: &str) -> ResourceTemplate {
        ResourceTemplate {
            uri_template: pattern.to_string(),
            name: name.to_string(),
            description: None,
            mime_type: None,
        }
    }

    #[tokio::test]
    async fn test_static_read() {
        let registry = ResourceRegistry::new();
        registry
            .register_resource(descriptor("mem://a"), Arc::new(StaticText("hello")))
            .await
            .unwrap();

        let contents = registry.read("mem://a").await.unwrap();
        assert_eq!(contents, vec![ResourceContents::text("mem://a", "hello")]);
    }

    #[tokio::test]
    async fn test_duplicate_uri_rejected() {
        let registry = ResourceRegistry::new();
        registry
            .register_resource(descriptor("mem://a"), Arc::new(StaticText("x")))
            .await
            .unwrap();
        let err = registry
            .register_resource(descriptor("mem://a"), Arc::new(StaticText("y")))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::AlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_template_read_with_bindings() {
        let registry = ResourceRegistry::new();
        registry
            .register_template(
                template_descriptor("/users/{id}/posts/{post}", "user-posts"),
                Arc::new(EchoBindings),
                HashMap::new(),
            )
            .await
            .unwrap();

        let contents = registry.read("/users/42/posts/7").await.unwrap();
        assert_eq!(
            contents,
            vec![ResourceContents::text("/users/42/posts/7", "42/7")]
        );
    }

    #[tokio::test]
    async fn test_static_takes_precedence_over_template() {
        let registry = ResourceRegistry::new();
        registry
            .register_template(
                template_descriptor("/users/{id}/posts/{post}", "user-posts"),
                Arc::new(EchoBindings),
                HashMap::new(),
            )
            .await
            .unwrap();
        registry
            .register_resource(
                descriptor("/users/42/posts/7"),
                Arc::new(StaticText("pinned")),
            )
            .await
            .unwrap();

        let contents = registry.read("/users/42/posts/7").await.unwrap();
        assert_eq!(
            contents,
            vec![ResourceContents::text("/users/42/posts/7", "pinned")]
        );
    }

    #[tokio::test]
    async fn test_unknown_uri() {
        let registry = ResourceRegistry::new();
        let err = registry.read("/nowhere").await.unwrap_err();
        assert!(matches!(err, McpError::ResourceNotFound(uri) if uri == "/nowhere"));
    }

    #[tokio::test]
    async fn test_list_skips_failing_template() {
        struct FailingList;

        #[async_trait::async_trait]
        impl TemplateReader for FailingList {
            async fn read(
                &self,
                _uri: &str,
                _bindings: HashMap<String, String>,
            ) -> Result<Vec<ResourceContents>> {
                unreachable!("not read in this test")
            }

            async fn list(&self) -> Result<Vec<Resource>> {
                Err(McpError::internal_error("backing store down"))
            }
        }

        let registry = ResourceRegistry::new();
        registry
            .register_resource(descriptor("mem://a"), Arc::new(StaticText("x")))
            .await
            .unwrap();
        registry
            .register_template(
                template_descriptor("/broken/{id}", "broken"),
                Arc::new(FailingList),
                HashMap::new(),
            )
            .await
            .unwrap();

        let resources = registry.list().await;
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, "mem://a");
    }

    #[tokio::test]
    async fn test_subscription_bookkeeping() {
        let registry = ResourceRegistry::new();
        assert!(registry.subscribe("mem://a").await);
        assert!(registry.is_subscribed("mem://a").await);
        assert!(registry.unsubscribe("mem://a").await);
        assert!(!registry.is_subscribed("mem://a").await);
    }

    #[tokio::test]
    async fn test_file_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        tokio::fs::write(&path, "contents").await.unwrap();

        let reader = FileReader::new(dir.path().to_path_buf());
        let uri = Url::from_file_path(&path).unwrap().to_string();

        let contents = reader.read(&uri).await.unwrap();
        match &contents[0] {
            ResourceContents::Text { text, .. } => assert_eq!(text, "contents"),
            other => panic!("expected text, got {:?}", other),
        }

        // Escaping the root is refused
        let outside = Url::from_file_path("/etc/hostname").unwrap().to_string();
        assert!(reader.read(&outside).await.is_err());
    }
}
