//! Generators for structured content.
//!
//! A provider turns caller arguments into the opaque path and arguments a
//! player uses to render structured content. Providers are registered by
//! name in a [`ProviderRegistry`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use montage_model::{Content, NewContent, StructuredContent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{ContentError, Result},
    store::ContentStore,
};

/// What a provider produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredPayload {
    pub path: String,
    #[serde(default)]
    pub args: Value,
}

impl From<StructuredPayload> for StructuredContent {
    fn from(payload: StructuredPayload) -> Self {
        StructuredContent {
            path: Some(payload.path),
            args: payload.args,
        }
    }
}

#[async_trait]
pub trait ContentProvider: Send + Sync {
    fn name(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Application the player needs to render the output, if any.
    fn requires_app(&self) -> Option<&str> {
        None
    }

    async fn generate(&self, args: Value) -> Result<StructuredPayload>;
}

/// Emits a fixed path. Caller arguments are merged over the defaults when
/// both are objects and replace them otherwise.
#[derive(Debug, Clone)]
pub struct PassthroughProvider {
    name: String,
    display_name: String,
    path: String,
    defaults: Value,
}

impl PassthroughProvider {
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            path: path.into(),
            defaults: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }
}

#[async_trait]
impl ContentProvider for PassthroughProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    async fn generate(&self, args: Value) -> Result<StructuredPayload> {
        let args = match (self.defaults.clone(), args) {
            (defaults, Value::Null) => defaults,
            (Value::Object(mut defaults), Value::Object(overrides)) => {
                defaults.extend(overrides);
                Value::Object(defaults)
            }
            (_, args) => args,
        };
        Ok(StructuredPayload {
            path: self.path.clone(),
            args,
        })
    }
}

#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn ContentProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider, replacing any earlier one with the same name.
    pub fn register(&mut self, provider: Arc<dyn ContentProvider>) {
        debug!(provider = provider.name(), "registering content provider");
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn with(mut self, provider: Arc<dyn ContentProvider>) -> Self {
        self.register(provider);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn ContentProvider>> {
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| ContentError::NotFound(format!("content provider '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Makes sure every provider has a structured content named after it,
    /// holding the provider's output for empty arguments. Existing contents
    /// are left alone.
    pub async fn install(&self, store: &dyn ContentStore) -> Result<Vec<Content>> {
        let existing = store.list().await?;
        let mut installed = Vec::new();
        for (name, provider) in &self.providers {
            if existing.iter().any(|content| content.name == *name) {
                continue;
            }
            let payload = provider.generate(Value::Null).await?;
            let content = store
                .create(NewContent::structured(name.clone(), payload.path, payload.args))
                .await?;
            info!(
                provider = %name,
                display_name = provider.display_name(),
                content_id = %content.id,
                "installed content provider"
            );
            installed.push(content);
        }
        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ErrorKind, store::InMemoryContentStore};
    use serde_json::json;

    fn clock() -> Arc<dyn ContentProvider> {
        Arc::new(
            PassthroughProvider::new("clock", "Wall Clock", "widgets/clock")
                .with_defaults(json!({"format": "24h", "tz": "UTC"})),
        )
    }

    #[tokio::test]
    async fn arguments_merge_over_defaults() {
        let payload = clock().generate(json!({"tz": "Asia/Kolkata"})).await.unwrap();
        assert_eq!(payload.path, "widgets/clock");
        assert_eq!(payload.args, json!({"format": "24h", "tz": "Asia/Kolkata"}));

        let plain = clock().generate(Value::Null).await.unwrap();
        assert_eq!(plain.args, json!({"format": "24h", "tz": "UTC"}));
    }

    #[test]
    fn unknown_providers_are_not_found() {
        let registry = ProviderRegistry::new().with(clock());
        assert!(registry.get("clock").is_ok());
        let err = registry.get("weather").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn install_creates_each_provider_once() {
        let store = InMemoryContentStore::new();
        let registry = ProviderRegistry::new().with(clock());

        let first = registry.install(&store).await.unwrap();
        assert_eq!(first.len(), 1);
        let structured = first[0].as_structured().unwrap();
        assert_eq!(structured.path.as_deref(), Some("widgets/clock"));

        assert!(registry.install(&store).await.unwrap().is_empty());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}
