//! Resolves a requested model name to a configured provider and the wire-level model id the
//! adapter should actually send upstream.

use std::sync::Arc;

use config::{LlmProviderConfig, ModelConfig};
use indexmap::IndexMap;

use crate::{error::LlmError, provider::Provider};

/// One configured provider: the `Provider` implementation plus the model configuration needed
/// to resolve aliases and filters against it.
struct RegisteredProvider {
    provider: Arc<dyn Provider>,
    models: IndexMap<String, ModelConfig>,
    model_filter: Option<config::ModelFilter>,
    forward_token: bool,
}

/// The full set of providers available to route requests to, built once at startup.
pub struct ProviderRegistry {
    providers: IndexMap<String, RegisteredProvider>,
}

/// A model name resolved to a concrete provider and the model id to send upstream.
pub struct ResolvedRoute {
    pub provider: Arc<dyn Provider>,
    pub wire_model: String,
    /// Whether this provider accepts a per-request API key from the caller instead of (or in
    /// place of) a configured one.
    pub forward_token: bool,
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// Resolves `requested_model` against the registry.
    ///
    /// A `provider_key/model_id` form routes directly to that provider. A bare model id is
    /// matched against every provider's explicit model aliases first, then against its
    /// `model_filter` pattern, in configuration order — the first match wins.
    pub fn resolve(&self, requested_model: &str) -> Result<ResolvedRoute, LlmError> {
        if let Some((provider_key, model_id)) = requested_model.split_once('/') {
            if let Some(registered) = self.providers.get(provider_key) {
                return Ok(ResolvedRoute {
                    provider: registered.provider.clone(),
                    wire_model: wire_model_name(registered, model_id),
                    forward_token: registered.forward_token,
                });
            }
        }

        for registered in self.providers.values() {
            if let Some(model_config) = registered.models.get(requested_model) {
                let wire_model = model_config.rename.clone().unwrap_or_else(|| requested_model.to_string());
                return Ok(ResolvedRoute { provider: registered.provider.clone(), wire_model, forward_token: registered.forward_token });
            }
        }

        for registered in self.providers.values() {
            if let Some(filter) = &registered.model_filter {
                if filter.is_match(requested_model) {
                    return Ok(ResolvedRoute {
                        provider: registered.provider.clone(),
                        wire_model: requested_model.to_string(),
                        forward_token: registered.forward_token,
                    });
                }
            }
        }

        Err(LlmError::UnknownModel(requested_model.to_string()))
    }
}

fn wire_model_name(registered: &RegisteredProvider, model_id: &str) -> String {
    registered
        .models
        .get(model_id)
        .and_then(|model| model.rename.clone())
        .unwrap_or_else(|| model_id.to_string())
}

/// Builds a `ProviderRegistry` by registering one `Provider` per configured provider entry.
#[derive(Default)]
pub struct ProviderRegistryBuilder {
    providers: IndexMap<String, RegisteredProvider>,
}

impl ProviderRegistryBuilder {
    pub fn register(mut self, key: String, provider: Arc<dyn Provider>, config: &LlmProviderConfig) -> Self {
        let (models, model_filter, forward_token) = match config {
            config::LlmProviderConfig::Proxy(proxy) => (proxy.models.clone(), proxy.model_filter.clone(), false),
            config::LlmProviderConfig::Anthropic(api)
            | config::LlmProviderConfig::Openai(api)
            | config::LlmProviderConfig::OpenaiResponses(api)
            | config::LlmProviderConfig::Google(api) => (api.models.clone(), api.model_filter.clone(), api.forward_token),
        };

        self.providers.insert(key, RegisteredProvider { provider, models, model_filter, forward_token });
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry { providers: self.providers }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use config::{ApiProviderConfig, LlmProviderConfig};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        canonical::{AssistantMessage, Context, StreamOptions},
        provider::StreamHandle,
    };

    struct StubProvider(&'static str);

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        fn name(&self) -> &str {
            self.0
        }

        async fn stream(
            self: Arc<Self>,
            _model: String,
            _context: Context,
            _options: StreamOptions,
        ) -> Result<StreamHandle, LlmError> {
            let (_tx, rx) = mpsc::channel(1);
            let handle = tokio::spawn(async { Ok(AssistantMessage::empty("stub", "stub", 0)) });
            Ok((rx, handle))
        }
    }

    fn provider_config(models: IndexMap<String, ModelConfig>) -> LlmProviderConfig {
        LlmProviderConfig::Openai(ApiProviderConfig { models, ..Default::default() })
    }

    #[test]
    fn routes_via_explicit_provider_prefix() {
        let mut models = IndexMap::new();
        models.insert("fast".to_string(), ModelConfig { rename: Some("gpt-4o-mini".to_string()) });
        let config = provider_config(models);

        let registry = ProviderRegistry::builder()
            .register("openai".to_string(), Arc::new(StubProvider("openai")), &config)
            .build();

        let route = registry.resolve("openai/fast").unwrap();
        assert_eq!(route.wire_model, "gpt-4o-mini");
    }

    #[test]
    fn routes_via_bare_alias_across_providers() {
        let mut models = IndexMap::new();
        models.insert("fast".to_string(), ModelConfig { rename: Some("gpt-4o-mini".to_string()) });
        let config = provider_config(models);

        let registry = ProviderRegistry::builder()
            .register("openai".to_string(), Arc::new(StubProvider("openai")), &config)
            .build();

        let route = registry.resolve("fast").unwrap();
        assert_eq!(route.wire_model, "gpt-4o-mini");
    }

    #[test]
    fn unknown_model_is_an_error() {
        let registry = ProviderRegistry::builder().build();
        assert!(matches!(registry.resolve("missing"), Err(LlmError::UnknownModel(_))));
    }
}
