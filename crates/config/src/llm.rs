//! Configuration for the LLM streaming core: providers, protocol endpoints, and the canonical
//! proxy passthrough.

use indexmap::IndexMap;
use regex::Regex;
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, de};

/// Top-level LLM configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    /// Whether the LLM subsystem is active at all.
    pub enabled: bool,
    /// OpenAI- and Anthropic-compatible passthrough endpoints.
    pub protocols: LlmProtocolsConfig,
    /// The canonical-protocol proxy endpoint (the crate's own wire format).
    pub proxy: ProxyConfig,
    /// Configured upstream providers, keyed by a caller-chosen name used in `provider/model`
    /// routing prefixes.
    pub providers: IndexMap<String, LlmProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocols: LlmProtocolsConfig::default(),
            proxy: ProxyConfig::default(),
            providers: IndexMap::new(),
        }
    }
}

impl LlmConfig {
    /// True if at least one provider is configured.
    pub fn has_providers(&self) -> bool {
        !self.providers.is_empty()
    }

    /// True if at least one of the passthrough protocol endpoints is enabled.
    pub fn has_protocol_endpoints(&self) -> bool {
        self.protocols.openai.enabled || self.protocols.anthropic.enabled
    }
}

/// The two vendor-compatible passthrough endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmProtocolsConfig {
    pub openai: OpenAiProtocolConfig,
    pub anthropic: AnthropicProtocolConfig,
}

impl Default for LlmProtocolsConfig {
    fn default() -> Self {
        Self {
            openai: OpenAiProtocolConfig::default(),
            anthropic: AnthropicProtocolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenAiProtocolConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for OpenAiProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: "/llm/openai".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnthropicProtocolConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for AnthropicProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/llm/anthropic".to_string(),
        }
    }
}

/// The canonical-protocol proxy endpoint: the fifth provider, speaking the crate's own wire
/// format (see the Proxy Adapter in the streaming core).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub path: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: "/llm/proxy".to_string(),
        }
    }
}

/// The wire protocol a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderType {
    Anthropic,
    Openai,
    OpenaiResponses,
    Google,
    /// Delegates to another instance of this gateway's canonical proxy endpoint, rather than
    /// speaking a vendor wire protocol directly.
    Proxy,
}

/// A single configured upstream provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LlmProviderConfig {
    Anthropic(ApiProviderConfig),
    Openai(ApiProviderConfig),
    OpenaiResponses(ApiProviderConfig),
    Google(ApiProviderConfig),
    Proxy(ProxyProviderConfig),
}

impl LlmProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Anthropic(_) => ProviderType::Anthropic,
            Self::Openai(_) => ProviderType::Openai,
            Self::OpenaiResponses(_) => ProviderType::OpenaiResponses,
            Self::Google(_) => ProviderType::Google,
            Self::Proxy(_) => ProviderType::Proxy,
        }
    }

    /// The shared connection/model settings, or `None` for the `Proxy` variant, which has its
    /// own distinct settings shape (`ProxyProviderConfig`).
    pub fn api(&self) -> Option<&ApiProviderConfig> {
        match self {
            Self::Anthropic(c) | Self::Openai(c) | Self::OpenaiResponses(c) | Self::Google(c) => Some(c),
            Self::Proxy(_) => None,
        }
    }

    pub fn models(&self) -> &IndexMap<String, ModelConfig> {
        match self {
            Self::Proxy(c) => &c.models,
            Self::Anthropic(c) | Self::Openai(c) | Self::OpenaiResponses(c) | Self::Google(c) => &c.models,
        }
    }
}

/// Settings for a provider that delegates to another gateway's canonical proxy endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyProviderConfig {
    /// The upstream gateway's canonical proxy endpoint, e.g. `https://central.example/llm/proxy`.
    pub endpoint: String,
    /// Bearer token presented to the upstream proxy endpoint.
    pub token: Option<SecretString>,
    pub models: IndexMap<String, ModelConfig>,
    pub model_filter: Option<ModelFilter>,
}

impl Default for ProxyProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: None,
            models: IndexMap::new(),
            model_filter: None,
        }
    }
}

/// Connection and model settings shared by every provider type.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiProviderConfig {
    /// API key for this provider. May be omitted when `forward_token` is set, letting each
    /// request supply its own key via a bring-your-own-key header.
    pub api_key: Option<SecretString>,
    /// Override for the provider's base URL, e.g. to target a self-hosted or compatible endpoint.
    pub base_url: Option<String>,
    /// When true, a request-scoped API key (from a client header) overrides `api_key`.
    pub forward_token: bool,
    /// Explicit alias -> wire-model-name entries. An alias not listed here is passed through
    /// to the provider verbatim.
    pub models: IndexMap<String, ModelConfig>,
    /// Optional case-insensitive filter restricting which discovered models are listed.
    pub model_filter: Option<ModelFilter>,
}

impl Default for ApiProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            forward_token: false,
            models: IndexMap::new(),
            model_filter: None,
        }
    }
}

/// Per-model configuration: currently only a rename from the configured alias to the name sent
/// on the wire.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
    pub rename: Option<String>,
}

/// A case-insensitive regex used to restrict which models a provider advertises.
#[derive(Debug, Clone)]
pub struct ModelFilter(Regex);

impl ModelFilter {
    pub fn is_match(&self, model: &str) -> bool {
        self.0.is_match(model)
    }
}

impl PartialEq for ModelFilter {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_str() == other.0.as_str()
    }
}

impl<'de> Deserialize<'de> for ModelFilter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        let regex = Regex::new(&format!("(?i){pattern}")).map_err(de::Error::custom)?;

        Ok(Self(regex))
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_debug_snapshot!(&config.llm, @r#"
        LlmConfig {
            enabled: true,
            protocols: LlmProtocolsConfig {
                openai: OpenAiProtocolConfig {
                    enabled: true,
                    path: "/llm/openai",
                },
                anthropic: AnthropicProtocolConfig {
                    enabled: false,
                    path: "/llm/anthropic",
                },
            },
            proxy: ProxyConfig {
                enabled: false,
                path: "/llm/proxy",
            },
            providers: {},
        }
        "#);
    }

    #[test]
    fn provider_with_models() {
        let config_str = indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            api_key = "test-key"

            [llm.providers.openai.models.fast]
            rename = "gpt-4o-mini"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let provider = &config.llm.providers["openai"];

        assert_eq!(provider.provider_type(), super::ProviderType::Openai);
        assert_eq!(provider.models()["fast"].rename.as_deref(), Some("gpt-4o-mini"));
    }

    #[test]
    fn model_filter_matches_case_insensitively() {
        let config_str = indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            api_key = "test-key"
            model_filter = "^gpt-4"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let filter = config.llm.providers["openai"].api().unwrap().model_filter.as_ref().unwrap();

        assert!(filter.is_match("GPT-4o"));
        assert!(!filter.is_match("claude-3"));
    }

    #[test]
    fn forward_token_allows_missing_api_key() {
        let config_str = indoc! {r#"
            [llm.providers.openai]
            type = "openai"
            forward_token = true
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        assert!(config.llm.providers["openai"].api().unwrap().api_key.is_none());
    }

    #[test]
    fn proxy_provider_is_distinct_from_api_providers() {
        let config_str = indoc! {r#"
            [llm.providers.upstream]
            type = "proxy"
            endpoint = "https://central.example/llm/proxy"
            token = "shared-secret"
        "#};

        let config: Config = toml::from_str(config_str).unwrap();
        let provider = &config.llm.providers["upstream"];

        assert_eq!(provider.provider_type(), super::ProviderType::Proxy);
        assert!(matches!(provider, super::LlmProviderConfig::Proxy(_)));
    }
}
