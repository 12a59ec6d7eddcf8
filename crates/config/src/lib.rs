//! Typed configuration for the LLM streaming gateway.

#![deny(missing_docs)]

mod error;
mod llm;
mod loader;
mod server;

use std::path::Path;

pub use llm::{
    AnthropicProtocolConfig, ApiProviderConfig, LlmConfig, LlmProtocolsConfig, LlmProviderConfig, ModelConfig,
    ModelFilter, OpenAiProtocolConfig, ProviderType, ProxyConfig, ProxyProviderConfig,
};
use serde::Deserialize;
pub use server::{AuthConfig, CorsConfig, ServerConfig};

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    pub server: ServerConfig,
    /// LLM configuration settings.
    pub llm: LlmConfig,
}

impl Config {
    /// Load configuration from a TOML file path, expanding dynamic string references and
    /// validating cross-field invariants.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration has at least one functional downstream.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate_has_downstreams(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                cors: None,
                auth: None,
            },
            llm: LlmConfig {
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
            },
        }
        "#);
    }
}
