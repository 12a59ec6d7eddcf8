//! The provider-agnostic LLM streaming core: a canonical message/event model, four vendor
//! adapters (Anthropic, OpenAI Chat Completions, OpenAI Responses, Google Gemini), a proxy
//! adapter that lets one gateway delegate to another, and the OpenAI-/Anthropic-compatible front
//! ends and canonical proxy endpoint that expose them over HTTP.

#![deny(missing_docs)]

pub mod canonical;
pub mod error;
mod http_client;
pub mod provider;
mod routes;
mod routing;
mod sse;
mod stream_builder;
pub mod wire;

use std::sync::Arc;

use axum::{Router, routing::post};
use config::{Config, LlmProviderConfig, ProviderType};

use crate::{
    provider::{
        Provider, anthropic::AnthropicProvider, google::GoogleProvider, openai_chat::OpenAiChatProvider,
        openai_responses::OpenAiResponsesProvider, proxy::ProxyProvider,
    },
    routes::AppState,
    routing::ProviderRegistry,
};

fn default_base_url(provider_type: ProviderType) -> &'static str {
    match provider_type {
        ProviderType::Anthropic => "https://api.anthropic.com",
        ProviderType::Openai | ProviderType::OpenaiResponses => "https://api.openai.com/v1",
        ProviderType::Google => "https://generativelanguage.googleapis.com/v1beta",
        ProviderType::Proxy => "",
    }
}

fn build_provider(key: &str, config: &LlmProviderConfig, client: reqwest::Client) -> Arc<dyn Provider> {
    let proxy = match config {
        LlmProviderConfig::Proxy(proxy) => proxy,
        LlmProviderConfig::Anthropic(api) => {
            let base_url = api.base_url.clone().unwrap_or_else(|| default_base_url(ProviderType::Anthropic).to_string());
            return Arc::new(AnthropicProvider::new(key.to_string(), client, base_url, api.api_key.clone()));
        }
        LlmProviderConfig::Openai(api) => {
            let base_url = api.base_url.clone().unwrap_or_else(|| default_base_url(ProviderType::Openai).to_string());
            return Arc::new(OpenAiChatProvider::new(key.to_string(), client, base_url, api.api_key.clone()));
        }
        LlmProviderConfig::OpenaiResponses(api) => {
            let base_url = api.base_url.clone().unwrap_or_else(|| default_base_url(ProviderType::OpenaiResponses).to_string());
            return Arc::new(OpenAiResponsesProvider::new(key.to_string(), client, base_url, api.api_key.clone()));
        }
        LlmProviderConfig::Google(api) => {
            let base_url = api.base_url.clone().unwrap_or_else(|| default_base_url(ProviderType::Google).to_string());
            return Arc::new(GoogleProvider::new(key.to_string(), client, base_url, api.api_key.clone()));
        }
    };

    Arc::new(ProxyProvider::new(key.to_string(), client, proxy.endpoint.clone(), proxy.token.clone()))
}

/// Builds the `axum::Router` serving every LLM endpoint enabled in `config`: the OpenAI- and
/// Anthropic-compatible passthrough front ends and the canonical proxy endpoint, all dispatching
/// to the configured provider adapters.
pub async fn router(config: &Config) -> anyhow::Result<Router> {
    let client = http_client::build()?;

    let mut builder = ProviderRegistry::builder();
    for (key, provider_config) in &config.llm.providers {
        let provider = build_provider(key, provider_config, client.clone());
        builder = builder.register(key.clone(), provider, provider_config);
    }

    let registry = builder.build();
    let proxy_token = config.server.auth.as_ref().map(|auth| auth.token.clone());
    let state = Arc::new(AppState { registry, proxy_token });

    let mut router = Router::new();

    if config.llm.protocols.openai.enabled {
        router = router.route(&config.llm.protocols.openai.path, post(routes::openai_handler));
    }

    if config.llm.protocols.anthropic.enabled {
        router = router.route(&config.llm.protocols.anthropic.path, post(routes::anthropic_handler));
    }

    if config.llm.proxy.enabled {
        router = router.route(&config.llm.proxy.path, post(routes::proxy_handler));
    }

    Ok(router.with_state(state))
}
