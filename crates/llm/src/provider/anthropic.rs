//! Adapter for the Anthropic Messages API (`POST /v1/messages`, `stream: true`).
//!
//! Anthropic indexes content blocks explicitly (`content_block_start`/`_delta`/`_stop` all carry
//! an `index`), so this adapter's SSE handling maps close to one-to-one onto
//! [`crate::stream_builder::MessageBuilder`].

use std::sync::Arc;

use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{Provider, STREAM_BUFFER, StreamHandle};
use crate::{
    canonical::{AssistantContent, Context, Message, StopReason, StreamOptions, ThinkingLevel, Usage, UserContent},
    error::LlmError,
    sse,
    stream_builder::MessageBuilder,
};

const DEFAULT_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;
const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

/// Default thinking token budgets per level, used when `StreamOptions::thinking_budgets` leaves
/// a level unset. Anthropic requires an explicit numeric budget rather than an abstract effort
/// tier, so these map the canonical levels onto concrete `budget_tokens` values.
fn default_budget(level: ThinkingLevel) -> Option<u32> {
    match level {
        ThinkingLevel::Off => None,
        ThinkingLevel::Minimal => Some(1_024),
        ThinkingLevel::Low => Some(4_096),
        ThinkingLevel::Medium => Some(16_000),
        ThinkingLevel::High => Some(32_000),
        ThinkingLevel::Xhigh => Some(64_000),
    }
}

/// Some newer Claude models accept thinking budgets above the original 32k ceiling; older ones
/// reject a budget higher than their hard cap. Rather than hardcode a model table we clamp by a
/// substring match on the generation marker in the model id.
fn budget_ceiling(model: &str) -> u32 {
    if model.contains("claude-opus-4") || model.contains("claude-sonnet-4") || model.contains("-4-") {
        128_000
    } else {
        32_000
    }
}

/// True for the model families that support the newer adaptive-effort thinking mode rather than
/// an explicit token budget.
fn supports_adaptive_thinking(model: &str) -> bool {
    ["opus-4-6", "opus-4.6", "sonnet-4-6", "sonnet-4.6"].iter().any(|marker| model.contains(marker))
}

/// Adaptive thinking's `effort` tier for a canonical thinking level. `max` is reserved for
/// opus-4.6 at the `xhigh` level; every other model falls back to `high` at that level.
fn adaptive_effort(model: &str, level: ThinkingLevel) -> Option<&'static str> {
    match level {
        ThinkingLevel::Off => None,
        ThinkingLevel::Minimal | ThinkingLevel::Low => Some("low"),
        ThinkingLevel::Medium => Some("medium"),
        ThinkingLevel::High => Some("high"),
        ThinkingLevel::Xhigh => {
            if model.contains("opus-4-6") || model.contains("opus-4.6") {
                Some("max")
            } else {
                Some("high")
            }
        }
    }
}

fn thinking_config(model: &str, options: &StreamOptions) -> Option<Value> {
    if options.thinking_level == ThinkingLevel::Off {
        return None;
    }

    if supports_adaptive_thinking(model) {
        let effort = adaptive_effort(model, options.thinking_level)?;
        return Some(json!({ "type": "adaptive", "effort": effort }));
    }

    let budget = match options.thinking_level {
        ThinkingLevel::Off => return None,
        ThinkingLevel::Minimal => options.thinking_budgets.minimal,
        ThinkingLevel::Low => options.thinking_budgets.low,
        ThinkingLevel::Medium => options.thinking_budgets.medium,
        ThinkingLevel::High => options.thinking_budgets.high,
        ThinkingLevel::Xhigh => options.thinking_budgets.xhigh,
    }
    .or_else(|| default_budget(options.thinking_level))?;

    let budget = budget.min(budget_ceiling(model));

    Some(json!({ "type": "enabled", "budget_tokens": budget }))
}

/// Synthesizes a tool-use id in the adapter's own fallback format, for the rare case where the
/// wire event omits one.
fn synthesize_tool_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("call_{}", &hex[..8])
}

fn user_content_block(content: &UserContent) -> Value {
    match content {
        UserContent::Text { text } => json!({ "type": "text", "text": text }),
        UserContent::Image { mime_type, data } => json!({
            "type": "image",
            "source": { "type": "base64", "media_type": mime_type, "data": data },
        }),
    }
}

fn assistant_content_block(content: &AssistantContent) -> Option<Value> {
    match content {
        AssistantContent::Text { text } => Some(json!({ "type": "text", "text": text })),
        AssistantContent::Thinking { text } => Some(json!({ "type": "thinking", "thinking": text })),
        AssistantContent::ToolCall { id, name, arguments } => Some(json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": arguments,
        })),
    }
}

fn apply_cache_control(mut value: Value) -> Value {
    if let Some(obj) = value.as_object_mut() {
        obj.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
    }
    value
}

fn build_messages(context: &Context) -> Vec<Value> {
    let mut messages = Vec::with_capacity(context.messages.len());

    for message in &context.messages {
        match message {
            Message::User { content } => {
                messages.push(json!({
                    "role": "user",
                    "content": content.iter().map(user_content_block).collect::<Vec<_>>(),
                }));
            }
            Message::Assistant { content } => {
                messages.push(json!({
                    "role": "assistant",
                    "content": content.iter().filter_map(assistant_content_block).collect::<Vec<_>>(),
                }));
            }
            Message::ToolResult { tool_call_id, is_error, content, .. } => {
                messages.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "is_error": is_error,
                        "content": content.iter().map(|b| b.text.clone()).collect::<Vec<_>>().join(""),
                    }],
                }));
            }
        }
    }

    messages
}

fn build_request_body(model: &str, context: &Context, options: &StreamOptions) -> Value {
    let mut messages = build_messages(context);
    if options.cache_retention == crate::canonical::CacheRetention::Ephemeral {
        if let Some(last) = messages.last_mut() {
            if let Some(blocks) = last.get_mut("content").and_then(Value::as_array_mut) {
                if let Some(last_block) = blocks.last_mut() {
                    *last_block = apply_cache_control(last_block.take());
                }
            }
        }
    }

    let mut body = json!({
        "model": model,
        "max_tokens": options.max_output_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
        "stream": true,
    });

    if let Some(system) = &context.system_prompt {
        body["system"] = json!(system);
    }

    if !context.tools.is_empty() {
        body["tools"] = json!(
            context
                .tools
                .iter()
                .map(|tool| json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.parameters,
                }))
                .collect::<Vec<_>>()
        );
    }

    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }

    if let Some(thinking) = thinking_config(model, options) {
        body["thinking"] = thinking;
    }

    body
}

fn map_stop_reason(value: &str) -> StopReason {
    match value {
        "end_turn" | "stop_sequence" => StopReason::Stop,
        "max_tokens" => StopReason::Length,
        "tool_use" => StopReason::Tool,
        other => StopReason::Other { value: other.to_string() },
    }
}

/// Server-sent event surface emitted by the Messages streaming API. Each serialized value maps
/// to a concrete SSE `event:` name; the payload itself repeats the name in a `type` field, which
/// is what this enum tags on.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart { message: StreamMessageStart },
    ContentBlockStart { index: usize, content_block: StreamContentBlock },
    ContentBlockDelta { index: usize, delta: StreamDelta },
    ContentBlockStop { index: usize },
    MessageDelta { delta: StreamMessageDelta, #[serde(default)] usage: Option<StreamUsage> },
    MessageStop,
    Ping,
    Error { error: StreamErrorPayload },
    /// Event types not yet modeled are forwarded here rather than rejected outright.
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
struct StreamMessageStart {
    #[serde(default)]
    usage: StreamUsage,
}

#[derive(Debug, Default, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_read_input_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamMessageDelta {
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorPayload {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamContentBlock {
    Text,
    Thinking,
    ToolUse {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        name: String,
    },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamDelta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    InputJsonDelta { partial_json: String },
    SignatureDelta { signature: String },
    #[serde(untagged)]
    Unknown(Value),
}

/// Adapter for Anthropic's Messages API.
pub struct AnthropicProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
}

impl AnthropicProvider {
    pub fn new(name: String, client: reqwest::Client, base_url: String, api_key: Option<secrecy::SecretString>) -> Self {
        Self { name, client, base_url, api_key }
    }

    fn resolve_key(&self, options: &StreamOptions) -> Result<String, LlmError> {
        options
            .api_key
            .as_ref()
            .or(self.api_key.as_ref())
            .map(|key| key.expose_secret().to_string())
            .ok_or_else(|| LlmError::RequestBuildError("no API key configured for provider".to_string()))
    }
}

#[async_trait::async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        self: Arc<Self>,
        model: String,
        context: Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LlmError> {
        let api_key = self.resolve_key(&options)?;
        let body = build_request_body(&model, &context, &options);

        let mut request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", DEFAULT_VERSION)
            .header("accept", "text/event-stream");

        if options.thinking_level != ThinkingLevel::Off {
            request = request.header("anthropic-beta", INTERLEAVED_THINKING_BETA);
        }

        let response = request.json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::StatusError { status, body });
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let provider_name = self.name.clone();

        let handle = tokio::spawn(async move {
            let mut builder = MessageBuilder::new(&provider_name, &model, super::now_ms());
            let mut stream = Box::pin(sse::read(response));
            let mut usage = Usage::default();

            builder.start(&tx).await;

            while let Some(event) = stream.next().await {
                let event = event?;
                let data: AnthropicStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                match data {
                    AnthropicStreamEvent::MessageStart { message } => {
                        usage.input_tokens = message.usage.input_tokens;
                        usage.cache_read_tokens = message.usage.cache_read_input_tokens;
                        usage.cache_write_tokens = message.usage.cache_creation_input_tokens;
                    }
                    AnthropicStreamEvent::ContentBlockStart { index, content_block } => match content_block {
                        StreamContentBlock::Text => builder.text_start(&tx, index).await,
                        StreamContentBlock::Thinking => builder.thinking_start(&tx, index).await,
                        StreamContentBlock::ToolUse { id, name } => {
                            let id = match id {
                                Some(id) if !id.is_empty() => id,
                                _ => synthesize_tool_id(),
                            };
                            builder.tool_call_start(&tx, index, &id, &name).await;
                        }
                        StreamContentBlock::Unknown(_) => {}
                    },
                    AnthropicStreamEvent::ContentBlockDelta { index, delta } => match delta {
                        StreamDelta::TextDelta { text } => builder.text_delta(&tx, index, &text).await,
                        StreamDelta::ThinkingDelta { thinking } => builder.thinking_delta(&tx, index, &thinking).await,
                        StreamDelta::InputJsonDelta { partial_json } => {
                            builder.tool_call_delta(&tx, index, &partial_json).await;
                        }
                        StreamDelta::SignatureDelta { .. } | StreamDelta::Unknown(_) => {}
                    },
                    AnthropicStreamEvent::ContentBlockStop { index } => match builder_block_kind(&builder, index) {
                        BlockKind::Text => builder.text_end(&tx, index).await,
                        BlockKind::Thinking => builder.thinking_end(&tx, index).await,
                        BlockKind::ToolCall => builder.tool_call_end(&tx, index).await,
                    },
                    AnthropicStreamEvent::MessageDelta { delta, usage: delta_usage } => {
                        if let Some(stop_reason) = delta.stop_reason {
                            builder.set_stop_reason(map_stop_reason(&stop_reason));
                        }
                        if let Some(delta_usage) = delta_usage {
                            usage.output_tokens = delta_usage.output_tokens;
                        }
                    }
                    AnthropicStreamEvent::MessageStop | AnthropicStreamEvent::Ping => {}
                    AnthropicStreamEvent::Error { error } => {
                        return Err(LlmError::UpstreamTerminalError(error.message));
                    }
                    AnthropicStreamEvent::Unknown(_) => {}
                }
            }

            usage.total_tokens = usage.input_tokens + usage.output_tokens;
            builder.set_usage(usage);
            builder.finish(&tx).await
        });

        Ok((rx, handle))
    }
}

enum BlockKind {
    Text,
    Thinking,
    ToolCall,
}

fn builder_block_kind(builder: &MessageBuilder, index: usize) -> BlockKind {
    match builder.content_at(index) {
        Some(AssistantContent::Thinking { .. }) => BlockKind::Thinking,
        Some(AssistantContent::ToolCall { .. }) => BlockKind::ToolCall,
        _ => BlockKind::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::StreamOptions;

    #[test]
    fn thinking_config_is_none_when_off() {
        let options = StreamOptions::default();
        assert!(thinking_config("claude-sonnet-4-5", &options).is_none());
    }

    #[test]
    fn thinking_config_uses_level_default_budget() {
        let mut options = StreamOptions::default();
        options.thinking_level = ThinkingLevel::High;
        let config = thinking_config("claude-sonnet-4-5", &options).unwrap();
        assert_eq!(config["budget_tokens"], 32_000);
    }

    #[test]
    fn thinking_budget_clamps_to_older_model_ceiling() {
        let mut options = StreamOptions::default();
        options.thinking_level = ThinkingLevel::Xhigh;
        let config = thinking_config("claude-3-5-sonnet", &options).unwrap();
        assert_eq!(config["budget_tokens"], 32_000);
    }

    #[test]
    fn cache_control_is_applied_to_last_content_block() {
        let block = json!({ "type": "text", "text": "hi" });
        let annotated = apply_cache_control(block);
        assert_eq!(annotated["cache_control"]["type"], "ephemeral");
    }

    #[test]
    fn adaptive_thinking_is_used_for_sonnet_4_6() {
        let mut options = StreamOptions::default();
        options.thinking_level = ThinkingLevel::Medium;
        let config = thinking_config("claude-sonnet-4-6", &options).unwrap();
        assert_eq!(config["type"], "adaptive");
        assert_eq!(config["effort"], "medium");
    }

    #[test]
    fn adaptive_thinking_max_effort_only_on_opus_4_6_xhigh() {
        let mut options = StreamOptions::default();
        options.thinking_level = ThinkingLevel::Xhigh;

        let opus = thinking_config("claude-opus-4-6", &options).unwrap();
        assert_eq!(opus["effort"], "max");

        let sonnet = thinking_config("claude-sonnet-4-6", &options).unwrap();
        assert_eq!(sonnet["effort"], "high");
    }

    #[test]
    fn tool_id_is_synthesized_when_missing() {
        let id = synthesize_tool_id();
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 8);
    }

    #[test]
    fn stream_event_parses_message_start_usage() {
        let raw = json!({
            "type": "message_start",
            "message": { "id": "msg_1", "usage": { "input_tokens": 12, "cache_read_input_tokens": 3 } },
        })
        .to_string();

        let event: AnthropicStreamEvent = sonic_rs::from_str(&raw).unwrap();
        let AnthropicStreamEvent::MessageStart { message } = event else { panic!("wrong variant") };
        assert_eq!(message.usage.input_tokens, 12);
        assert_eq!(message.usage.cache_read_input_tokens, 3);
    }

    #[test]
    fn stream_event_parses_input_json_delta() {
        let raw = json!({ "type": "content_block_delta", "index": 2, "delta": { "type": "input_json_delta", "partial_json": "{\"a\":" } }).to_string();

        let event: AnthropicStreamEvent = sonic_rs::from_str(&raw).unwrap();
        let AnthropicStreamEvent::ContentBlockDelta { index, delta } = event else { panic!("wrong variant") };
        assert_eq!(index, 2);
        assert!(matches!(delta, StreamDelta::InputJsonDelta { partial_json } if partial_json == "{\"a\":"));
    }

    #[test]
    fn stream_event_unknown_variant_is_forwarded_not_rejected() {
        let raw = json!({ "type": "some_future_event", "whatever": true }).to_string();
        let event: AnthropicStreamEvent = sonic_rs::from_str(&raw).unwrap();
        assert!(matches!(event, AnthropicStreamEvent::Unknown(_)));
    }
}
