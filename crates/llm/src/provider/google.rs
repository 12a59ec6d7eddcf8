//! Adapter for Google's Gemini `streamGenerateContent` API.
//!
//! Gemini streams whole `parts` arrays rather than per-block deltas: a function call arrives
//! complete in one part (no incremental arguments), while text and "thought" parts arrive as a
//! sequence of parts that should be coalesced into one running block for as long as consecutive
//! parts share the same kind. This adapter tracks the currently open block's kind locally and
//! only starts a new one when the kind changes or a function call interrupts it.

use std::sync::Arc;

use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Gemini returns function calls whole, with no id of its own. Synthesizes one from the
/// function's name, its position among this stream's tool calls, and a short random suffix to
/// keep ids unique across concurrent calls to the same function.
fn synthesize_function_call_id(name: &str, counter: u32) -> String {
    let suffix = &Uuid::new_v4().simple().to_string()[..4];
    format!("{name}_{counter}_{suffix}")
}

use super::{Provider, STREAM_BUFFER, StreamHandle};
use crate::{
    canonical::{AssistantContent, Context, Message, StopReason, StreamOptions, TextBlock, ThinkingLevel, Usage, UserContent},
    error::LlmError,
    sse,
    stream_builder::MessageBuilder,
};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OpenKind {
    Text,
    Thought,
}

fn default_budget(level: ThinkingLevel) -> Option<i64> {
    match level {
        ThinkingLevel::Off => None,
        ThinkingLevel::Minimal => Some(128),
        ThinkingLevel::Low => Some(2_048),
        ThinkingLevel::Medium => Some(8_192),
        ThinkingLevel::High => Some(24_576),
        ThinkingLevel::Xhigh => Some(24_576),
    }
}

fn thinking_config(options: &StreamOptions) -> Option<Value> {
    let budget = match options.thinking_level {
        ThinkingLevel::Off => return None,
        ThinkingLevel::Minimal => options.thinking_budgets.minimal,
        ThinkingLevel::Low => options.thinking_budgets.low,
        ThinkingLevel::Medium => options.thinking_budgets.medium,
        ThinkingLevel::High => options.thinking_budgets.high,
        ThinkingLevel::Xhigh => options.thinking_budgets.xhigh,
    }
    .map(i64::from)
    .or_else(|| default_budget(options.thinking_level))?;

    Some(json!({ "thinkingBudget": budget, "includeThoughts": true }))
}

/// Gemini's function-declaration schema rejects several JSON Schema keywords OpenAPI-derived
/// schemas commonly carry. Strips them recursively, and drops `format` unless it's one of the
/// two values Gemini actually understands.
fn sanitize_schema(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sanitized = Map::new();
            for (key, v) in map {
                match key.as_str() {
                    "additionalProperties" | "$schema" | "default" => continue,
                    "format" => {
                        if matches!(v.as_str(), Some("enum") | Some("date-time")) {
                            sanitized.insert(key.clone(), v.clone());
                        }
                    }
                    _ => {
                        sanitized.insert(key.clone(), sanitize_schema(v));
                    }
                }
            }
            Value::Object(sanitized)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn user_parts(content: &[UserContent]) -> Vec<Value> {
    content
        .iter()
        .map(|block| match block {
            UserContent::Text { text } => json!({ "text": text }),
            UserContent::Image { mime_type, data } => json!({
                "inlineData": { "mimeType": mime_type, "data": data },
            }),
        })
        .collect()
}

fn build_contents(context: &Context) -> Vec<Value> {
    let mut contents = Vec::with_capacity(context.messages.len());

    for message in &context.messages {
        match message {
            Message::User { content } => {
                contents.push(json!({ "role": "user", "parts": user_parts(content) }));
            }
            Message::Assistant { content } => {
                let parts: Vec<Value> = content
                    .iter()
                    .map(|block| match block {
                        AssistantContent::Text { text } => json!({ "text": text }),
                        AssistantContent::Thinking { text } => json!({ "text": text, "thought": true }),
                        AssistantContent::ToolCall { name, arguments, .. } => {
                            json!({ "functionCall": { "name": name, "args": arguments } })
                        }
                    })
                    .collect();
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Message::ToolResult { tool_name, content, is_error, .. } => {
                let text = content.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("");
                let response = if *is_error { json!({ "error": text }) } else { json!({ "output": text }) };
                contents.push(json!({
                    "role": "user",
                    "parts": [{ "functionResponse": { "name": tool_name, "response": response } }],
                }));
            }
        }
    }

    contents
}

fn build_request_body(context: &Context, options: &StreamOptions) -> Value {
    let mut body = json!({ "contents": build_contents(context) });

    if let Some(system) = &context.system_prompt {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }

    if !context.tools.is_empty() {
        body["tools"] = json!([{
            "functionDeclarations": context.tools.iter().map(|tool| json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": sanitize_schema(&tool.parameters),
            })).collect::<Vec<_>>(),
        }]);
    }

    let mut generation_config = serde_json::Map::new();
    if let Some(max_tokens) = options.max_output_tokens {
        generation_config.insert("maxOutputTokens".to_string(), json!(max_tokens));
    }
    if let Some(temperature) = options.temperature {
        generation_config.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(thinking) = thinking_config(options) {
        generation_config.insert("thinkingConfig".to_string(), thinking);
    }
    if !generation_config.is_empty() {
        body["generationConfig"] = Value::Object(generation_config);
    }

    body
}

fn map_finish_reason(value: &str) -> StopReason {
    match value {
        "MAX_TOKENS" => StopReason::Length,
        "TOOL_CODE" | "FUNCTION_CALL" => StopReason::Tool,
        _ => StopReason::Stop,
    }
}

/// One `streamGenerateContent` SSE chunk. Gemini doesn't discriminate chunk shape by a `type`
/// tag the way Anthropic does; a chunk carries `candidates` normally and `error` when the
/// request fails mid-stream, so both are modeled as optional fields on the same struct.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<StreamCandidate>,
    #[serde(default)]
    usage_metadata: Option<StreamUsageMetadata>,
    #[serde(default)]
    error: Option<StreamErrorPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamCandidate {
    #[serde(default)]
    content: Option<StreamContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamContent {
    #[serde(default)]
    parts: Vec<StreamPart>,
}

/// A part carries whichever of `text`/`thought`/`functionCall` applies; Gemini doesn't tag parts
/// by kind, it distinguishes them by which fields are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamPart {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(default)]
    function_call: Option<StreamFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamUsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    cached_content_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

#[derive(Debug, Deserialize)]
struct StreamErrorPayload {
    message: String,
}

/// Adapter for Google's Gemini `streamGenerateContent` API.
pub struct GoogleProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
}

impl GoogleProvider {
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
impl Provider for GoogleProvider {
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
        let body = build_request_body(&context, &options);

        let response = self
            .client
            .post(format!("{}/models/{model}:streamGenerateContent?alt=sse&key={api_key}", self.base_url))
            .json(&body)
            .send()
            .await?;

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
            let mut open: Option<(OpenKind, usize)> = None;
            let mut next_index = 0usize;
            let mut tool_call_counter = 0u32;

            builder.start(&tx).await;

            while let Some(event) = stream.next().await {
                let event = event?;
                let data: StreamChunk = match sonic_rs::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                if let Some(error) = data.error {
                    return Err(LlmError::UpstreamTerminalError(error.message));
                }

                let Some(candidate) = data.candidates.into_iter().next() else { continue };

                if let Some(content) = candidate.content {
                    for part in content.parts {
                        if let Some(function_call) = part.function_call {
                            if let Some((kind, index)) = open.take() {
                                close_block(&mut builder, &tx, kind, index).await;
                            }

                            let id = synthesize_function_call_id(&function_call.name, tool_call_counter);
                            tool_call_counter += 1;
                            let index = next_index;
                            next_index += 1;

                            builder.tool_call_start(&tx, index, &id, &function_call.name).await;
                            builder.tool_call_delta(&tx, index, &function_call.args.to_string()).await;
                            builder.tool_call_end(&tx, index).await;
                            continue;
                        }

                        let Some(text) = part.text else { continue };
                        let kind = if part.thought { OpenKind::Thought } else { OpenKind::Text };

                        let index = match open {
                            Some((open_kind, index)) if open_kind == kind => index,
                            _ => {
                                if let Some((prev_kind, prev_index)) = open.take() {
                                    close_block(&mut builder, &tx, prev_kind, prev_index).await;
                                }
                                let index = next_index;
                                next_index += 1;
                                match kind {
                                    OpenKind::Text => builder.text_start(&tx, index).await,
                                    OpenKind::Thought => builder.thinking_start(&tx, index).await,
                                }
                                open = Some((kind, index));
                                index
                            }
                        };

                        match kind {
                            OpenKind::Text => builder.text_delta(&tx, index, &text).await,
                            OpenKind::Thought => builder.thinking_delta(&tx, index, &text).await,
                        }
                    }
                }

                if let Some(finish_reason) = candidate.finish_reason {
                    if let Some((kind, index)) = open.take() {
                        close_block(&mut builder, &tx, kind, index).await;
                    }
                    builder.set_stop_reason(map_finish_reason(&finish_reason));
                }

                if let Some(usage_meta) = data.usage_metadata {
                    builder.set_usage(Usage {
                        input_tokens: usage_meta.prompt_token_count,
                        output_tokens: usage_meta.candidates_token_count,
                        cache_read_tokens: usage_meta.cached_content_token_count,
                        cache_write_tokens: 0,
                        total_tokens: usage_meta.total_token_count,
                    });
                }
            }

            builder.finish(&tx).await
        });

        Ok((rx, handle))
    }
}

async fn close_block(builder: &mut MessageBuilder, tx: &mpsc::Sender<crate::canonical::StreamEvent>, kind: OpenKind, index: usize) {
    match kind {
        OpenKind::Text => builder.text_end(tx, index).await,
        OpenKind::Thought => builder.thinking_end(tx, index).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_schema_drops_additional_properties_and_default() {
        let schema = json!({
            "type": "object",
            "additionalProperties": false,
            "default": {},
            "properties": {
                "name": { "type": "string", "default": "x", "format": "uuid" },
                "when": { "type": "string", "format": "date-time" },
            },
        });

        let sanitized = sanitize_schema(&schema);
        assert!(sanitized.get("additionalProperties").is_none());
        assert!(sanitized.get("default").is_none());
        assert!(sanitized["properties"]["name"].get("default").is_none());
        assert!(sanitized["properties"]["name"].get("format").is_none());
        assert_eq!(sanitized["properties"]["when"]["format"], "date-time");
    }

    #[test]
    fn thinking_config_none_when_off() {
        let options = StreamOptions::default();
        assert!(thinking_config(&options).is_none());
    }

    #[test]
    fn finish_reason_maps_tool_markers_to_tool() {
        assert_eq!(map_finish_reason("TOOL_CODE"), StopReason::Tool);
        assert_eq!(map_finish_reason("FUNCTION_CALL"), StopReason::Tool);
        assert_eq!(map_finish_reason("MAX_TOKENS"), StopReason::Length);
        assert_eq!(map_finish_reason("STOP"), StopReason::Stop);
        assert_eq!(map_finish_reason("SAFETY"), StopReason::Stop);
    }

    #[test]
    fn function_call_id_embeds_name_and_counter() {
        let id = synthesize_function_call_id("get_weather", 2);
        assert!(id.starts_with("get_weather_2_"));
        assert_eq!(id.len(), "get_weather_2_".len() + 4);
    }

    #[test]
    fn tool_result_reports_output_or_error_by_is_error() {
        let ok = Message::ToolResult {
            tool_call_id: "1".to_string(),
            tool_name: "lookup".to_string(),
            is_error: false,
            content: vec![TextBlock { text: "42".to_string() }],
        };
        let err = Message::ToolResult {
            tool_call_id: "2".to_string(),
            tool_name: "lookup".to_string(),
            is_error: true,
            content: vec![TextBlock { text: "boom".to_string() }],
        };

        let context = Context { system_prompt: None, messages: vec![ok, err], tools: vec![] };
        let contents = build_contents(&context);

        assert_eq!(contents[0]["parts"][0]["functionResponse"]["response"]["output"], "42");
        assert!(contents[0]["parts"][0]["functionResponse"]["response"].get("error").is_none());
        assert_eq!(contents[1]["parts"][0]["functionResponse"]["response"]["error"], "boom");
    }

    #[test]
    fn stream_chunk_parses_function_call_part() {
        let raw = json!({
            "candidates": [{
                "content": { "parts": [{ "functionCall": { "name": "get_weather", "args": { "city": "nyc" } } }] },
                "finishReason": "STOP",
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15 },
        })
        .to_string();

        let chunk: StreamChunk = sonic_rs::from_str(&raw).unwrap();
        let candidate = &chunk.candidates[0];
        let part = &candidate.content.as_ref().unwrap().parts[0];
        let call = part.function_call.as_ref().unwrap();
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.args["city"], "nyc");
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(chunk.usage_metadata.unwrap().total_token_count, 15);
    }

    #[test]
    fn stream_chunk_parses_error_payload() {
        let raw = json!({ "error": { "message": "quota exceeded" } }).to_string();
        let chunk: StreamChunk = sonic_rs::from_str(&raw).unwrap();
        assert_eq!(chunk.error.unwrap().message, "quota exceeded");
    }
}
