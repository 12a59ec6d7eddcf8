//! Adapter for the OpenAI Chat Completions API (`POST /v1/chat/completions`, `stream: true`).
//!
//! Unlike Anthropic, Chat Completions does not index content blocks — text arrives as a single
//! running delta and tool calls are keyed by a small per-response `tool_calls[].index`. This
//! adapter assigns each a canonical content-block index the first time it appears and keeps the
//! mapping locally for the rest of the stream.

use std::{collections::HashMap, sync::Arc};

use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Provider, STREAM_BUFFER, StreamHandle};
use crate::{
    canonical::{AssistantContent, Context, Message, StopReason, StreamOptions, TextBlock, Usage, UserContent},
    error::LlmError,
    sse,
    stream_builder::MessageBuilder,
};

fn user_content(content: &[UserContent]) -> Value {
    if content.len() == 1 {
        if let UserContent::Text { text } = &content[0] {
            return json!(text);
        }
    }

    json!(
        content
            .iter()
            .map(|block| match block {
                UserContent::Text { text } => json!({ "type": "text", "text": text }),
                UserContent::Image { mime_type, data } => json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data}") },
                }),
            })
            .collect::<Vec<_>>()
    )
}

fn build_messages(context: &Context) -> Vec<Value> {
    let mut messages = Vec::with_capacity(context.messages.len() + 1);

    if let Some(system) = &context.system_prompt {
        messages.push(json!({ "role": "system", "content": system }));
    }

    for message in &context.messages {
        match message {
            Message::User { content } => {
                messages.push(json!({ "role": "user", "content": user_content(content) }));
            }
            Message::Assistant { content } => {
                let text: String = content
                    .iter()
                    .filter_map(|block| match block {
                        AssistantContent::Text { text } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect();

                let tool_calls: Vec<Value> = content
                    .iter()
                    .filter_map(|block| match block {
                        AssistantContent::ToolCall { id, name, arguments } => Some(json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": serde_json::to_string(arguments).unwrap_or_default(),
                            },
                        })),
                        _ => None,
                    })
                    .collect();

                let mut entry = json!({ "role": "assistant", "content": text });
                if !tool_calls.is_empty() {
                    entry["tool_calls"] = json!(tool_calls);
                }
                messages.push(entry);
            }
            Message::ToolResult { tool_call_id, content, .. } => {
                let text = content.iter().map(|TextBlock { text }| text.as_str()).collect::<Vec<_>>().join("");
                messages.push(json!({ "role": "tool", "tool_call_id": tool_call_id, "content": text }));
            }
        }
    }

    messages
}

fn build_request_body(model: &str, context: &Context, options: &StreamOptions) -> Value {
    let mut body = json!({
        "model": model,
        "messages": build_messages(context),
        "stream": true,
        "stream_options": { "include_usage": true },
    });

    if !context.tools.is_empty() {
        body["tools"] = json!(
            context
                .tools
                .iter()
                .map(|tool| json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    },
                }))
                .collect::<Vec<_>>()
        );
    }

    if let Some(max_tokens) = options.max_output_tokens {
        body["max_completion_tokens"] = json!(max_tokens);
    }

    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }

    body
}

fn map_finish_reason(value: &str) -> StopReason {
    match value {
        "stop" => StopReason::Stop,
        "length" => StopReason::Length,
        "tool_calls" => StopReason::Tool,
        other => StopReason::Other { value: other.to_string() },
    }
}

/// One `data:` chunk of a Chat Completions stream.
#[derive(Debug, Default, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    usage: Option<ChunkUsage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkToolCall {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<ChunkFunctionCall>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    prompt_tokens_details: Option<PromptTokensDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

/// Adapter for OpenAI's Chat Completions API.
pub struct OpenAiChatProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
}

impl OpenAiChatProvider {
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
impl Provider for OpenAiChatProvider {
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

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
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
            let mut usage = Usage::default();
            let mut text_index: Option<usize> = None;
            let mut tool_index_map: HashMap<u64, usize> = HashMap::new();
            let mut next_index = 0usize;

            builder.start(&tx).await;

            while let Some(event) = stream.next().await {
                let event = event?;
                if event.data.trim() == "[DONE]" {
                    break;
                }

                let chunk: ChatCompletionChunk = match sonic_rs::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                if let Some(chunk_usage) = &chunk.usage {
                    usage.input_tokens = chunk_usage.prompt_tokens;
                    usage.output_tokens = chunk_usage.completion_tokens;
                    usage.total_tokens = chunk_usage.total_tokens;
                    usage.cache_read_tokens =
                        chunk_usage.prompt_tokens_details.as_ref().map(|details| details.cached_tokens).unwrap_or(0);
                }

                let Some(choice) = chunk.choices.into_iter().next() else { continue };

                if let Some(text) = &choice.delta.content {
                    if !text.is_empty() {
                        let index = *text_index.get_or_insert_with(|| {
                            let index = next_index;
                            next_index += 1;
                            index
                        });
                        if builder.content_at(index).is_none() {
                            builder.text_start(&tx, index).await;
                        }
                        builder.text_delta(&tx, index, text).await;
                    }
                }

                for call in &choice.delta.tool_calls {
                    let index = *tool_index_map.entry(call.index).or_insert_with(|| {
                        let index = next_index;
                        next_index += 1;
                        index
                    });

                    if builder.content_at(index).is_none() {
                        let id = call.id.as_deref().unwrap_or_default();
                        let name = call.function.as_ref().and_then(|f| f.name.as_deref()).unwrap_or_default();
                        builder.tool_call_start(&tx, index, id, name).await;
                    }

                    if let Some(arguments) = call.function.as_ref().and_then(|f| f.arguments.as_deref()) {
                        builder.tool_call_delta(&tx, index, arguments).await;
                    }
                }

                if let Some(finish_reason) = &choice.finish_reason {
                    builder.set_stop_reason(map_finish_reason(finish_reason));

                    if let Some(index) = text_index {
                        builder.text_end(&tx, index).await;
                    }
                    for index in tool_index_map.values() {
                        builder.tool_call_end(&tx, *index).await;
                    }
                }
            }

            builder.set_usage(usage);
            builder.finish(&tx).await
        });

        Ok((rx, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canonical::{Context, Message as CanonicalMessage};

    #[test]
    fn single_text_block_serializes_as_bare_string() {
        let content = vec![UserContent::Text { text: "hi".to_string() }];
        assert_eq!(user_content(&content), json!("hi"));
    }

    #[test]
    fn assistant_message_with_tool_call_includes_tool_calls_array() {
        let context = Context {
            system_prompt: None,
            messages: vec![CanonicalMessage::Assistant {
                content: vec![AssistantContent::ToolCall {
                    id: "call_1".to_string(),
                    name: "lookup".to_string(),
                    arguments: Default::default(),
                }],
            }],
            tools: Vec::new(),
        };

        let messages = build_messages(&context);
        assert!(messages[0]["tool_calls"].is_array());
    }

    #[test]
    fn chunk_parses_tool_call_delta() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"lookup","arguments":"{\"q\":"}}]},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = sonic_rs::from_str(data).unwrap();
        let call = &chunk.choices[0].delta.tool_calls[0];
        assert_eq!(call.index, 0);
        assert_eq!(call.id.as_deref(), Some("call_1"));
        assert_eq!(call.function.as_ref().unwrap().name.as_deref(), Some("lookup"));
    }

    #[test]
    fn chunk_parses_usage_with_cached_tokens() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":10,"completion_tokens":5,"total_tokens":15,"prompt_tokens_details":{"cached_tokens":4}}}"#;
        let chunk: ChatCompletionChunk = sonic_rs::from_str(data).unwrap();
        let usage = chunk.usage.unwrap();
        assert_eq!(usage.prompt_tokens, 10);
        assert_eq!(usage.prompt_tokens_details.unwrap().cached_tokens, 4);
    }

    #[test]
    fn chunk_with_missing_fields_defaults_gracefully() {
        let data = r#"{"choices":[{"delta":{}}]}"#;
        let chunk: ChatCompletionChunk = sonic_rs::from_str(data).unwrap();
        assert!(chunk.choices[0].delta.content.is_none());
        assert!(chunk.choices[0].delta.tool_calls.is_empty());
        assert!(chunk.usage.is_none());
    }
}
