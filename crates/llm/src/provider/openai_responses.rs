//! Adapter for the OpenAI Responses API (`POST /v1/responses`, `stream: true`).
//!
//! Responses keys every streamed delta by an `item_id` that only exists for the lifetime of the
//! stream, while tool calls are referenced elsewhere (and on replay) by a separate `call_id`. To
//! keep both addressable, tool-call content blocks get a synthesized id of the form
//! `"<call_id>|<item_id>"` rather than just one or the other.

use std::{collections::HashMap, sync::Arc};

use futures::StreamExt;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use super::{Provider, STREAM_BUFFER, StreamHandle};
use crate::{
    canonical::{AssistantContent, Context, Message, StopReason, StreamOptions, ThinkingLevel, Usage, UserContent},
    error::LlmError,
    sse,
    stream_builder::MessageBuilder,
};

fn reasoning_effort(level: ThinkingLevel) -> Option<&'static str> {
    match level {
        ThinkingLevel::Off => None,
        ThinkingLevel::Minimal | ThinkingLevel::Low => Some("low"),
        ThinkingLevel::Medium => Some("medium"),
        ThinkingLevel::High | ThinkingLevel::Xhigh => Some("high"),
    }
}

fn user_input_content(content: &[UserContent]) -> Vec<Value> {
    content
        .iter()
        .map(|block| match block {
            UserContent::Text { text } => json!({ "type": "input_text", "text": text }),
            UserContent::Image { mime_type, data } => json!({
                "type": "input_image",
                "image_url": format!("data:{mime_type};base64,{data}"),
            }),
        })
        .collect()
}

fn build_input(context: &Context) -> Vec<Value> {
    let mut input = Vec::with_capacity(context.messages.len());

    for message in &context.messages {
        match message {
            Message::User { content } => {
                input.push(json!({
                    "type": "message",
                    "role": "user",
                    "content": user_input_content(content),
                }));
            }
            Message::Assistant { content } => {
                for block in content {
                    match block {
                        AssistantContent::Text { text } => {
                            input.push(json!({
                                "type": "message",
                                "role": "assistant",
                                "content": [{ "type": "output_text", "text": text }],
                            }));
                        }
                        AssistantContent::ToolCall { id, name, arguments } => {
                            let (call_id, item_id) = split_compound_id(id);
                            let mut entry = json!({
                                "type": "function_call",
                                "call_id": call_id,
                                "name": name,
                                "arguments": serde_json::to_string(arguments).unwrap_or_default(),
                            });
                            if !item_id.is_empty() {
                                entry["id"] = json!(item_id);
                            }
                            input.push(entry);
                        }
                        AssistantContent::Thinking { .. } => {}
                    }
                }
            }
            Message::ToolResult { tool_call_id, content, .. } => {
                let (call_id, _item_id) = split_compound_id(tool_call_id);
                let output = content.iter().map(|b| b.text.as_str()).collect::<Vec<_>>().join("");
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output,
                }));
            }
        }
    }

    input
}

/// Splits the compound `"<call_id>|<item_id>"` id the adapter synthesizes on emission back into
/// its two parts. When the separator is absent, the whole string is treated as the call id and
/// the item id is empty.
fn split_compound_id(id: &str) -> (&str, &str) {
    match id.split_once('|') {
        Some((call_id, item_id)) => (call_id, item_id),
        None => (id, ""),
    }
}

fn build_request_body(model: &str, context: &Context, options: &StreamOptions) -> Value {
    let mut body = json!({
        "model": model,
        "input": build_input(context),
        "stream": true,
    });

    if let Some(system) = &context.system_prompt {
        body["instructions"] = json!(system);
    }

    if !context.tools.is_empty() {
        body["tools"] = json!(
            context
                .tools
                .iter()
                .map(|tool| json!({
                    "type": "function",
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }))
                .collect::<Vec<_>>()
        );
    }

    if let Some(max_tokens) = options.max_output_tokens {
        body["max_output_tokens"] = json!(max_tokens);
    }

    if let Some(temperature) = options.temperature {
        body["temperature"] = json!(temperature);
    }

    if let Some(effort) = reasoning_effort(options.thinking_level) {
        body["reasoning"] = json!({ "effort": effort, "summary": "auto" });
        body["include"] = json!(["reasoning.encrypted_content"]);
    }

    body
}

fn map_status(value: &str) -> StopReason {
    match value {
        "completed" => StopReason::Stop,
        "incomplete" => StopReason::Length,
        other => StopReason::Other { value: other.to_string() },
    }
}

/// A single server-sent event from a Responses stream, tagged by its `type` field. Event kinds
/// the adapter doesn't act on (e.g. `response.created`, `response.in_progress`) fall through to
/// `Unknown` rather than failing to parse.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseStreamEvent {
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: StreamItem },
    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: StreamItem },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { item_id: String, delta: String },
    #[serde(rename = "response.reasoning_summary_text.delta")]
    ReasoningSummaryTextDelta { item_id: String, delta: String },
    #[serde(rename = "response.reasoning_summary_part.done")]
    ReasoningSummaryPartDone { item_id: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { item_id: String, delta: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone { item_id: String },
    #[serde(rename = "response.completed")]
    Completed { response: StreamResponse },
    #[serde(rename = "response.failed")]
    Failed { response: StreamResponse },
    #[serde(rename = "error")]
    Error { message: Option<String> },
    #[serde(untagged)]
    Unknown(Value),
}

#[derive(Debug, Deserialize)]
struct StreamItem {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
    #[serde(default)]
    input_tokens_details: Option<InputTokensDetails>,
}

#[derive(Debug, Deserialize)]
struct InputTokensDetails {
    #[serde(default)]
    cached_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct StreamErrorDetail {
    message: String,
}

/// Adapter for OpenAI's Responses API.
pub struct OpenAiResponsesProvider {
    name: String,
    client: reqwest::Client,
    base_url: String,
    api_key: Option<secrecy::SecretString>,
}

impl OpenAiResponsesProvider {
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
impl Provider for OpenAiResponsesProvider {
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
            .post(format!("{}/responses", self.base_url))
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
            // item_id -> canonical content index, for every open text/reasoning/function_call item
            let mut item_index: HashMap<String, usize> = HashMap::new();
            let mut next_index = 0usize;

            builder.start(&tx).await;

            while let Some(event) = stream.next().await {
                let event = event?;
                let parsed: ResponseStreamEvent = match sonic_rs::from_str(&event.data) {
                    Ok(value) => value,
                    Err(_) => continue,
                };

                match parsed {
                    ResponseStreamEvent::OutputItemAdded { item } => match item.kind.as_str() {
                        "message" => {
                            let index = *item_index.entry(item.id).or_insert_with(|| {
                                let index = next_index;
                                next_index += 1;
                                index
                            });
                            builder.text_start(&tx, index).await;
                        }
                        "reasoning" => {
                            let index = *item_index.entry(item.id).or_insert_with(|| {
                                let index = next_index;
                                next_index += 1;
                                index
                            });
                            builder.thinking_start(&tx, index).await;
                        }
                        "function_call" => {
                            let call_id = item.call_id.as_deref().unwrap_or_default();
                            let name = item.name.as_deref().unwrap_or_default();
                            let compound_id = format!("{call_id}|{}", item.id);
                            let index = *item_index.entry(item.id.clone()).or_insert_with(|| {
                                let index = next_index;
                                next_index += 1;
                                index
                            });
                            builder.tool_call_start(&tx, index, &compound_id, name).await;
                        }
                        _ => {}
                    },
                    ResponseStreamEvent::OutputTextDelta { item_id, delta } => {
                        if let Some(&index) = item_index.get(&item_id) {
                            builder.text_delta(&tx, index, &delta).await;
                        }
                    }
                    ResponseStreamEvent::ReasoningSummaryTextDelta { item_id, delta } => {
                        if let Some(&index) = item_index.get(&item_id) {
                            builder.thinking_delta(&tx, index, &delta).await;
                        }
                    }
                    ResponseStreamEvent::ReasoningSummaryPartDone { item_id } => {
                        if let Some(&index) = item_index.get(&item_id) {
                            builder.thinking_delta(&tx, index, "\n\n").await;
                        }
                    }
                    ResponseStreamEvent::FunctionCallArgumentsDelta { item_id, delta } => {
                        if let Some(&index) = item_index.get(&item_id) {
                            builder.tool_call_delta(&tx, index, &delta).await;
                        }
                    }
                    ResponseStreamEvent::FunctionCallArgumentsDone { item_id } => {
                        if let Some(&index) = item_index.get(&item_id) {
                            builder.tool_call_end(&tx, index).await;
                        }
                    }
                    ResponseStreamEvent::OutputItemDone { item } => {
                        if let Some(&index) = item_index.get(&item.id) {
                            match item.kind.as_str() {
                                "message" => builder.text_end(&tx, index).await,
                                "reasoning" => builder.thinking_end(&tx, index).await,
                                _ => {}
                            }
                        }
                    }
                    ResponseStreamEvent::Completed { response } => {
                        if let Some(status) = &response.status {
                            builder.set_stop_reason(map_status(status));
                        }

                        let usage = Usage {
                            input_tokens: response.usage.as_ref().map(|u| u.input_tokens).unwrap_or(0),
                            output_tokens: response.usage.as_ref().map(|u| u.output_tokens).unwrap_or(0),
                            cache_read_tokens: response
                                .usage
                                .as_ref()
                                .and_then(|u| u.input_tokens_details.as_ref())
                                .map(|details| details.cached_tokens)
                                .unwrap_or(0),
                            cache_write_tokens: 0,
                            total_tokens: response.usage.as_ref().map(|u| u.total_tokens).unwrap_or(0),
                        };
                        builder.set_usage(usage);
                    }
                    ResponseStreamEvent::Failed { response } => {
                        return Err(LlmError::UpstreamTerminalError(
                            response.error.map(|e| e.message).unwrap_or_else(|| "unknown error".to_string()),
                        ));
                    }
                    ResponseStreamEvent::Error { message } => {
                        return Err(LlmError::UpstreamTerminalError(message.unwrap_or_else(|| "unknown error".to_string())));
                    }
                    ResponseStreamEvent::Unknown(_) => {}
                }
            }

            builder.finish(&tx).await
        });

        Ok((rx, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasoning_effort_caps_xhigh_to_high() {
        assert_eq!(reasoning_effort(ThinkingLevel::Xhigh), Some("high"));
        assert_eq!(reasoning_effort(ThinkingLevel::Off), None);
    }

    #[test]
    fn reasoning_effort_collapses_minimal_to_low() {
        assert_eq!(reasoning_effort(ThinkingLevel::Minimal), Some("low"));
        assert_eq!(reasoning_effort(ThinkingLevel::Low), Some("low"));
    }

    #[test]
    fn tool_call_input_uses_bare_call_id_from_compound() {
        let context = Context {
            system_prompt: None,
            messages: vec![Message::Assistant {
                content: vec![AssistantContent::ToolCall {
                    id: "call_abc|item_xyz".to_string(),
                    name: "lookup".to_string(),
                    arguments: Default::default(),
                }],
            }],
            tools: Vec::new(),
        };

        let input = build_input(&context);
        assert_eq!(input[0]["call_id"], "call_abc");
        assert_eq!(input[0]["id"], "item_xyz");
    }

    #[test]
    fn tool_call_input_without_compound_separator_has_no_item_id() {
        let context = Context {
            system_prompt: None,
            messages: vec![Message::Assistant {
                content: vec![AssistantContent::ToolCall {
                    id: "call_abc".to_string(),
                    name: "lookup".to_string(),
                    arguments: Default::default(),
                }],
            }],
            tools: Vec::new(),
        };

        let input = build_input(&context);
        assert_eq!(input[0]["call_id"], "call_abc");
        assert!(input[0].get("id").is_none());
    }

    #[test]
    fn tool_result_splits_compound_call_id() {
        let context = Context {
            system_prompt: None,
            messages: vec![Message::ToolResult {
                tool_call_id: "call_abc|item_xyz".to_string(),
                tool_name: "lookup".to_string(),
                is_error: false,
                content: vec![crate::canonical::TextBlock { text: "ok".to_string() }],
            }],
            tools: Vec::new(),
        };

        let input = build_input(&context);
        assert_eq!(input[0]["call_id"], "call_abc");
        assert_eq!(input[0]["type"], "function_call_output");
    }

    #[test]
    fn stream_event_parses_function_call_added() {
        let data = r#"{"type":"response.output_item.added","item":{"id":"item_1","type":"function_call","call_id":"call_1","name":"lookup"}}"#;
        let event: ResponseStreamEvent = sonic_rs::from_str(data).unwrap();
        match event {
            ResponseStreamEvent::OutputItemAdded { item } => {
                assert_eq!(item.kind, "function_call");
                assert_eq!(item.call_id.as_deref(), Some("call_1"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn stream_event_parses_completed_usage() {
        let data = r#"{"type":"response.completed","response":{"status":"completed","usage":{"input_tokens":10,"output_tokens":5,"total_tokens":15,"input_tokens_details":{"cached_tokens":2}}}}"#;
        let event: ResponseStreamEvent = sonic_rs::from_str(data).unwrap();
        match event {
            ResponseStreamEvent::Completed { response } => {
                assert_eq!(response.status.as_deref(), Some("completed"));
                assert_eq!(response.usage.unwrap().input_tokens_details.unwrap().cached_tokens, 2);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn stream_event_unknown_type_is_forwarded_not_rejected() {
        let data = r#"{"type":"response.in_progress","response":{"status":"in_progress"}}"#;
        let event: ResponseStreamEvent = sonic_rs::from_str(data).unwrap();
        assert!(matches!(event, ResponseStreamEvent::Unknown(_)));
    }
}
