//! Translates between the OpenAI Chat Completions wire format and the canonical model, for the
//! gateway's own OpenAI-compatible front end.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    canonical::{AssistantContent, Context, Message, StopReason, StreamEvent, StreamOptions, TextBlock, UserContent},
    error::LlmError,
};

#[derive(Debug, Deserialize)]
struct IncomingRequest {
    model: String,
    #[serde(default)]
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    tools: Vec<IncomingTool>,
    max_tokens: Option<u32>,
    max_completion_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    #[serde(default)]
    content: Option<IncomingContent>,
    #[serde(default)]
    tool_calls: Vec<IncomingToolCall>,
    tool_call_id: Option<String>,
}

/// Message `content` may be a bare string or an array of typed parts (text, image).
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IncomingContent {
    Text(String),
    Parts(Vec<IncomingPart>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IncomingPart {
    Text { text: String },
    ImageUrl { image_url: IncomingImageUrl },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct IncomingImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct IncomingToolCall {
    id: String,
    function: IncomingFunctionCall,
}

#[derive(Debug, Deserialize)]
struct IncomingFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct IncomingTool {
    function: IncomingToolDeclaration,
}

#[derive(Debug, Deserialize)]
struct IncomingToolDeclaration {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    parameters: Value,
}

fn text_content(content: IncomingContent) -> Vec<UserContent> {
    match content {
        IncomingContent::Text(text) => vec![UserContent::Text { text }],
        IncomingContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                IncomingPart::Text { text } => Some(UserContent::Text { text }),
                IncomingPart::ImageUrl { image_url } => {
                    let (mime_type, data) = split_data_url(&image_url.url);
                    Some(UserContent::Image { mime_type, data })
                }
                IncomingPart::Unknown => None,
            })
            .collect(),
    }
}

fn split_data_url(url: &str) -> (String, String) {
    match url.strip_prefix("data:").and_then(|rest| rest.split_once(";base64,")) {
        Some((mime, data)) => (mime.to_string(), data.to_string()),
        None => (String::new(), url.to_string()),
    }
}

/// Decodes an OpenAI Chat Completions-shaped request body into a canonical model name, context,
/// and options. Options not expressible in this wire format (thinking level, cache retention)
/// keep their defaults.
pub fn decode_request(body: &[u8]) -> Result<(String, Context, StreamOptions), LlmError> {
    let request: IncomingRequest =
        serde_json::from_slice(body).map_err(|err| LlmError::RequestBuildError(err.to_string()))?;

    let mut system_prompt = None;
    let mut messages = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        match message.role.as_str() {
            "system" | "developer" => {
                if let Some(IncomingContent::Text(text)) = message.content {
                    system_prompt = Some(text);
                }
            }
            "user" => {
                let content = message.content.map(text_content).unwrap_or_default();
                messages.push(Message::User { content });
            }
            "assistant" => {
                let mut content = Vec::new();
                if let Some(IncomingContent::Text(text)) = &message.content {
                    if !text.is_empty() {
                        content.push(AssistantContent::Text { text: text.clone() });
                    }
                }
                for call in message.tool_calls {
                    let arguments: BTreeMap<String, Value> = serde_json::from_str(&call.function.arguments).unwrap_or_default();
                    content.push(AssistantContent::ToolCall { id: call.id, name: call.function.name, arguments });
                }
                messages.push(Message::Assistant { content });
            }
            "tool" => {
                let text = match message.content {
                    Some(IncomingContent::Text(text)) => text,
                    _ => String::new(),
                };
                messages.push(Message::ToolResult {
                    tool_call_id: message.tool_call_id.unwrap_or_default(),
                    tool_name: String::new(),
                    is_error: false,
                    content: vec![TextBlock { text }],
                });
            }
            _ => {}
        }
    }

    let tools = request
        .tools
        .into_iter()
        .map(|tool| crate::canonical::ToolDeclaration {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters,
        })
        .collect();

    let options = StreamOptions {
        max_output_tokens: request.max_completion_tokens.or(request.max_tokens),
        temperature: request.temperature,
        ..Default::default()
    };

    Ok((request.model, Context { system_prompt, messages, tools }, options))
}

/// Encodes one canonical `StreamEvent` as an OpenAI `chat.completion.chunk` JSON object.
pub fn encode_event(stream_id: &str, created_at_s: i64, event: &StreamEvent) -> Value {
    let partial = event.partial();
    let mut delta = serde_json::Map::new();
    let mut finish_reason = Value::Null;

    match event {
        StreamEvent::Start { .. } => {
            delta.insert("role".to_string(), json!("assistant"));
        }
        StreamEvent::TextDelta { delta: text, .. } => {
            delta.insert("content".to_string(), json!(text));
        }
        StreamEvent::ToolCallStart { index, id, name, .. } => {
            delta.insert(
                "tool_calls".to_string(),
                json!([{ "index": index, "id": id, "type": "function", "function": { "name": name, "arguments": "" } }]),
            );
        }
        StreamEvent::ToolCallDelta { index, delta: args, .. } => {
            delta.insert(
                "tool_calls".to_string(),
                json!([{ "index": index, "function": { "arguments": args } }]),
            );
        }
        StreamEvent::Done { .. } => {
            finish_reason = json!(match partial.stop_reason {
                Some(StopReason::Stop) => "stop",
                Some(StopReason::Length) => "length",
                Some(StopReason::Tool) => "tool_calls",
                Some(StopReason::Other { .. }) | None => "stop",
            });
        }
        _ => {}
    }

    json!({
        "id": stream_id,
        "object": "chat.completion.chunk",
        "created": created_at_s,
        "model": partial.model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
    })
}

/// The SSE terminator OpenAI clients expect after the final chunk.
pub const DONE_MARKER: &str = "[DONE]";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_system_and_user_messages() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "user", "content": "hi"}
            ]
        }"#;

        let (model, context, _options) = decode_request(body).unwrap();
        assert_eq!(model, "gpt-4o");
        assert_eq!(context.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(context.messages.len(), 1);
    }

    #[test]
    fn decodes_assistant_tool_calls() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [
                {"role": "assistant", "content": "", "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"}}
                ]}
            ]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        match &context.messages[0] {
            Message::Assistant { content } => match &content[0] {
                AssistantContent::ToolCall { name, arguments, .. } => {
                    assert_eq!(name, "lookup");
                    assert_eq!(arguments.get("q").unwrap(), "rust");
                }
                other => panic!("expected tool call, got {other:?}"),
            },
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn decodes_user_image_part_as_data_url() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "text", "text": "what is this"},
                {"type": "image_url", "image_url": {"url": "data:image/png;base64,abc123"}}
            ]}]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        match &context.messages[0] {
            Message::User { content } => {
                assert_eq!(content.len(), 2);
                match &content[1] {
                    UserContent::Image { mime_type, data } => {
                        assert_eq!(mime_type, "image/png");
                        assert_eq!(data, "abc123");
                    }
                    other => panic!("expected image part, got {other:?}"),
                }
            }
            other => panic!("expected user message, got {other:?}"),
        }
    }

    #[test]
    fn unknown_part_type_is_skipped_not_rejected() {
        let body = br#"{
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": [
                {"type": "input_audio", "input_audio": {"data": "x", "format": "wav"}},
                {"type": "text", "text": "hi"}
            ]}]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        match &context.messages[0] {
            Message::User { content } => assert_eq!(content.len(), 1),
            other => panic!("expected user message, got {other:?}"),
        }
    }
}
