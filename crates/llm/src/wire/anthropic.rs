//! Translates between the Anthropic Messages wire format and the canonical model, for the
//! gateway's own Anthropic-compatible front end.

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
    system: Option<SystemPrompt>,
    #[serde(default)]
    messages: Vec<IncomingMessage>,
    #[serde(default)]
    tools: Vec<IncomingTool>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct IncomingMessage {
    role: String,
    content: IncomingContent,
}

#[derive(Debug, Deserialize)]
struct IncomingTool {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    input_schema: Value,
}

/// `system` may be a bare string or an array of text blocks, matching Anthropic's own
/// request shape.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Deserialize)]
struct SystemBlock {
    #[serde(default)]
    text: Option<String>,
}

fn system_text(value: &SystemPrompt) -> Option<String> {
    match value {
        SystemPrompt::Text(text) => Some(text.clone()),
        SystemPrompt::Blocks(blocks) => {
            let joined = blocks.iter().filter_map(|b| b.text.as_deref()).collect::<Vec<_>>().join("\n");
            if joined.is_empty() { None } else { Some(joined) }
        }
    }
}

/// Message `content` may be a bare string (a shorthand for a single text block) or an array of
/// typed content blocks.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IncomingContent {
    Text(String),
    Blocks(Vec<IncomingBlock>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IncomingBlock {
    Text { text: String },
    Image { source: ImageSource },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        is_error: bool,
        #[serde(default)]
        content: ToolResultContent,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    Thinking {
        thinking: String,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ImageSource {
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    data: String,
}

/// Tool result `content` may be a bare string or an array of text parts.
#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum ToolResultContent {
    #[default]
    Empty,
    Text(String),
    Parts(Vec<ToolResultPart>),
}

#[derive(Debug, Deserialize)]
struct ToolResultPart {
    #[serde(default)]
    text: String,
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Empty => String::new(),
            ToolResultContent::Text(text) => text,
            ToolResultContent::Parts(parts) => parts.into_iter().map(|part| part.text).collect(),
        }
    }
}

fn decode_user_content(content: IncomingContent) -> (Vec<UserContent>, Vec<Message>) {
    let mut user_blocks = Vec::new();
    let mut tool_results = Vec::new();

    let blocks = match content {
        IncomingContent::Text(text) => return (vec![UserContent::Text { text }], Vec::new()),
        IncomingContent::Blocks(blocks) => blocks,
    };

    for block in blocks {
        match block {
            IncomingBlock::Text { text } => user_blocks.push(UserContent::Text { text }),
            IncomingBlock::Image { source } => {
                user_blocks.push(UserContent::Image { mime_type: source.media_type, data: source.data })
            }
            IncomingBlock::ToolResult { tool_use_id, is_error, content } => {
                tool_results.push(Message::ToolResult {
                    tool_call_id: tool_use_id,
                    tool_name: String::new(),
                    is_error,
                    content: vec![TextBlock { text: content.into_text() }],
                });
            }
            IncomingBlock::ToolUse { .. } | IncomingBlock::Thinking { .. } | IncomingBlock::Unknown => {}
        }
    }

    (user_blocks, tool_results)
}

fn decode_assistant_content(content: IncomingContent) -> Vec<AssistantContent> {
    let IncomingContent::Blocks(blocks) = content else { return Vec::new() };

    blocks
        .into_iter()
        .filter_map(|block| match block {
            IncomingBlock::Text { text } => Some(AssistantContent::Text { text }),
            IncomingBlock::Thinking { thinking } => Some(AssistantContent::Thinking { text: thinking }),
            IncomingBlock::ToolUse { id, name, input } => {
                let arguments: BTreeMap<String, Value> = input.as_object().cloned().unwrap_or_default().into_iter().collect();
                Some(AssistantContent::ToolCall { id, name, arguments })
            }
            IncomingBlock::Image { .. } | IncomingBlock::ToolResult { .. } | IncomingBlock::Unknown => None,
        })
        .collect()
}

/// Decodes an Anthropic Messages-shaped request body into a canonical model name, context, and
/// options.
pub fn decode_request(body: &[u8]) -> Result<(String, Context, StreamOptions), LlmError> {
    let request: IncomingRequest =
        serde_json::from_slice(body).map_err(|err| LlmError::RequestBuildError(err.to_string()))?;

    let mut messages = Vec::with_capacity(request.messages.len());

    for message in request.messages {
        match message.role.as_str() {
            "user" => {
                let (content, tool_results) = decode_user_content(message.content);
                if !content.is_empty() {
                    messages.push(Message::User { content });
                }
                messages.extend(tool_results);
            }
            "assistant" => {
                messages.push(Message::Assistant { content: decode_assistant_content(message.content) });
            }
            _ => {}
        }
    }

    let tools = request
        .tools
        .into_iter()
        .map(|tool| crate::canonical::ToolDeclaration {
            name: tool.name,
            description: tool.description,
            parameters: tool.input_schema,
        })
        .collect();

    let options = StreamOptions {
        max_output_tokens: request.max_tokens,
        temperature: request.temperature,
        ..Default::default()
    };

    Ok((
        request.model,
        Context { system_prompt: request.system.as_ref().and_then(system_text), messages, tools },
        options,
    ))
}

/// Encodes one canonical `StreamEvent` as the Anthropic SSE frames it corresponds to: an event
/// name and its JSON payload. Most events map to exactly one frame; `Done` maps to two
/// (`message_delta` then `message_stop`), matching Anthropic's own framing.
pub fn encode_event(message_id: &str, event: &StreamEvent) -> Vec<(&'static str, Value)> {
    let partial = event.partial();

    match event {
        StreamEvent::Start { .. } => vec![(
            "message_start",
            json!({
                "type": "message_start",
                "message": {
                    "id": message_id,
                    "type": "message",
                    "role": "assistant",
                    "content": [],
                    "model": partial.model,
                    "stop_reason": Value::Null,
                    "usage": { "input_tokens": partial.usage.input_tokens, "output_tokens": 0 },
                },
            }),
        )],
        StreamEvent::TextStart { index, .. } => {
            vec![("content_block_start", json!({ "type": "content_block_start", "index": index, "content_block": { "type": "text", "text": "" } }))]
        }
        StreamEvent::TextDelta { index, delta, .. } => {
            vec![("content_block_delta", json!({ "type": "content_block_delta", "index": index, "delta": { "type": "text_delta", "text": delta } }))]
        }
        StreamEvent::ThinkingStart { index, .. } => {
            vec![("content_block_start", json!({ "type": "content_block_start", "index": index, "content_block": { "type": "thinking", "thinking": "" } }))]
        }
        StreamEvent::ThinkingDelta { index, delta, .. } => {
            vec![("content_block_delta", json!({ "type": "content_block_delta", "index": index, "delta": { "type": "thinking_delta", "thinking": delta } }))]
        }
        StreamEvent::ToolCallStart { index, id, name, .. } => vec![(
            "content_block_start",
            json!({ "type": "content_block_start", "index": index, "content_block": { "type": "tool_use", "id": id, "name": name, "input": {} } }),
        )],
        StreamEvent::ToolCallDelta { index, delta, .. } => {
            vec![("content_block_delta", json!({ "type": "content_block_delta", "index": index, "delta": { "type": "input_json_delta", "partial_json": delta } }))]
        }
        StreamEvent::TextEnd { index, .. } | StreamEvent::ThinkingEnd { index, .. } | StreamEvent::ToolCallEnd { index, .. } => {
            vec![("content_block_stop", json!({ "type": "content_block_stop", "index": index }))]
        }
        StreamEvent::Done { .. } => {
            let stop_reason = match partial.stop_reason {
                Some(StopReason::Stop) => "end_turn",
                Some(StopReason::Length) => "max_tokens",
                Some(StopReason::Tool) => "tool_use",
                Some(StopReason::Other { ref value }) => value.as_str(),
                None => "end_turn",
            };

            vec![
                (
                    "message_delta",
                    json!({
                        "type": "message_delta",
                        "delta": { "stop_reason": stop_reason, "stop_sequence": Value::Null },
                        "usage": { "output_tokens": partial.usage.output_tokens },
                    }),
                ),
                ("message_stop", json!({ "type": "message_stop" })),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_system_string_and_user_text() {
        let body = br#"{
            "model": "claude-3-5-sonnet",
            "system": "be terse",
            "messages": [{"role": "user", "content": "hi"}]
        }"#;

        let (model, context, _options) = decode_request(body).unwrap();
        assert_eq!(model, "claude-3-5-sonnet");
        assert_eq!(context.system_prompt.as_deref(), Some("be terse"));
        assert_eq!(context.messages.len(), 1);
    }

    #[test]
    fn decodes_tool_result_block_into_tool_result_message() {
        let body = br#"{
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "call_1", "content": "ok"}
            ]}]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        assert!(matches!(context.messages[0], Message::ToolResult { .. }));
    }

    #[test]
    fn tool_result_is_error_flag_survives_decode() {
        let body = br#"{
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": [
                {"type": "tool_result", "tool_use_id": "call_1", "is_error": true, "content": [{"type": "text", "text": "boom"}]}
            ]}]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        match &context.messages[0] {
            Message::ToolResult { is_error, content, .. } => {
                assert!(is_error);
                assert_eq!(content[0].text, "boom");
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[test]
    fn unknown_block_type_is_skipped_not_rejected() {
        let body = br#"{
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "assistant", "content": [
                {"type": "redacted_thinking", "data": "opaque"},
                {"type": "text", "text": "hi"}
            ]}]
        }"#;

        let (_model, context, _options) = decode_request(body).unwrap();
        match &context.messages[0] {
            Message::Assistant { content } => assert_eq!(content.len(), 1),
            other => panic!("expected assistant message, got {other:?}"),
        }
    }

    #[test]
    fn done_event_emits_delta_then_stop() {
        let message = crate::canonical::AssistantMessage::empty("anthropic", "claude-3-5-sonnet", 0);
        let event = StreamEvent::Done { partial: message };
        let frames = encode_event("msg_1", &event);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "message_delta");
        assert_eq!(frames[1].0, "message_stop");
    }
}
