//! The provider-agnostic data model: messages, content blocks, tool declarations, options,
//! stream events, usage, and stop reasons. Pure data, no I/O — every adapter translates its own
//! wire format to and from these types.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single message in a conversation, tagged by role.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// A message from the human side of the conversation.
    User { content: Vec<UserContent> },
    /// A message produced by the model.
    Assistant { content: Vec<AssistantContent> },
    /// The result of executing a previously requested tool call.
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
        content: Vec<TextBlock>,
    },
}

/// Content blocks a user message may contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UserContent {
    Text { text: String },
    Image { mime_type: String, data: String },
}

/// Content blocks an assistant message (or a streaming partial) may contain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantContent {
    Text { text: String },
    Thinking { text: String },
    ToolCall {
        id: String,
        name: String,
        arguments: BTreeMap<String, Value>,
    },
}

/// A plain text block, used for tool-result content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
}

/// Declares a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// The request envelope: system prompt, ordered messages, and tool declarations.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Context {
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub tools: Vec<ToolDeclaration>,
}

/// Requested reasoning depth, translated per-provider into an effort level or a token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ThinkingLevel {
    #[default]
    Off,
    Minimal,
    Low,
    Medium,
    High,
    Xhigh,
}

/// Cache retention policy for providers that support prompt caching breakpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheRetention {
    #[default]
    None,
    Ephemeral,
}

/// Per-level overrides for thinking token budgets. Absent levels fall back to the adapter's
/// built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThinkingBudgets {
    pub minimal: Option<u32>,
    pub low: Option<u32>,
    pub medium: Option<u32>,
    pub high: Option<u32>,
    pub xhigh: Option<u32>,
}

/// Request-scoped options controlling a single `Stream` call.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamOptions {
    /// API key to use for this call. Never logged or included in `Debug` output.
    #[serde(skip_serializing, default)]
    pub api_key: Option<SecretString>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f32>,
    #[serde(default)]
    pub thinking_level: ThinkingLevel,
    #[serde(default)]
    pub thinking_budgets: ThinkingBudgets,
    #[serde(default)]
    pub cache_retention: CacheRetention,
}

/// Token accounting for a single completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StopReason {
    Stop,
    Length,
    Tool,
    /// A provider-specific value with no canonical equivalent, passed through verbatim.
    Other { value: String },
}

/// The finalized assistant turn, also used as the running snapshot embedded in every
/// `StreamEvent`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    pub model: String,
    pub provider: String,
    pub stop_reason: Option<StopReason>,
    pub usage: Usage,
    /// Creation timestamp, milliseconds since the Unix epoch.
    pub created_at_ms: i64,
}

impl AssistantMessage {
    pub fn empty(provider: &str, model: &str, created_at_ms: i64) -> Self {
        Self {
            content: Vec::new(),
            model: model.to_string(),
            provider: provider.to_string(),
            stop_reason: None,
            usage: Usage::default(),
            created_at_ms,
        }
    }
}

/// One incremental event in a model's response stream. Every variant carries a snapshot of the
/// partial `AssistantMessage` as it stands after this event; the snapshot is an independent
/// copy that later events never mutate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Start { partial: AssistantMessage },
    TextStart { index: usize, partial: AssistantMessage },
    TextDelta { index: usize, delta: String, partial: AssistantMessage },
    TextEnd { index: usize, partial: AssistantMessage },
    ThinkingStart { index: usize, partial: AssistantMessage },
    ThinkingDelta { index: usize, delta: String, partial: AssistantMessage },
    ThinkingEnd { index: usize, partial: AssistantMessage },
    ToolCallStart { index: usize, id: String, name: String, partial: AssistantMessage },
    ToolCallDelta { index: usize, delta: String, partial: AssistantMessage },
    ToolCallEnd { index: usize, partial: AssistantMessage },
    Done { partial: AssistantMessage },
}

impl StreamEvent {
    /// The partial message snapshot carried by every variant.
    pub fn partial(&self) -> &AssistantMessage {
        match self {
            Self::Start { partial }
            | Self::TextStart { partial, .. }
            | Self::TextDelta { partial, .. }
            | Self::TextEnd { partial, .. }
            | Self::ThinkingStart { partial, .. }
            | Self::ThinkingDelta { partial, .. }
            | Self::ThinkingEnd { partial, .. }
            | Self::ToolCallStart { partial, .. }
            | Self::ToolCallDelta { partial, .. }
            | Self::ToolCallEnd { partial, .. }
            | Self::Done { partial } => partial,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_role_tag_round_trips() {
        let message = Message::ToolResult {
            tool_call_id: "call_1".to_string(),
            tool_name: "bash".to_string(),
            is_error: false,
            content: vec![TextBlock { text: "ok".to_string() }],
        };

        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""role":"tool_result""#));

        let round_tripped: Message = serde_json::from_str(&json).unwrap();
        assert!(matches!(round_tripped, Message::ToolResult { .. }));
    }

    #[test]
    fn stream_event_partial_is_independent_of_later_mutation() {
        let first = AssistantMessage::empty("openai", "gpt-4o", 0);
        let event = StreamEvent::Start { partial: first.clone() };

        let mut second = first;
        second.content.push(AssistantContent::Text { text: "hi".to_string() });

        assert!(event.partial().content.is_empty());
    }
}
