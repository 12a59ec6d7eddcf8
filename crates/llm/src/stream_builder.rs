//! Shared accumulator used by every adapter to turn vendor-specific deltas into `StreamEvent`s
//! and a final `AssistantMessage`, without each adapter re-implementing snapshot bookkeeping.

use std::collections::BTreeMap;

use serde_json::Value;
use tokio::sync::mpsc::Sender;

use crate::{
    canonical::{AssistantContent, AssistantMessage, StopReason, StreamEvent, Usage},
    error::LlmError,
};

/// Accumulates one in-flight assistant turn and emits `StreamEvent`s on a channel as content
/// blocks open, grow, and close. Tool call arguments are buffered as raw JSON text and parsed
/// only once the block ends, since partial JSON is rarely valid.
pub struct MessageBuilder {
    message: AssistantMessage,
    raw_tool_args: BTreeMap<usize, String>,
}

impl MessageBuilder {
    pub fn new(provider: &str, model: &str, created_at_ms: i64) -> Self {
        Self {
            message: AssistantMessage::empty(provider, model, created_at_ms),
            raw_tool_args: BTreeMap::new(),
        }
    }

    /// Emits the initial `Start` event with an empty snapshot.
    pub async fn start(&self, tx: &Sender<StreamEvent>) {
        let _ = tx.send(StreamEvent::Start { partial: self.message.clone() }).await;
    }

    pub async fn text_start(&mut self, tx: &Sender<StreamEvent>, index: usize) {
        self.ensure_slot(index, AssistantContent::Text { text: String::new() });
        let _ = tx.send(StreamEvent::TextStart { index, partial: self.message.clone() }).await;
    }

    pub async fn text_delta(&mut self, tx: &Sender<StreamEvent>, index: usize, delta: &str) {
        if let Some(AssistantContent::Text { text }) = self.message.content.get_mut(index) {
            text.push_str(delta);
        }
        let _ = tx
            .send(StreamEvent::TextDelta { index, delta: delta.to_string(), partial: self.message.clone() })
            .await;
    }

    pub async fn text_end(&self, tx: &Sender<StreamEvent>, index: usize) {
        let _ = tx.send(StreamEvent::TextEnd { index, partial: self.message.clone() }).await;
    }

    pub async fn thinking_start(&mut self, tx: &Sender<StreamEvent>, index: usize) {
        self.ensure_slot(index, AssistantContent::Thinking { text: String::new() });
        let _ = tx.send(StreamEvent::ThinkingStart { index, partial: self.message.clone() }).await;
    }

    pub async fn thinking_delta(&mut self, tx: &Sender<StreamEvent>, index: usize, delta: &str) {
        if let Some(AssistantContent::Thinking { text }) = self.message.content.get_mut(index) {
            text.push_str(delta);
        }
        let _ = tx
            .send(StreamEvent::ThinkingDelta { index, delta: delta.to_string(), partial: self.message.clone() })
            .await;
    }

    pub async fn thinking_end(&self, tx: &Sender<StreamEvent>, index: usize) {
        let _ = tx.send(StreamEvent::ThinkingEnd { index, partial: self.message.clone() }).await;
    }

    pub async fn tool_call_start(&mut self, tx: &Sender<StreamEvent>, index: usize, id: &str, name: &str) {
        self.ensure_slot(
            index,
            AssistantContent::ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: BTreeMap::new(),
            },
        );
        self.raw_tool_args.insert(index, String::new());
        let _ = tx
            .send(StreamEvent::ToolCallStart {
                index,
                id: id.to_string(),
                name: name.to_string(),
                partial: self.message.clone(),
            })
            .await;
    }

    pub async fn tool_call_delta(&mut self, tx: &Sender<StreamEvent>, index: usize, delta: &str) {
        self.raw_tool_args.entry(index).or_default().push_str(delta);
        let _ = tx
            .send(StreamEvent::ToolCallDelta { index, delta: delta.to_string(), partial: self.message.clone() })
            .await;
    }

    /// Parses the buffered raw JSON for this tool call's arguments and installs it on the
    /// content block before emitting `ToolCallEnd`. An empty or malformed buffer yields an
    /// empty argument map rather than failing the whole stream.
    pub async fn tool_call_end(&mut self, tx: &Sender<StreamEvent>, index: usize) {
        let raw = self.raw_tool_args.remove(&index).unwrap_or_default();
        let parsed: BTreeMap<String, Value> = if raw.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&raw).unwrap_or_default()
        };

        if let Some(AssistantContent::ToolCall { arguments, .. }) = self.message.content.get_mut(index) {
            *arguments = parsed;
        }

        let _ = tx.send(StreamEvent::ToolCallEnd { index, partial: self.message.clone() }).await;
    }

    pub fn set_usage(&mut self, usage: Usage) {
        self.message.usage = usage;
    }

    pub fn set_stop_reason(&mut self, stop_reason: StopReason) {
        self.message.stop_reason = Some(stop_reason);
    }

    /// Emits the terminal `Done` event and returns the finished message.
    ///
    /// Before emitting, applies the cross-provider stop-reason override: a final message
    /// containing any `ToolCall` is reported as `StopReason::Tool` regardless of what the
    /// provider's raw value mapped to, unless that raw value was already `Length` (a
    /// length cutoff mid-tool-call still reports as a length cutoff).
    pub async fn finish(mut self, tx: &Sender<StreamEvent>) -> Result<AssistantMessage, LlmError> {
        let has_tool_call = self.message.content.iter().any(|block| matches!(block, AssistantContent::ToolCall { .. }));
        if has_tool_call && !matches!(self.message.stop_reason, Some(StopReason::Length)) {
            self.message.stop_reason = Some(StopReason::Tool);
        }

        let _ = tx.send(StreamEvent::Done { partial: self.message.clone() }).await;
        Ok(self.message)
    }

    /// The content block currently occupying `index`, if any. Adapters use this to tell which
    /// kind of "end" event to emit when a wire format signals block completion by index alone
    /// (e.g. Anthropic's `content_block_stop`) without repeating the block's type.
    pub fn content_at(&self, index: usize) -> Option<&AssistantContent> {
        self.message.content.get(index)
    }

    fn ensure_slot(&mut self, index: usize, block: AssistantContent) {
        if self.message.content.len() <= index {
            self.message.content.resize_with(index, || AssistantContent::Text { text: String::new() });
            self.message.content.push(block);
        } else {
            self.message.content[index] = block;
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;

    #[tokio::test]
    async fn accumulates_text_across_deltas() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut builder = MessageBuilder::new("openai", "gpt-4o", 0);

        builder.start(&tx).await;
        builder.text_start(&tx, 0).await;
        builder.text_delta(&tx, 0, "Hel").await;
        builder.text_delta(&tx, 0, "lo").await;
        builder.text_end(&tx, 0).await;
        builder.set_stop_reason(StopReason::Stop);
        let message = builder.finish(&tx).await.unwrap();
        drop(tx);

        assert!(matches!(&message.content[0], AssistantContent::Text { text } if text == "Hello"));

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn tool_call_present_overrides_stop_reason_to_tool() {
        let (tx, _rx) = mpsc::channel(8);
        let mut builder = MessageBuilder::new("openai", "gpt-4o", 0);

        builder.tool_call_start(&tx, 0, "call_1", "lookup").await;
        builder.tool_call_end(&tx, 0).await;
        builder.set_stop_reason(StopReason::Stop);
        let message = builder.finish(&tx).await.unwrap();

        assert_eq!(message.stop_reason, Some(StopReason::Tool));
    }

    #[tokio::test]
    async fn length_stop_reason_wins_over_tool_call_presence() {
        let (tx, _rx) = mpsc::channel(8);
        let mut builder = MessageBuilder::new("openai", "gpt-4o", 0);

        builder.tool_call_start(&tx, 0, "call_1", "lookup").await;
        builder.tool_call_end(&tx, 0).await;
        builder.set_stop_reason(StopReason::Length);
        let message = builder.finish(&tx).await.unwrap();

        assert_eq!(message.stop_reason, Some(StopReason::Length));
    }

    #[tokio::test]
    async fn tool_call_arguments_parse_at_end() {
        let (tx, _rx) = mpsc::channel(8);
        let mut builder = MessageBuilder::new("anthropic", "claude-3", 0);

        builder.tool_call_start(&tx, 0, "call_1", "lookup").await;
        builder.tool_call_delta(&tx, 0, r#"{"query":"#).await;
        builder.tool_call_delta(&tx, 0, r#""rust"}"#).await;
        builder.tool_call_end(&tx, 0).await;

        match &builder.message.content[0] {
            AssistantContent::ToolCall { arguments, .. } => {
                assert_eq!(arguments.get("query").unwrap(), "rust");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }
}
