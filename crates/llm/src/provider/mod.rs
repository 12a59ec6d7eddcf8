//! The `Provider` contract every vendor adapter implements, plus model routing that resolves a
//! requested model name to a configured provider instance.

pub mod anthropic;
pub mod google;
pub mod openai_chat;
pub mod openai_responses;
pub mod proxy;

use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    canonical::{AssistantMessage, Context, StreamEvent, StreamOptions},
    error::LlmError,
};

/// Channel depth for the event stream returned by `Provider::stream`. Deep enough to absorb a
/// burst of text deltas without the adapter blocking on a slow consumer, shallow enough that a
/// stalled consumer pushes back quickly instead of buffering an entire response in memory.
pub const STREAM_BUFFER: usize = 64;

/// Receiver half of a started stream, paired with the task producing it. The caller must drain
/// the receiver to completion (even after an error) so the producer task can exit; dropping the
/// receiver early cancels the in-flight request.
pub type StreamHandle = (mpsc::Receiver<StreamEvent>, JoinHandle<Result<AssistantMessage, LlmError>>);

/// Current time in milliseconds since the Unix epoch, used to stamp `AssistantMessage`s.
pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Implemented by every vendor adapter (and by the proxy adapter, which forwards to another
/// instance of this gateway speaking the canonical wire protocol).
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// The provider's configured name, used for routing and reported on `AssistantMessage`.
    fn name(&self) -> &str;

    /// Starts a streaming completion. Spawns exactly one producer task that emits `StreamEvent`s
    /// on the returned channel and resolves the join handle with the final `AssistantMessage`
    /// once the stream ends (or with an error if the upstream call failed).
    async fn stream(
        self: Arc<Self>,
        model: String,
        context: Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LlmError>;
}
