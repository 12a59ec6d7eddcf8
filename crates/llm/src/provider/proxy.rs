//! Client-side proxy adapter — the "fifth provider". Wraps another instance of this gateway's
//! canonical proxy endpoint and presents it as an ordinary `Provider`, so one deployment can
//! delegate to another (e.g. a regional gateway forwarding to a central one) without the caller
//! knowing the difference.

use std::sync::Arc;

use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::mpsc;

use super::{Provider, STREAM_BUFFER, StreamHandle};
use crate::{
    canonical::{AssistantMessage, Context, StreamEvent, StreamOptions},
    error::LlmError,
    sse,
};

#[derive(Serialize)]
struct ProxyEnvelope<'a> {
    model: &'a str,
    context: &'a Context,
    options: &'a StreamOptions,
}

/// Calls another gateway instance's canonical proxy endpoint and re-exposes its event stream
/// locally.
pub struct ProxyProvider {
    name: String,
    client: reqwest::Client,
    endpoint: String,
    bearer_token: Option<SecretString>,
}

impl ProxyProvider {
    pub fn new(name: String, client: reqwest::Client, endpoint: String, bearer_token: Option<SecretString>) -> Self {
        Self { name, client, endpoint, bearer_token }
    }
}

#[async_trait::async_trait]
impl Provider for ProxyProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream(
        self: Arc<Self>,
        model: String,
        context: Context,
        options: StreamOptions,
    ) -> Result<StreamHandle, LlmError> {
        let mut request = self.client.post(&self.endpoint).json(&ProxyEnvelope { model: &model, context: &context, options: &options });

        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::StatusError { status, body });
        }

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let handle = tokio::spawn(async move {
            let mut stream = Box::pin(sse::read(response));
            let mut last: Option<AssistantMessage> = None;

            while let Some(event) = stream.next().await {
                let event = event?;
                let parsed: StreamEvent = serde_json::from_str(&event.data)
                    .map_err(|err| LlmError::DecodeError(format!("invalid canonical event from upstream proxy: {err}")))?;

                last = Some(parsed.partial().clone());
                let is_done = matches!(parsed, StreamEvent::Done { .. });
                let _ = tx.send(parsed).await;
                if is_done {
                    break;
                }
            }

            last.ok_or_else(|| LlmError::DecodeError("upstream proxy closed the stream without a Done event".to_string()))
        });

        Ok((rx, handle))
    }
}
