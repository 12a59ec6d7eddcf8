//! Axum handlers mounted by [`crate::router`]: the OpenAI- and Anthropic-compatible passthrough
//! endpoints, and the canonical proxy endpoint.

use std::{convert::Infallible, sync::Arc};

use axum::{
    body::Bytes,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use secrecy::SecretString;

use crate::{
    canonical::{Context, StreamEvent, StreamOptions},
    error::{AnthropicError, LlmError, OpenAiError},
    routing::ProviderRegistry,
    wire,
};

/// Shared state for every mounted route.
pub struct AppState {
    pub registry: ProviderRegistry,
    /// Shared secret required on the canonical proxy endpoint, separate from the gateway's own
    /// inbound auth layer since a proxied call may cross a trust boundary the gateway itself
    /// doesn't sit behind.
    pub proxy_token: Option<SecretString>,
}

fn forwarded_key(headers: &http::HeaderMap) -> Option<SecretString> {
    headers
        .get("x-provider-key")
        .and_then(|value| value.to_str().ok())
        .map(|value| SecretString::from(value.to_string()))
}

fn drain(mut rx: tokio::sync::mpsc::Receiver<StreamEvent>) -> impl Stream<Item = StreamEvent> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

async fn resolve_and_start(
    state: &AppState,
    model: String,
    context: Context,
    mut options: StreamOptions,
    headers: &http::HeaderMap,
) -> Result<(tokio::sync::mpsc::Receiver<StreamEvent>, String), LlmError> {
    let route = state.registry.resolve(&model)?;

    if route.forward_token {
        if let Some(key) = forwarded_key(headers) {
            options.api_key = Some(key);
        }
    }

    let (rx, handle) = route.provider.clone().stream(route.wire_model, context, options).await?;

    tokio::spawn(async move {
        if let Ok(Err(err)) = handle.await {
            log::warn!("stream producer ended with error: {err}");
        }
    });

    Ok((rx, model))
}

/// `POST {openai path}`: an OpenAI Chat Completions-compatible streaming endpoint.
pub async fn openai_handler(
    State(state): State<Arc<AppState>>,
    headers: http::HeaderMap,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, OpenAiError> {
    let (model, context, options) = wire::openai::decode_request(&body).map_err(OpenAiError)?;

    let (rx, _model) = resolve_and_start(&state, model, context, options, &headers).await.map_err(OpenAiError)?;

    let stream_id = format!("chatcmpl-{}", uuid::Uuid::new_v4());
    let created_at_s = crate::provider::now_ms() / 1000;

    let events = drain(rx).flat_map(move |event| {
        let is_done = matches!(event, StreamEvent::Done { .. });
        let chunk = wire::openai::encode_event(&stream_id, created_at_s, &event);
        let frame = Ok(Event::default().data(chunk.to_string()));

        if is_done {
            futures::stream::iter(vec![frame, Ok(Event::default().data(wire::openai::DONE_MARKER))])
        } else {
            futures::stream::iter(vec![frame])
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// `POST {anthropic path}`: an Anthropic Messages-compatible streaming endpoint.
pub async fn anthropic_handler(
    State(state): State<Arc<AppState>>,
    headers: http::HeaderMap,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AnthropicError> {
    let (model, context, options) = wire::anthropic::decode_request(&body).map_err(AnthropicError)?;

    let (rx, _model) = resolve_and_start(&state, model, context, options, &headers).await.map_err(AnthropicError)?;

    let message_id = format!("msg_{}", uuid::Uuid::new_v4());

    let events = drain(rx).flat_map(move |event| {
        let frames = wire::anthropic::encode_event(&message_id, &event);
        futures::stream::iter(
            frames.into_iter().map(|(name, payload)| Ok(Event::default().event(name).data(payload.to_string()))).collect::<Vec<_>>(),
        )
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[derive(serde::Deserialize)]
struct ProxyRequest {
    model: String,
    context: Context,
    #[serde(default)]
    options: StreamOptions,
}

/// `POST {proxy path}`: the canonical-protocol proxy endpoint — the "fifth provider" other
/// gateway instances can call. Requires a bearer token matching `proxy_token` when configured.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    headers: http::HeaderMap,
    body: Bytes,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, OpenAiError> {
    if let Some(expected) = &state.proxy_token {
        use secrecy::ExposeSecret;
        use subtle::ConstantTimeEq;

        let presented = headers
            .get(http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let authorized = presented
            .map(|presented| presented.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into())
            .unwrap_or(false);

        if !authorized {
            return Err(OpenAiError(LlmError::Unauthorized));
        }
    }

    let request: ProxyRequest = serde_json::from_slice(&body).map_err(|err| OpenAiError(LlmError::RequestBuildError(err.to_string())))?;

    let (rx, _model) =
        resolve_and_start(&state, request.model, request.context, request.options, &headers).await.map_err(OpenAiError)?;

    let events = drain(rx)
        .map(|event| Ok(Event::default().data(serde_json::to_string(&event).unwrap_or_default())));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
