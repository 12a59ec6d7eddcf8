//! Error types and the HTTP error envelopes returned to clients of the OpenAI- and
//! Anthropic-compatible front ends.

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;

/// Errors that can occur while building a request to, streaming from, or decoding the response
/// of an upstream provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The canonical request could not be translated into a valid upstream request.
    #[error("failed to build upstream request: {0}")]
    RequestBuildError(String),

    /// The HTTP request to the upstream provider failed below the HTTP layer (DNS, TLS,
    /// connection reset, timeout).
    #[error("transport error contacting upstream: {0}")]
    TransportError(#[from] reqwest::Error),

    /// The upstream responded with a non-2xx status.
    #[error("upstream returned status {status}: {body}")]
    StatusError { status: StatusCode, body: String },

    /// A chunk of the upstream response could not be decoded (malformed SSE, unexpected JSON
    /// shape, unknown event type).
    #[error("failed to decode upstream response: {0}")]
    DecodeError(String),

    /// The upstream stream closed on an error event after emitting some data.
    #[error("upstream terminated the stream with an error: {0}")]
    UpstreamTerminalError(String),

    /// The request was cancelled before it completed.
    #[error("request was cancelled")]
    CancellationError,

    /// No provider is configured for the requested model.
    #[error("no provider configured for model '{0}'")]
    UnknownModel(String),

    /// The caller's bearer token did not match the configured secret.
    #[error("unauthorized")]
    Unauthorized,
}

impl LlmError {
    /// Maps this error to the HTTP status code reported to the client, per the gateway's
    /// terminal-error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::RequestBuildError(_) => StatusCode::BAD_REQUEST,
            Self::TransportError(_) => StatusCode::BAD_GATEWAY,
            Self::StatusError { status, .. } => *status,
            Self::DecodeError(_) => StatusCode::BAD_GATEWAY,
            Self::UpstreamTerminalError(_) => StatusCode::BAD_GATEWAY,
            Self::CancellationError => StatusCode::BAD_GATEWAY,
            Self::UnknownModel(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
        }
    }

    /// The message shown to clients. Upstream body content is included since it often carries
    /// actionable detail (rate limits, invalid parameters); transport-level detail is redacted
    /// to a generic message so internal hostnames and stack detail never leak.
    pub fn client_message(&self) -> String {
        match self {
            Self::TransportError(_) => "failed to contact upstream provider".to_string(),
            Self::DecodeError(_) | Self::UpstreamTerminalError(_) => {
                "upstream provider returned an invalid response".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct OpenAiErrorBody {
    error: OpenAiErrorDetail,
}

#[derive(Serialize)]
struct OpenAiErrorDetail {
    message: String,
    r#type: &'static str,
    code: &'static str,
}

#[derive(Serialize)]
struct AnthropicErrorBody {
    r#type: &'static str,
    error: AnthropicErrorDetail,
}

#[derive(Serialize)]
struct AnthropicErrorDetail {
    r#type: &'static str,
    message: String,
}

fn error_kind(status: StatusCode) -> &'static str {
    if status == StatusCode::UNAUTHORIZED {
        "authentication_error"
    } else if status == StatusCode::NOT_FOUND {
        "not_found_error"
    } else if status.is_client_error() {
        "invalid_request_error"
    } else {
        "api_error"
    }
}

/// Wraps an `LlmError` for rendering as an OpenAI-shaped `{"error": {...}}` response body.
pub struct OpenAiError(pub LlmError);

impl IntoResponse for OpenAiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = OpenAiErrorBody {
            error: OpenAiErrorDetail {
                message: self.0.client_message(),
                r#type: error_kind(status),
                code: "upstream_error",
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Wraps an `LlmError` for rendering as an Anthropic-shaped `{"type": "error", ...}` response
/// body.
pub struct AnthropicError(pub LlmError);

impl IntoResponse for AnthropicError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let body = AnthropicErrorBody {
            r#type: "error",
            error: AnthropicErrorDetail {
                r#type: error_kind(status),
                message: self.0.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_passes_through_upstream_status() {
        let err = LlmError::StatusError {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: "rate limited".to_string(),
        };

        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn transport_error_message_is_redacted() {
        let err = LlmError::DecodeError("unexpected field `foo`".to_string());
        assert_eq!(err.client_message(), "upstream provider returned an invalid response");
    }
}
