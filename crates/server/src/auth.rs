//! Shared-secret bearer authentication for the LLM and proxy endpoints.
//!
//! Replaces per-request OAuth/JWT verification with a single configured token compared in
//! constant time, matching §4.8's "shared bearer token, 401 on mismatch or missing" contract.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{Request, Response, StatusCode, header};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use subtle::ConstantTimeEq;
use tower::Layer;

/// Installs shared-bearer-token authentication in front of a service. `None` leaves the
/// wrapped service open (no auth configured).
#[derive(Clone)]
pub struct AuthLayer(Option<Arc<SecretString>>);

impl AuthLayer {
    pub fn new(token: Option<SecretString>) -> Self {
        Self(token.map(Arc::new))
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            token: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<Service> {
    next: Service,
    token: Option<Arc<SecretString>>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let token = self.token.clone();

        Box::pin(async move {
            let Some(token) = token else {
                return next.call(req).await;
            };

            match req.headers().get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
                Some(value) if matches_bearer(value, token.expose_secret()) => next.call(req).await,
                _ => Ok(unauthorized_response()),
            }
        })
    }
}

fn matches_bearer(header_value: &str, expected: &str) -> bool {
    match header_value.strip_prefix("Bearer ") {
        Some(presented) => presented.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

fn unauthorized_response() -> Response<Body> {
    #[derive(Serialize)]
    struct ErrorResponse {
        error: &'static str,
    }

    let body = serde_json::to_string(&ErrorResponse { error: "unauthorized" })
        .unwrap_or_else(|_| r#"{"error":"unauthorized"}"#.to_string());

    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, "Bearer")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_correct_bearer_token() {
        assert!(matches_bearer("Bearer secret-token", "secret-token"));
    }

    #[test]
    fn rejects_wrong_token() {
        assert!(!matches_bearer("Bearer wrong-token", "secret-token"));
    }

    #[test]
    fn rejects_missing_bearer_prefix() {
        assert!(!matches_bearer("secret-token", "secret-token"));
    }
}
