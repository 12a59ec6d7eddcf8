//! HTTP server configuration settings.

use std::net::SocketAddr;

use secrecy::SecretString;
use serde::Deserialize;

/// HTTP server configuration settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// CORS configuration. Absent means a permissive (allow-all) default.
    pub cors: Option<CorsConfig>,
    /// Shared-secret bearer authentication for the LLM and proxy endpoints.
    pub auth: Option<AuthConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            cors: None,
            auth: None,
        }
    }
}

/// CORS configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CorsConfig {
    /// Allowed origins. An empty list means any origin is allowed.
    pub allow_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { allow_origins: Vec::new() }
    }
}

/// Shared-secret bearer authentication, checked against the `Authorization` header.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// The shared token clients must present as `Authorization: Bearer <token>`.
    pub token: SecretString,
}
