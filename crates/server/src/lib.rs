//! Server assembly: binds the HTTP listener, wires up CORS and bearer authentication, and
//! mounts the LLM router built from configuration.

#![deny(missing_docs)]

mod auth;
mod logger;

use std::net::SocketAddr;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::Router;
use config::Config;
use http::HeaderValue;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Configuration for serving the gateway.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to.
    pub listen_address: SocketAddr,
    /// The deserialized TOML configuration.
    pub config: Config,
    /// Cancellation token for graceful shutdown.
    pub shutdown_signal: CancellationToken,
    /// Log filter string (e.g., "info" or "llm=debug").
    pub log_filter: String,
    /// The version string to log on startup.
    pub version: String,
    /// Optional oneshot sender to send back the bound address (useful if port 0 was specified).
    pub bound_addr_sender: Option<tokio::sync::oneshot::Sender<SocketAddr>>,
}

/// Starts and runs the gateway with the provided configuration.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter,
        version,
        bound_addr_sender,
    }: ServeConfig,
) -> anyhow::Result<()> {
    logger::init(&log_filter);
    log::info!("gateway {version}");

    if !config.llm.enabled || (!config.llm.has_providers() && !config.llm.proxy.enabled) {
        log::warn!(
            "Server starting with no functional endpoints. \
            Configure LLM providers or enable the proxy endpoint to enable functionality."
        );
    }

    let cors = cors_layer(&config);
    let auth_token = config.server.auth.as_ref().map(|a| a.token.clone());

    let llm_router = llm::router(&config).await.map_err(|err| {
        log::error!("Failed to initialize LLM router: {err:?}");
        anyhow!("Failed to initialize LLM router: {err}")
    })?;

    let app = llm_router.layer(tower::ServiceBuilder::new().layer(cors).layer(AuthLayer::new(auth_token)));

    if config.llm.protocols.openai.enabled {
        log::info!("OpenAI endpoint: http://{listen_address}{}", config.llm.protocols.openai.path);
    }

    if config.llm.protocols.anthropic.enabled {
        log::info!(
            "Anthropic endpoint: http://{listen_address}{}",
            config.llm.protocols.anthropic.path
        );
    }

    if config.llm.proxy.enabled {
        log::info!("Proxy endpoint: http://{listen_address}{}", config.llm.proxy.path);
    }

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    if let Some(sender) = bound_addr_sender {
        sender
            .send(listener.local_addr()?)
            .expect("Failed to send back bound address.");
    }

    tokio::select! {
        result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()) => {
            result.map_err(|e| anyhow!("Failed to start HTTP server: {e}"))?;
        }
        _ = shutdown_signal.cancelled() => {
            log::info!("Received shutdown signal, shutting down gracefully...");
        }
    }

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    match &config.server.cors {
        Some(cors) if !cors.allow_origins.is_empty() => {
            let origins = cors
                .allow_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>();

            CorsLayer::new().allow_origin(origins).allow_methods(tower_http::cors::Any)
        }
        _ => CorsLayer::permissive(),
    }
}
