mod args;

use anyhow::Context as _;
use args::Args;
use clap::Parser;
use tokio_util::sync::CancellationToken;

const DEFAULT_LISTEN_ADDRESS: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::Config::load(&args.config).context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let listen_address = args
        .listen_address
        .or(config.server.listen_address)
        .unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.parse().expect("valid default listen address"));

    let shutdown_signal = CancellationToken::new();
    let shutdown_on_ctrl_c = shutdown_signal.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        shutdown_on_ctrl_c.cancel();
    });

    server::serve(server::ServeConfig {
        listen_address,
        config,
        shutdown_signal,
        log_filter: args.log,
        version: env!("CARGO_PKG_VERSION").to_string(),
        bound_addr_sender: None,
    })
    .await
}
