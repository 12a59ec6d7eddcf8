use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Command-line arguments for the gateway binary.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, short, env = "CONDUIT_CONFIG", default_value = "conduit.toml")]
    pub config: PathBuf,

    /// Overrides the listen address configured in the config file.
    #[arg(long, env = "CONDUIT_LISTEN_ADDRESS")]
    pub listen_address: Option<SocketAddr>,

    /// Log filter string, e.g. "info" or "llm=debug,server=info".
    #[arg(long, env = "CONDUIT_LOG", default_value = "info")]
    pub log: String,
}
