//! Gateway entry point.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use m17_gateway::{server, Config};

#[derive(Parser, Debug)]
#[command(
    name = "m17-gateway",
    version,
    about = "Browser-to-M17 reflector gateway"
)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Override the reflector host file path
    #[arg(long)]
    host_file: Option<PathBuf>,

    /// Override the maximum number of concurrent sessions
    #[arg(long)]
    max_sessions: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(host_file) = args.host_file {
        config.reflector.host_file = Some(host_file);
    }
    if let Some(max_sessions) = args.max_sessions {
        config.server.max_sessions = max_sessions;
    }

    server::run(config).await?;
    Ok(())
}
