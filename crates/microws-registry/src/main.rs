//! Microws Registry Binary
//!
//! Runs the namespace directory until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use microws_registry::{Registry, RegistryConfig, DEFAULT_PORT};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "microws-registry", version, about = "Namespace registry for microws agents")]
struct Cli {
    /// Interface to bind
    #[arg(long, env = "MICROWS_REGISTRY_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "MICROWS_REGISTRY_PORT", default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Host announced when the registry dials agents
    #[arg(long, env = "MICROWS_REGISTRY_ANNOUNCE_HOST", default_value = "127.0.0.1")]
    announce_host: String,
}

impl From<Cli> for RegistryConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            announce_host: cli.announce_host,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RegistryConfig::from(Cli::parse());
    info!("Starting microws registry on {}:{}", config.host, config.port);

    let registry = Registry::start(config)
        .await
        .context("Failed to start registry")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Registry shutting down");
    registry.terminate().await;
    Ok(())
}
