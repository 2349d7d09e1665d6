use clipsync_relay::config::ServerConfig;
use clipsync_relay::ClipSyncServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = if let Ok(path) = std::env::var("CLIPSYNC_CONFIG_PATH") {
        ServerConfig::from_toml(path)?
    } else {
        ServerConfig::from_env()?
    };

    // RUST_LOG, if set, always wins; otherwise DEBUG (spec §6) selects
    // between a verbose and a quiet default directive.
    let default_directive = if config.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive)))
        .init();

    let server = ClipSyncServer::new(config)?;
    server.start().await?;

    Ok(())
}
