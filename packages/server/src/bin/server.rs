use anyhow::Context;
use clap::Parser;
use genui_server::{router, AppState, Config, DEFAULT_CONFIG_NAME};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genui-server")]
#[command(about = "Stream live-rendered generated UI", long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_NAME)]
    config: PathBuf,

    /// Override the configured host
    #[arg(long)]
    host: Option<String>,

    /// Override the configured port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    let addr = config.addr()?;
    let app = router(AppState::from_config(&config));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(%addr, references = config.catalog.len(), "genui server listening");

    axum::serve(listener, app).await?;
    Ok(())
}
