//! Gateway binary: load config, wire the collaborators, serve the API.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cairn_domain::config::Config;
use cairn_gateway::api::router::build_router;
use cairn_gateway::state::AppState;
use cairn_gateway::stores::memory::{
    MemoryAttachmentStore, MemoryChatStore, MemorySearchBackend,
};
use cairn_providers::ProviderRegistry;

#[derive(Parser, Debug)]
#[command(name = "cairn", about = "Turn-structured agent execution engine")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config: Config = if args.config.exists() {
        let raw = std::fs::read_to_string(&args.config)
            .with_context(|| format!("reading {}", args.config.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", args.config.display()))?
    } else {
        tracing::warn!(path = %args.config.display(), "config file not found, using defaults");
        Config::default()
    };
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let llm = ProviderRegistry::from_config(&config.llm);
    if llm.is_empty() {
        tracing::warn!("no LLM providers initialized; chat requests will fail until configured");
    }

    // In-process collaborators; production deployments swap these for
    // database- and index-backed implementations.
    let state = AppState::new(
        Arc::new(config.clone()),
        Arc::new(llm),
        Arc::new(MemoryChatStore::new()),
        Arc::new(MemorySearchBackend::new()),
        Arc::new(MemoryAttachmentStore::new()),
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "cairn gateway listening");

    axum::serve(listener, build_router(state))
        .await
        .context("server error")?;

    Ok(())
}
