use std::sync::Arc;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use voicebridge::config::GatewayConfig;
use voicebridge::session::SessionRegistry;
use voicebridge::tools::{ToolDispatcherBuilder, register_builtin_tools};
use voicebridge::{AiSessionClient, GeminiLiveClient};

/// Voicebridge - PBX call gateway for Gemini Live
#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the environment configuration and exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing; LOG_LEVEL / RUST_LOG narrow the filter
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    if let Some(Commands::CheckConfig) = cli.command {
        let config = GatewayConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
        println!("{config:#?}");
        println!("Configuration OK");
        return Ok(());
    }

    let config = GatewayConfig::from_env().map_err(|e| anyhow!(e.to_string()))?;
    info!(registrar = %config.sip.registrar_uri(), account = %config.sip.account_uri(),
        "Loaded gateway configuration");

    // Tool registry is frozen before the first call
    let tools = Arc::new(register_builtin_tools(ToolDispatcherBuilder::new())?.build());
    info!(tools = tools.declarations().len(), "Tool dispatcher ready");

    let ai_client: Arc<dyn AiSessionClient> = Arc::new(GeminiLiveClient);
    let registry = Arc::new(SessionRegistry::new(
        ai_client,
        tools.clone(),
        config.session_config(tools.declarations()),
    ));

    // The SIP/RTP stack is an external collaborator: it offers calls through
    // `SessionRegistry::offer_call` and routes media with `handle_event`.
    info!("Gateway ready, waiting for calls");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    registry.shutdown().await;
    info!("All sessions stopped");
    Ok(())
}
