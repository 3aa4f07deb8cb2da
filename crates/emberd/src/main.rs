use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::filter::LevelFilter;

use emberd::agent::HttpDeviceAgent;
use emberd::api::{self, AppState, LoginRedirect};
use emberd::directive::DirectiveHandler;
use emberd::directory::DeviceDirectory;
use emberd::dispatch::Dispatcher;
use emberd::identity::LwaClient;
use emberd::linking::LinkWorkflow;
use emberd::resolver::AccountResolver;
use emberd::signer::JwtSigner;
use emberd::store::{AccountStore, DeviceStore, MemoryStore};
use emberd::Config;

#[derive(Parser)]
#[command(name = "emberd", about = "Voice-assistant bridge for networked fireplaces")]
struct Args {
    /// Path to the configuration file
    #[arg(long, default_value = "emberd.toml")]
    config: PathBuf,

    /// Override the listen address from the config file
    #[arg(long)]
    listen: Option<String>,

    /// Override the listen port from the config file
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("emberd starting");

    let listen = args.listen.unwrap_or_else(|| config.server.listen.clone());
    let port = args.port.unwrap_or(config.server.port);

    // Shared collaborators; trait objects so tests and deployments can swap
    // implementations without touching the services.
    let store = Arc::new(MemoryStore::new());
    let accounts: Arc<dyn AccountStore> = store.clone();
    let devices: Arc<dyn DeviceStore> = store;

    let provider_http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .context("building identity-provider HTTP client")?;
    let identity = Arc::new(LwaClient::new(provider_http, &config));
    let signer = Arc::new(JwtSigner::new(&config.signing));
    let agent = Arc::new(HttpDeviceAgent::new().context("building device-agent HTTP client")?);

    let state = Arc::new(AppState {
        handler: DirectiveHandler::new(
            AccountResolver::new(identity.clone(), accounts.clone()),
            DeviceDirectory::new(devices.clone()),
            Dispatcher::new(agent, signer, devices.clone()),
        ),
        workflow: LinkWorkflow::new(identity, accounts, devices.clone()),
        directory: DeviceDirectory::new(devices),
        login: LoginRedirect::from_config(&config),
        version: env!("CARGO_PKG_VERSION"),
    });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Received shutdown signal"),
            Err(e) => tracing::error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(());
    });

    api::serve(listen, port, state, shutdown_rx).await?;

    tracing::info!("emberd shutdown complete");
    Ok(())
}
