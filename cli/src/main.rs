use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::{Config, HumanDesk, SessionManager, config, create_provider};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod onboard;
mod roster;
mod server;
mod terminal;

const OPERATOR_QUEUE: usize = 16;
const REAP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "switchboard - agents that hand the conversation off", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write ~/.switchboard/config.toml interactively
    Onboard,
    /// Serve sessions over HTTP and WebSocket
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Chat with the agents in this terminal
    Chat,
}

fn init_tracing(config: &Config) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn build_manager(config: &Config, desk: HumanDesk) -> Result<Arc<SessionManager>> {
    let provider = create_provider(config)?;
    tracing::info!(provider = provider.name(), model = %config.model, "Provider ready");

    if !config.workspace_dir.exists() {
        std::fs::create_dir_all(&config.workspace_dir)?;
    }

    let roster = roster::default_roster(config, provider, desk)?;
    Ok(Arc::new(SessionManager::from_config(roster, &config.runtime)))
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut server_config = config.server.clone();
    if let Some(host) = host {
        server_config.host = host;
    }
    if let Some(port) = port {
        server_config.port = port;
    }

    let (desk, requests) = HumanDesk::channel(OPERATOR_QUEUE);
    let manager = build_manager(&config, desk)?;
    let shutdown = CancellationToken::new();

    let operator = tokio::spawn(terminal::run_operator(requests, shutdown.clone()));
    let reaper = tokio::spawn(Arc::clone(&manager).run_reaper(REAP_INTERVAL, shutdown.clone()));

    let app = server::router(server::AppState {
        manager: Arc::clone(&manager),
    });
    let addr: SocketAddr = server_config.address().parse()?;
    tracing::info!("Starting switchboard on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    manager.close_all().await;
    let _ = reaper.await;
    operator.abort();
    Ok(())
}

async fn chat(config: Config) -> Result<()> {
    let (desk, requests) = HumanDesk::channel(OPERATOR_QUEUE);
    let manager = build_manager(&config, desk)?;
    let session = manager.get_session(&manager.create_session()?)?;

    let outcome = terminal::run_chat(Arc::clone(&session), requests).await;
    manager.close_all().await;
    outcome
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or_else(|| {
        if !config::config_exists() {
            Commands::Onboard
        } else {
            Commands::Chat
        }
    });

    if let Commands::Onboard = command {
        let onboard_config = onboard::run_onboard().map_err(|e| {
            eprintln!("Onboarding failed: {}", e);
            anyhow::anyhow!("Onboarding failed: {}", e)
        })?;
        config::save_config(&onboard_config)?;
        return Ok(());
    }

    let config = Config::load_or_init()?;
    init_tracing(&config);

    match command {
        Commands::Serve { host, port } => serve(config, host, port).await,
        Commands::Chat => chat(config).await,
        Commands::Onboard => Ok(()),
    }
}
