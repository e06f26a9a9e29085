//! armor-agent: edge node agent
//!
//! Serves the authenticated `/agent/v1` API on top of the node's own
//! tunnel device and packet filter.

use armor_control::{
    agent::{serve, AgentState, LogBus},
    config::AgentConfig,
    platform::{detect_environment, select_drivers},
    wireguard::TunnelController,
    VERSION,
};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_BUS_CAPACITY: usize = 256;

/// WireGuard edge node agent
#[derive(Parser, Debug)]
#[command(name = "armor-agent", version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path; defaults apply when it does not exist
    #[arg(short, long, default_value = "/etc/armor/agent.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("armor-agent: {:#}", e);
            std::process::exit(1);
        }
    };

    let logs = LogBus::new(config.node_name.clone(), LOG_BUS_CAPACITY);
    init_logging(cli.verbose, &logs);

    if let Err(e) = run(config, logs).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<AgentConfig> {
    if std::path::Path::new(path).exists() {
        return Ok(AgentConfig::from_file(path)?);
    }
    let mut config = AgentConfig::default();
    config.apply_env();
    config.validate()?;
    Ok(config)
}

/// Initialize logging: stdout plus the broadcast bus behind `/logs`
fn init_logging(verbose: bool, logs: &LogBus) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(logs.layer())
        .init();
}

async fn run(config: AgentConfig, logs: LogBus) -> anyhow::Result<()> {
    info!(node = %config.node_name, "Starting armor-agent v{}", VERSION);

    if config.uses_insecure_token() {
        warn!("Agent token is the built-in default; set ARMOR_AGENT_TOKEN");
    }

    let platform = detect_environment();
    info!(platform = %platform.description(), "Host environment detected");

    let state = AgentState::new(
        Arc::new(TunnelController::new(select_drivers(&platform))),
        config.token.as_str(),
        config.state_dir.clone(),
        logs,
        Duration::from_secs(config.heartbeat_secs),
    );

    let listener = TcpListener::bind(&config.bind).await?;
    serve(listener, state, shutdown_signal()).await?;

    info!("Agent stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal"),
        _ = terminate => info!("Received SIGTERM signal"),
    }
}
