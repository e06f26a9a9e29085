//! armor-control main entry point
//!
//! Control-plane daemon: hydrates state from the record store, starts the
//! reconciliation scheduler and serves `/healthz` and `/metrics`.

use clap::{Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use armor_control::{
    config::ControlConfig,
    control::{ControlPlane, ControlSettings},
    ipam::AddressAllocator,
    monitoring::{FleetMonitor, HealthStatus},
    orchestrator::HttpOrchestrator,
    platform::{detect_environment, select_drivers},
    scheduler::fleet_scheduler,
    store::{MemoryStore, RecordStore},
    wireguard::TunnelController,
    APP_NAME, VERSION,
};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;
use tokio::signal;

/// WireGuard fleet control plane
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "/etc/armor/control.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the control-plane daemon
    Start,

    /// Validate the configuration file and exit
    Check,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize structured logging with tracing
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the CLI command
async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Start => start(&cli.config).await,
        Commands::Check => {
            let config = ControlConfig::from_file(&cli.config)?;
            println!(
                "{}: ok (pool {}, interface {}, {} agent port)",
                cli.config, config.pool_cidr, config.core_interface, config.agent_port
            );
            Ok(())
        }
        Commands::Version => {
            println!("{} v{}", APP_NAME, VERSION);
            Ok(())
        }
    }
}

async fn start(config_path: &str) -> anyhow::Result<()> {
    info!("Starting {} v{}", APP_NAME, VERSION);
    info!(config = %config_path, "Loading configuration");
    let config = ControlConfig::from_file(config_path)?;

    if config.uses_insecure_token() {
        warn!("agent_token is the built-in default; set ARMOR_AGENT_TOKEN before exposing agents");
    }

    let store: Arc<dyn RecordStore> = match &config.seed_path {
        Some(path) => {
            info!(seed = %path.display(), "Preloading record store");
            Arc::new(MemoryStore::from_seed_file(path)?)
        }
        None => Arc::new(MemoryStore::new()),
    };

    let platform = detect_environment();
    info!(platform = %platform.description(), "Host environment detected");
    let drivers = select_drivers(&platform);
    if drivers.is_degraded() {
        info!("Core node runs with dev-mode drivers; peer changes are not applied to the kernel");
    }

    let agent = HttpOrchestrator::new(config.agent_token.clone(), config.agent_port, config.agent_timeout())?;
    let plane = Arc::new(ControlPlane::new(
        store,
        Arc::new(AddressAllocator::from_cidr(&config.pool_cidr)?),
        Arc::new(TunnelController::new(drivers)),
        Arc::new(agent),
        ControlSettings::from(&config),
    ));

    let report = plane.hydrate().await?;
    info!(
        addresses = report.addresses,
        revoked = report.revoked,
        core_node = report.core_node,
        "State hydrated"
    );

    let monitor = Arc::new(FleetMonitor::new());
    let (scheduler, _queue) = fleet_scheduler(
        Arc::clone(&plane),
        Arc::clone(&monitor),
        &config.schedule,
        &config.retention,
    );
    scheduler.start().await;

    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    info!(addr = %config.http_bind, "HTTP server listening");

    axum::serve(listener, create_http_server(monitor))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down control plane");
    scheduler.shutdown().await;
    Ok(())
}

/// Create HTTP server with routes
fn create_http_server(monitor: Arc<FleetMonitor>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .with_state(monitor)
}

/// Fleet health summary; 503 when unhealthy
async fn healthz(State(monitor): State<Arc<FleetMonitor>>) -> impl IntoResponse {
    let health = monitor.health_check();
    let status = match health.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(health))
}

/// Metrics endpoint (Prometheus format)
async fn metrics(State(monitor): State<Arc<FleetMonitor>>) -> impl IntoResponse {
    let mut output = String::new();
    output.push_str("# HELP armor_control_info Control plane information\n");
    output.push_str("# TYPE armor_control_info gauge\n");
    output.push_str(&format!("armor_control_info{{version=\"{}\"}} 1\n\n", VERSION));
    output.push_str(&monitor.metrics().export_prometheus());

    (StatusCode::OK, output)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
