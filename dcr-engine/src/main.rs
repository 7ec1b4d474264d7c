//! dcr-engine - Device Catalog Reconciliation service
//!
//! Matches external price-feed listings against the device catalog, stages
//! the resulting price changes for review and applies them on request.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dcr_common::config::{
    default_config_path, load_toml_config, RootFolderInitializer, RootFolderResolver, TomlConfig,
};
use dcr_common::events::EventBus;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dcr_engine::config::EngineConfig;
use dcr_engine::AppState;

/// Command-line arguments for dcr-engine
#[derive(Parser, Debug)]
#[command(name = "dcr-engine")]
#[command(about = "Device catalog reconciliation engine")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5780", env = "DCR_PORT")]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1", env = "DCR_BIND")]
    bind: std::net::IpAddr,

    /// Root folder holding the database
    #[arg(short, long, env = "DCR_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// TOML config file (defaults to ~/.config/dcr/config.toml)
    #[arg(short, long, env = "DCR_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(default_config_path);
    let toml_config = match &config_path {
        Some(path) => load_toml_config(path)
            .with_context(|| format!("Failed to load {}", path.display()))?
            .unwrap_or_default(),
        None => TomlConfig::default(),
    };

    let default_filter = format!(
        "dcr_engine={level},dcr_common={level},tower_http=info",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dcr-engine on port {}", args.port);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "Build"
    );

    let root_folder = RootFolderResolver::new("dcr-engine")
        .with_cli_arg(args.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = dcr_engine::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    let engine_config = EngineConfig::resolve(&db_pool, &toml_config)
        .await
        .context("Invalid engine configuration")?;
    info!(
        review_threshold = engine_config.review_threshold,
        worker_count = engine_config.worker_count,
        target_channel = %engine_config.target_channel,
        "Engine configuration resolved"
    );

    let event_bus = EventBus::new(100);
    let state = AppState::new(db_pool, engine_config, event_bus);

    let recovered = state
        .orchestrator
        .recover_interrupted()
        .await
        .context("Failed to recover interrupted batches")?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "Batches interrupted by the previous shutdown marked failed");
    }

    let orchestrator = state.orchestrator.clone();
    let app = dcr_engine::build_router(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Stopping running batches");
    orchestrator.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
