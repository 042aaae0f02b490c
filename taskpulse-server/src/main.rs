//! taskpulse-server - TaskPulse engagement service
//!
//! Serves the notification log and account endpoints, and runs the daily
//! attendance tracker and the hourly overdue scanner in the background.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use taskpulse_common::config::ServerConfig;
use taskpulse_common::db::init_database;
use taskpulse_common::{ChannelRegistry, Notifier};
use taskpulse_server::{build_router, scheduler, AppState};
use tokio::signal;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "taskpulse-server")]
#[command(about = "TaskPulse engagement service", long_about = None)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, env = "TASKPULSE_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long, env = "TASKPULSE_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "TASKPULSE_BIND")]
    bind: Option<String>,

    /// Reference timezone as minutes east of UTC
    #[arg(long, env = "TASKPULSE_UTC_OFFSET_MINUTES", allow_hyphen_values = true)]
    utc_offset_minutes: Option<i32>,

    /// Sign-up code granting the admin role
    #[arg(long, env = "TASKPULSE_ADMIN_JOIN_CODE")]
    admin_join_code: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Log build identification before anything that can stall
    info!(
        "Starting TaskPulse server (taskpulse-server) v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args = Args::parse();

    let mut config = ServerConfig::load(args.config.as_deref()).context("Failed to load config")?;
    if let Some(root_folder) = args.root_folder {
        config.root_folder = root_folder;
    }
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(offset) = args.utc_offset_minutes {
        config.utc_offset_minutes = offset;
    }
    if args.admin_join_code.is_some() {
        config.admin_join_code = args.admin_join_code;
    }
    config.validate().context("Invalid configuration")?;

    let timezone = config.timezone()?;
    info!("Reference timezone: UTC{}", timezone);

    let db_path = config.database_path();
    info!("Database path: {}", db_path.display());
    let pool = match init_database(&db_path).await {
        Ok(pool) => {
            info!("✓ Database ready");
            pool
        }
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let registry = Arc::new(ChannelRegistry::new(config.event_channel_capacity));
    let notifier: Arc<dyn Notifier> = registry.clone();
    let state = AppState::new(
        pool,
        notifier,
        registry,
        timezone,
        config.admin_join_code.clone(),
    );

    let jobs = scheduler::start(
        state.attendance.clone(),
        Duration::from_secs(config.attendance_interval_secs),
        state.overdue.clone(),
        Duration::from_secs(config.overdue_interval_secs),
    );

    let app = build_router(state).layer(TimeoutLayer::new(Duration::from_millis(
        config.request_timeout_ms,
    )));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    info!("taskpulse-server listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    jobs.shutdown();
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install terminate handler: {}", e);
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
