use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use formguard::config::FormguardConfig;
use formguard::contact::LogSink;
use formguard::ratelimit::{self, SystemClock};
use formguard::web::{AppState, HttpServer};

/// Rate-limited contact and newsletter form endpoints.
#[derive(Debug, Parser)]
#[command(name = "formguard", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long, env = "FORMGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP bind address
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the sqlx database URL
    #[arg(long)]
    database_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if args.log_json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }

    info!("Starting Formguard");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = FormguardConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.http_addr = bind;
    }
    if let Some(database_url) = args.database_url {
        config.store.database_url = database_url;
    }
    info!(
        http_addr = %config.server.http_addr,
        contact_limit = config.rate_limiting.contact.limit,
        contact_window_secs = config.rate_limiting.contact.window_secs,
        newsletter_limit = config.rate_limiting.newsletter.limit,
        newsletter_window_secs = config.rate_limiting.newsletter.window_secs,
        on_store_error = ?config.rate_limiting.on_store_error,
        "Configuration loaded"
    );

    let pool = ratelimit::connect(&config.store).await?;
    let state = AppState::build(&config, pool, Arc::new(SystemClock), Arc::new(LogSink)).await?;
    info!("Rate limiters initialized");

    let server = HttpServer::new(config.server.http_addr, Arc::new(state));

    // Run the server with graceful shutdown on Ctrl+C
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Formguard stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
