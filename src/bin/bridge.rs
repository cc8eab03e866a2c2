//! prombridge server
//!
//! Receives Prometheus remote write and answers remote read over HTTP.

use prombridge::api::{self, ApiServerConfig};
use prombridge::config::{ComponentFactory, StoreArgs, TableArgs};
use prombridge::table::ReadinessConfig;
use prombridge::telemetry::Telemetry;
use prombridge::{Config, Error};

use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Prometheus remote storage bridge
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    table: TableArgs,

    #[command(flatten)]
    store: StoreArgs,

    /// HTTP API port
    #[arg(long, env = "HTTP_PORT", default_value = "1234")]
    http_port: u16,

    /// Maximum request body size in bytes (default: 32MB)
    #[arg(long, default_value = "33554432")]
    max_body_size: usize,

    /// Per-request deadline in seconds (0 disables it)
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Create the dataset when it does not exist
    #[arg(long, env = "CREATE_DATASET", default_value = "true", action = ArgAction::Set)]
    create_dataset: bool,

    /// Poll until a newly created table is visible
    #[arg(long, env = "WAIT_FOR_READY", default_value = "true", action = ArgAction::Set)]
    wait_for_ready: bool,

    /// Readiness poll interval in milliseconds
    #[arg(long, default_value = "1000")]
    readiness_poll_ms: u64,

    /// Give up on table readiness after this many seconds
    #[arg(long, env = "READINESS_TIMEOUT_SECS", default_value = "60")]
    readiness_timeout_secs: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Config {
        let request_timeout =
            (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs));

        Config {
            table: self.table.into(),
            readiness: ReadinessConfig {
                wait_for_ready: self.wait_for_ready,
                poll_interval: Duration::from_millis(self.readiness_poll_ms),
                readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
                create_dataset: self.create_dataset,
            },
            api: ApiServerConfig {
                http_port: self.http_port,
                max_body_size: self.max_body_size,
                request_timeout,
            },
            store: self.store.into(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let _telemetry = Telemetry::init_for_component("prombridge", &args.log_level)?;
    let config = args.into_config();

    info!(
        table = %config.table.table_ref(),
        storage_backend = config.store.backend.as_str(),
        "Starting prombridge"
    );

    if let Some(deadline) = config.api.request_timeout {
        if deadline < config.readiness.readiness_timeout {
            warn!(
                request_timeout_secs = deadline.as_secs(),
                readiness_timeout_secs = config.readiness.readiness_timeout.as_secs(),
                "Request deadline is shorter than the readiness timeout; a bring-up retried by a request ends at the request deadline"
            );
        }
    }

    let store = ComponentFactory::create_store_gateway(&config.table.project, &config.store)?;
    let state = ComponentFactory::create_api_state(&config, store);

    // The table must be usable before the first request is accepted
    if let Err(e) = state.tables.ensure_ready().await {
        error!(table = %state.tables.table(), error = %e, "Table is not ready");
        return Err(e.into());
    }

    let router = api::build_http_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.http_port));
    let listener = TcpListener::bind(addr).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    info!(http_port = config.api.http_port, "Bridge ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")))?;

    info!("Bridge shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
